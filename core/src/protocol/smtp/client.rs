/*
 * client.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Lettera, a terminal email client.
 *
 * Lettera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Lettera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Lettera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Async SMTP client: connect, EHLO, STARTTLS, AUTH, MAIL FROM, RCPT TO,
//! DATA, QUIT. Response codes split into permanent (5xx) and transient (4xx)
//! failures so the send path can choose between draft and outbox.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::net::MailStream;
use crate::protocol::smtp::dot_stuffer::stuff_and_terminate;
use crate::sasl::{
    base64_encode, initial_client_response, login_respond_to_challenge, SaslMechanism,
};

/// SMTP failure, split the way the send path reacts: transport and transient
/// failures queue to the outbox, permanent failures surface a draft offer.
#[derive(Debug)]
pub enum SmtpError {
    Transport(String),
    /// 4xx reply.
    Transient(u16, String),
    /// 5xx reply.
    Permanent(u16, String),
    Auth(String),
}

impl SmtpError {
    /// True when retrying later could succeed (transport or 4xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, SmtpError::Transport(_) | SmtpError::Transient(_, _))
    }

    fn from_reply(code: u16, message: String) -> Self {
        if (500..600).contains(&code) {
            SmtpError::Permanent(code, message)
        } else {
            SmtpError::Transient(code, message)
        }
    }
}

impl std::fmt::Display for SmtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmtpError::Transport(m) => write!(f, "smtp transport error: {}", m),
            SmtpError::Transient(c, m) => write!(f, "smtp transient failure {}: {}", c, m),
            SmtpError::Permanent(c, m) => write!(f, "smtp permanent failure {}: {}", c, m),
            SmtpError::Auth(m) => write!(f, "smtp auth error: {}", m),
        }
    }
}

impl std::error::Error for SmtpError {}

impl From<io::Error> for SmtpError {
    fn from(e: io::Error) -> Self {
        SmtpError::Transport(e.to_string())
    }
}

/// How to establish TLS for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// TLS on connect (SMTPS, usually 465).
    Implicit,
    /// Plain connect, upgrade via STARTTLS (usually 587).
    StartTls,
}

struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn message(&self) -> String {
        self.lines.join(" / ")
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

pub struct SmtpSession {
    stream: MailStream,
    buf: BytesMut,
}

impl SmtpSession {
    /// Connect, EHLO, optionally STARTTLS + EHLO again, optionally AUTH.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: SmtpTls,
        ehlo_hostname: &str,
        auth: Option<(&str, &str, SaslMechanism)>,
    ) -> Result<Self, SmtpError> {
        let mut stream = match tls {
            SmtpTls::Implicit => MailStream::connect_tls(host, port).await?,
            SmtpTls::StartTls => MailStream::connect_plain(host, port).await?,
        };
        let mut buf = BytesMut::with_capacity(4 * 1024);
        let greeting = read_reply_on(&mut stream, &mut buf).await?;
        if !greeting.is_success() {
            return Err(SmtpError::from_reply(greeting.code, greeting.message()));
        }

        let (starttls, mut auth_methods) = ehlo_on(&mut stream, &mut buf, ehlo_hostname).await?;
        if tls == SmtpTls::StartTls {
            if !starttls {
                return Err(SmtpError::Transport(
                    "server does not offer STARTTLS".to_string(),
                ));
            }
            write_line_on(&mut stream, "STARTTLS").await?;
            let reply = read_reply_on(&mut stream, &mut buf).await?;
            if !reply.is_success() {
                return Err(SmtpError::from_reply(reply.code, reply.message()));
            }
            stream = stream.upgrade_tls(host).await?;
            buf.clear();
            let (_, methods) = ehlo_on(&mut stream, &mut buf, ehlo_hostname).await?;
            auth_methods = methods;
        }

        let mut session = Self { stream, buf };
        if let Some((user, pass, mechanism)) = auth {
            session.auth(user, pass, mechanism, &auth_methods).await?;
        }
        Ok(session)
    }

    async fn auth(
        &mut self,
        user: &str,
        pass: &str,
        mechanism: SaslMechanism,
        advertised: &[String],
    ) -> Result<(), SmtpError> {
        if !advertised.iter().any(|m| m == mechanism.name()) {
            return Err(SmtpError::Auth(format!(
                "server does not support AUTH {}",
                mechanism.name()
            )));
        }
        let initial = initial_client_response(mechanism, user, pass);
        if initial.is_empty() {
            self.write_line(&format!("AUTH {}", mechanism.name())).await?;
        } else {
            let b64 = String::from_utf8_lossy(&base64_encode(&initial)).into_owned();
            self.write_line(&format!("AUTH {} {}", mechanism.name(), b64))
                .await?;
        }
        loop {
            let reply = self.read_reply().await?;
            match reply.code {
                235 => return Ok(()),
                334 => {
                    let challenge = reply.lines.last().cloned().unwrap_or_default();
                    let response = match mechanism {
                        SaslMechanism::Login => {
                            login_respond_to_challenge(&challenge, user, pass)
                                .map_err(|e| SmtpError::Auth(e.to_string()))?
                        }
                        // XOAUTH2 failure challenge: reply with empty line,
                        // server then sends the final status
                        _ => Vec::new(),
                    };
                    self.write_line(&String::from_utf8_lossy(&response)).await?;
                }
                _ => return Err(SmtpError::Auth(reply.message())),
            }
        }
    }

    /// Deliver one message: MAIL FROM, RCPT TO for each recipient, DATA.
    pub async fn send(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<(), SmtpError> {
        if recipients.is_empty() {
            return Err(SmtpError::Permanent(0, "no recipients".to_string()));
        }
        self.command(&format!("MAIL FROM:<{}>", from)).await?;
        for rcpt in recipients {
            self.command(&format!("RCPT TO:<{}>", rcpt)).await?;
        }
        self.write_line("DATA").await?;
        let reply = self.read_reply().await?;
        if reply.code != 354 {
            return Err(SmtpError::from_reply(reply.code, reply.message()));
        }
        let stuffed = stuff_and_terminate(message);
        self.stream.write_all(&stuffed).await?;
        self.stream.flush().await?;
        let reply = self.read_reply().await?;
        if !reply.is_success() {
            return Err(SmtpError::from_reply(reply.code, reply.message()));
        }
        Ok(())
    }

    pub async fn quit(&mut self) -> Result<(), SmtpError> {
        self.write_line("QUIT").await?;
        let _ = self.read_reply().await;
        Ok(())
    }

    /// Send a command expecting a 2xx reply.
    async fn command(&mut self, line: &str) -> Result<(), SmtpError> {
        self.write_line(line).await?;
        let reply = self.read_reply().await?;
        if !reply.is_success() {
            return Err(SmtpError::from_reply(reply.code, reply.message()));
        }
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SmtpError> {
        write_line_on(&mut self.stream, line).await
    }

    async fn read_reply(&mut self) -> Result<Reply, SmtpError> {
        read_reply_on(&mut self.stream, &mut self.buf).await
    }
}

async fn ehlo_on(
    stream: &mut MailStream,
    buf: &mut BytesMut,
    hostname: &str,
) -> Result<(bool, Vec<String>), SmtpError> {
    write_line_on(stream, &format!("EHLO {}", hostname)).await?;
    let reply = read_reply_on(stream, buf).await?;
    if !reply.is_success() {
        return Err(SmtpError::from_reply(reply.code, reply.message()));
    }
    let mut starttls = false;
    let mut auth_methods = Vec::new();
    for line in &reply.lines {
        let upper = line.to_uppercase();
        if upper == "STARTTLS" {
            starttls = true;
        } else if let Some(rest) = upper.strip_prefix("AUTH ") {
            auth_methods.extend(rest.split_whitespace().map(|s| s.to_string()));
        }
    }
    Ok((starttls, auth_methods))
}

async fn write_line_on(stream: &mut MailStream, line: &str) -> Result<(), SmtpError> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn read_reply_on(stream: &mut MailStream, buf: &mut BytesMut) -> Result<Reply, SmtpError> {
    let mut lines = Vec::new();
    loop {
        let line = read_line_on(stream, buf).await?;
        if line.len() < 3 {
            continue;
        }
        let code: u16 = line[..3].parse().unwrap_or(0);
        let continuation = line.as_bytes().get(3) == Some(&b'-');
        let text = line.get(4..).unwrap_or("").trim().to_string();
        lines.push(text);
        if !continuation {
            return Ok(Reply { code, lines });
        }
    }
}

async fn read_line_on(stream: &mut MailStream, buf: &mut BytesMut) -> Result<String, SmtpError> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos + 2);
            return Ok(String::from_utf8_lossy(&line[..line.len() - 2]).into_owned());
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(SmtpError::Transport("connection closed".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_classification() {
        assert!(matches!(
            SmtpError::from_reply(550, "no such user".to_string()),
            SmtpError::Permanent(550, _)
        ));
        assert!(matches!(
            SmtpError::from_reply(451, "try again".to_string()),
            SmtpError::Transient(451, _)
        ));
        assert!(SmtpError::from_reply(451, String::new()).is_transient());
        assert!(!SmtpError::from_reply(550, String::new()).is_transient());
        assert!(SmtpError::Transport("reset".to_string()).is_transient());
    }
}
