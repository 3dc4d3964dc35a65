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

//! Async IMAP session: connect, STARTTLS when advertised, LOGIN/AUTHENTICATE,
//! then the selected-state operations the engine drives (LIST, SELECT,
//! UID SEARCH/FETCH/STORE/COPY/MOVE/EXPUNGE, APPEND, IDLE). One session per
//! worker; no sharing.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;

use crate::model::{Flags, Uid};
use crate::net::MailStream;
use crate::sasl::{
    base64_encode, initial_client_response, login_respond_to_challenge, SaslMechanism,
};

/// IMAP failure, split the way the engine reacts to it: transport errors drop
/// the connection, protocol errors fail the operation, auth errors halt the
/// reconnect loop.
#[derive(Debug)]
pub enum ImapError {
    Transport(String),
    Protocol(String),
    Auth(String),
}

impl ImapError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ImapError::Transport(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ImapError::Auth(_))
    }
}

impl std::fmt::Display for ImapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImapError::Transport(m) => write!(f, "imap transport error: {}", m),
            ImapError::Protocol(m) => write!(f, "imap protocol error: {}", m),
            ImapError::Auth(m) => write!(f, "imap auth error: {}", m),
        }
    }
}

impl std::error::Error for ImapError {}

impl From<io::Error> for ImapError {
    fn from(e: io::Error) -> Self {
        ImapError::Transport(e.to_string())
    }
}

/// How to establish TLS for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapTls {
    /// TLS handshake immediately after connect (IMAPS, usually 993).
    Implicit,
    /// Plain connect, upgrade via STARTTLS when advertised.
    StartTls,
}

/// Untagged/tagged status of a parsed response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStatus {
    Ok,
    No,
    Bad,
    Other,
}

#[derive(Debug)]
struct ResponseLine {
    raw: String,
    tag: Option<String>,
    untagged: bool,
    status: LineStatus,
    /// Literal payload following this line, if the line ended with {N}.
    literal: Option<Vec<u8>>,
}

/// Result of SELECT.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectInfo {
    pub exists: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
}

/// Why an IDLE wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// Server pushed EXISTS/EXPUNGE/FETCH: mailbox changed.
    MailboxChanged,
    /// Local wakeup (new work or sleep detector).
    Wakeup,
    /// Refresh deadline reached; caller should re-issue IDLE.
    Timeout,
}

pub struct ImapSession {
    stream: MailStream,
    buf: BytesMut,
    tag_counter: u32,
    capabilities: Vec<String>,
    selected: Option<String>,
}

impl ImapSession {
    /// Connect and read the greeting. TLS per `tls`; STARTTLS upgrades when
    /// the server advertises it.
    pub async fn connect(host: &str, port: u16, tls: ImapTls) -> Result<Self, ImapError> {
        let mut stream = match tls {
            ImapTls::Implicit => MailStream::connect_tls(host, port).await?,
            ImapTls::StartTls => MailStream::connect_plain(host, port).await?,
        };
        let mut buf = BytesMut::with_capacity(8 * 1024);
        let greeting = read_line_on(&mut stream, &mut buf).await?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(ImapError::Protocol(format!(
                "unexpected greeting: {}",
                greeting
            )));
        }
        let mut capabilities = parse_capabilities(&greeting);

        if tls == ImapTls::StartTls {
            write_line_on(&mut stream, "S001 STARTTLS").await?;
            loop {
                let line = read_line_on(&mut stream, &mut buf).await?;
                let parsed = parse_line(&line);
                if parsed.tag.as_deref() == Some("S001") {
                    if parsed.status != LineStatus::Ok {
                        return Err(ImapError::Protocol(parsed.raw));
                    }
                    break;
                }
            }
            stream = stream.upgrade_tls(host).await?;
            buf.clear();
            capabilities.clear();
        }

        let mut session = Self {
            stream,
            buf,
            tag_counter: 1,
            capabilities,
            selected: None,
        };
        if session.capabilities.is_empty() {
            session.refresh_capabilities().await?;
        }
        Ok(session)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn selected_folder(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    async fn refresh_capabilities(&mut self) -> Result<(), ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} CAPABILITY", tag)).await?;
        let mut caps = Vec::new();
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                if line.raw.starts_with("* CAPABILITY ") {
                    caps = parse_capabilities(&line.raw);
                }
            })
            .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        self.capabilities = caps;
        Ok(())
    }

    /// Authenticate: AUTHENTICATE with the mechanism when advertised,
    /// otherwise LOGIN. Rejection is an Auth error.
    pub async fn login(
        &mut self,
        user: &str,
        pass: &str,
        mechanism: SaslMechanism,
    ) -> Result<(), ImapError> {
        let advertised = self
            .capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&format!("AUTH={}", mechanism.name())));
        let result = if advertised {
            self.authenticate(user, pass, mechanism).await
        } else {
            self.login_plain(user, pass).await
        };
        if result.is_ok() {
            // post-auth capabilities may differ (e.g. MOVE, UIDPLUS)
            self.refresh_capabilities().await?;
        }
        result
    }

    async fn login_plain(&mut self, user: &str, pass: &str) -> Result<(), ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!(
            "{} LOGIN {} {}",
            tag,
            quote_string(user),
            quote_string(pass)
        ))
        .await?;
        let resp = self.read_until_tagged(&tag, &mut |_| {}).await?;
        match resp.status {
            LineStatus::Ok => Ok(()),
            _ => Err(ImapError::Auth(resp.raw)),
        }
    }

    async fn authenticate(
        &mut self,
        user: &str,
        pass: &str,
        mechanism: SaslMechanism,
    ) -> Result<(), ImapError> {
        let initial = initial_client_response(mechanism, user, pass);
        let tag = self.next_tag();
        if initial.is_empty() {
            self.write_line(&format!("{} AUTHENTICATE {}", tag, mechanism.name()))
                .await?;
        } else {
            let b64 = String::from_utf8_lossy(&base64_encode(&initial)).into_owned();
            self.write_line(&format!("{} AUTHENTICATE {} {}", tag, mechanism.name(), b64))
                .await?;
        }
        loop {
            let line = self.read_line().await?;
            if let Some(challenge) = line.strip_prefix('+') {
                let challenge = challenge.trim();
                let reply = match mechanism {
                    SaslMechanism::Login => login_respond_to_challenge(challenge, user, pass)
                        .map_err(|e| ImapError::Auth(e.to_string()))?,
                    // XOAUTH2 error challenge: empty line continues, server
                    // then sends the tagged NO
                    _ => Vec::new(),
                };
                self.write_line(&String::from_utf8_lossy(&reply)).await?;
                continue;
            }
            let parsed = parse_line(&line);
            if parsed.tag.as_deref() == Some(tag.as_str()) {
                return match parsed.status {
                    LineStatus::Ok => Ok(()),
                    _ => Err(ImapError::Auth(parsed.raw)),
                };
            }
        }
    }

    /// LIST "" "*", returning selectable folder names.
    pub async fn list_folders(&mut self) -> Result<BTreeSet<String>, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} LIST \"\" \"*\"", tag)).await?;
        let mut folders = BTreeSet::new();
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                if let Some((attrs, name)) = parse_list_line(&line.raw) {
                    let noselect = attrs.iter().any(|a| a.eq_ignore_ascii_case("\\Noselect"));
                    if !noselect {
                        folders.insert(name);
                    }
                }
            })
            .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(folders)
    }

    /// SELECT a folder; records it as the session's selected folder.
    pub async fn select(&mut self, folder: &str) -> Result<SelectInfo, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} SELECT {}", tag, quote_string(folder)))
            .await?;
        let mut info = SelectInfo::default();
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                apply_select_line(&line.raw, &mut info);
            })
            .await?;
        if resp.status != LineStatus::Ok {
            self.selected = None;
            return Err(ImapError::Protocol(resp.raw));
        }
        self.selected = Some(folder.to_string());
        Ok(info)
    }

    /// UID SEARCH ALL in the selected folder.
    pub async fn uid_search_all(&mut self) -> Result<BTreeSet<Uid>, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} UID SEARCH ALL", tag)).await?;
        let mut uids = BTreeSet::new();
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                if let Some(rest) = line.raw.strip_prefix("* SEARCH") {
                    for word in rest.split_whitespace() {
                        if let Ok(uid) = word.parse() {
                            uids.insert(uid);
                        }
                    }
                }
            })
            .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(uids)
    }

    /// UID FETCH header blocks for a uid set.
    pub async fn uid_fetch_headers(
        &mut self,
        uids: &BTreeSet<Uid>,
    ) -> Result<BTreeMap<Uid, Vec<u8>>, ImapError> {
        if uids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let tag = self.next_tag();
        self.write_line(&format!(
            "{} UID FETCH {} (UID BODY.PEEK[HEADER])",
            tag,
            uid_set(uids)
        ))
        .await?;
        let mut out = BTreeMap::new();
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                if !is_fetch_line(&line.raw) {
                    return;
                }
                if let (Some(uid), Some(literal)) = (parse_fetch_uid(&line.raw), &line.literal) {
                    out.insert(uid, literal.clone());
                }
            })
            .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(out)
    }

    /// UID FETCH flags for a uid set.
    pub async fn uid_fetch_flags(
        &mut self,
        uids: &BTreeSet<Uid>,
    ) -> Result<BTreeMap<Uid, Flags>, ImapError> {
        if uids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let tag = self.next_tag();
        self.write_line(&format!("{} UID FETCH {} (UID FLAGS)", tag, uid_set(uids)))
            .await?;
        let mut out = BTreeMap::new();
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                if !is_fetch_line(&line.raw) {
                    return;
                }
                if let Some(uid) = parse_fetch_uid(&line.raw) {
                    out.insert(uid, parse_fetch_flags(&line.raw));
                }
            })
            .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(out)
    }

    /// UID FETCH one full body without setting \Seen.
    pub async fn uid_fetch_body(&mut self, uid: Uid) -> Result<Vec<u8>, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} UID FETCH {} (UID BODY.PEEK[])", tag, uid))
            .await?;
        let mut body = None;
        let resp = self
            .read_until_tagged(&tag, &mut |line| {
                if is_fetch_line(&line.raw) {
                    if let Some(literal) = &line.literal {
                        body = Some(literal.clone());
                    }
                }
            })
            .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        body.ok_or_else(|| ImapError::Protocol("fetch returned no body literal".to_string()))
    }

    /// UID STORE +FLAGS / -FLAGS \Seen.
    pub async fn uid_store_seen(
        &mut self,
        uids: &BTreeSet<Uid>,
        seen: bool,
    ) -> Result<(), ImapError> {
        let sign = if seen { '+' } else { '-' };
        self.simple_command(&format!(
            "UID STORE {} {}FLAGS.SILENT (\\Seen)",
            uid_set(uids),
            sign
        ))
        .await
    }

    /// UID STORE +FLAGS \Deleted.
    pub async fn uid_store_deleted(&mut self, uids: &BTreeSet<Uid>) -> Result<(), ImapError> {
        self.simple_command(&format!(
            "UID STORE {} +FLAGS.SILENT (\\Deleted)",
            uid_set(uids)
        ))
        .await
    }

    /// UID COPY to a destination folder.
    pub async fn uid_copy(&mut self, uids: &BTreeSet<Uid>, dest: &str) -> Result<(), ImapError> {
        self.simple_command(&format!("UID COPY {} {}", uid_set(uids), quote_string(dest)))
            .await
    }

    /// UID MOVE (RFC 6851); caller checks the MOVE capability.
    pub async fn uid_move(&mut self, uids: &BTreeSet<Uid>, dest: &str) -> Result<(), ImapError> {
        self.simple_command(&format!("UID MOVE {} {}", uid_set(uids), quote_string(dest)))
            .await
    }

    /// UID EXPUNGE (UIDPLUS) when available, otherwise EXPUNGE.
    pub async fn expunge(&mut self, uids: &BTreeSet<Uid>) -> Result<(), ImapError> {
        if self.has_capability("UIDPLUS") && !uids.is_empty() {
            self.simple_command(&format!("UID EXPUNGE {}", uid_set(uids)))
                .await
        } else {
            self.simple_command("EXPUNGE").await
        }
    }

    /// APPEND a complete message to a folder.
    pub async fn append(
        &mut self,
        folder: &str,
        flags: &str,
        message: &[u8],
    ) -> Result<(), ImapError> {
        let tag = self.next_tag();
        let flags_part = if flags.is_empty() {
            String::new()
        } else {
            format!("({}) ", flags)
        };
        self.write_line(&format!(
            "{} APPEND {} {}{{{}}}",
            tag,
            quote_string(folder),
            flags_part,
            message.len()
        ))
        .await?;
        // wait for continuation
        loop {
            let line = self.read_line().await?;
            if line.starts_with('+') {
                break;
            }
            let parsed = parse_line(&line);
            if parsed.tag.as_deref() == Some(tag.as_str()) {
                return Err(ImapError::Protocol(parsed.raw));
            }
        }
        self.stream.write_all(message).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        let resp = self.read_until_tagged(&tag, &mut |_| {}).await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(())
    }

    pub async fn noop(&mut self) -> Result<(), ImapError> {
        self.simple_command("NOOP").await
    }

    pub async fn logout(&mut self) -> Result<(), ImapError> {
        self.simple_command("LOGOUT").await
    }

    /// Enter IDLE and wait for a server notification, a local wakeup, or the
    /// refresh deadline (keep below the RFC 2177 29-minute limit). Always
    /// terminates the IDLE with DONE before returning.
    pub async fn idle_wait(
        &mut self,
        wakeup: Arc<Notify>,
        refresh: Duration,
    ) -> Result<IdleEvent, ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} IDLE", tag)).await?;
        loop {
            let line = self.read_line().await?;
            if line.starts_with('+') {
                break;
            }
            let parsed = parse_line(&line);
            if parsed.tag.as_deref() == Some(tag.as_str()) {
                return Err(ImapError::Protocol(parsed.raw));
            }
        }

        let mut event = IdleEvent::Timeout;
        let deadline = tokio::time::sleep(refresh);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                line = read_line_on(&mut self.stream, &mut self.buf) => {
                    let line = line?;
                    if is_mailbox_change(&line) {
                        event = IdleEvent::MailboxChanged;
                        break;
                    }
                    // other untagged chatter (e.g. OK Still here) keeps waiting
                }
                _ = wakeup.notified() => {
                    event = IdleEvent::Wakeup;
                    break;
                }
                _ = &mut deadline => {
                    event = IdleEvent::Timeout;
                    break;
                }
            }
        }

        self.write_line("DONE").await?;
        let resp = self.read_until_tagged(&tag, &mut |line| {
            if is_mailbox_change(&line.raw) {
                event = IdleEvent::MailboxChanged;
            }
        })
        .await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(event)
    }

    async fn simple_command(&mut self, command: &str) -> Result<(), ImapError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} {}", tag, command)).await?;
        let resp = self.read_until_tagged(&tag, &mut |_| {}).await?;
        if resp.status != LineStatus::Ok {
            return Err(ImapError::Protocol(resp.raw));
        }
        Ok(())
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter = self.tag_counter.wrapping_add(1);
        format!("A{:04}", self.tag_counter % 10000)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ImapError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ImapError> {
        read_line_on(&mut self.stream, &mut self.buf).await
    }

    /// Read untagged lines (with any literals) until the tagged response,
    /// invoking `on_untagged` per line.
    async fn read_until_tagged(
        &mut self,
        tag: &str,
        on_untagged: &mut dyn FnMut(&ResponseLine),
    ) -> Result<ResponseLine, ImapError> {
        loop {
            let raw = self.read_line().await?;
            let mut parsed = parse_line(&raw);
            if let Some(size) = literal_size(&raw) {
                parsed.literal = Some(self.read_literal(size).await?);
            }
            if parsed.tag.as_deref() == Some(tag) {
                return Ok(parsed);
            }
            on_untagged(&parsed);
        }
    }

    async fn read_literal(&mut self, size: usize) -> Result<Vec<u8>, ImapError> {
        let mut out = Vec::with_capacity(size);
        while out.len() < size {
            if self.buf.is_empty() {
                fill_buf(&mut self.stream, &mut self.buf).await?;
            }
            let take = (size - out.len()).min(self.buf.len());
            out.extend_from_slice(&self.buf[..take]);
            self.buf.advance(take);
        }
        Ok(out)
    }
}

async fn fill_buf(stream: &mut MailStream, buf: &mut BytesMut) -> Result<(), ImapError> {
    let n = stream.read_buf(buf).await?;
    if n == 0 {
        return Err(ImapError::Transport("connection closed".to_string()));
    }
    Ok(())
}

async fn read_line_on(stream: &mut MailStream, buf: &mut BytesMut) -> Result<String, ImapError> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos + 2);
            let text = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
            return Ok(text);
        }
        fill_buf(stream, buf).await?;
    }
}

async fn write_line_on(stream: &mut MailStream, line: &str) -> Result<(), ImapError> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

fn parse_line(raw: &str) -> ResponseLine {
    let untagged = raw.starts_with('*');
    let (tag, rest) = if untagged {
        (None, raw.trim_start_matches('*').trim_start())
    } else {
        let mut sp = raw.splitn(2, ' ');
        let t = sp.next().unwrap_or("").to_string();
        (
            if t.is_empty() { None } else { Some(t) },
            sp.next().unwrap_or(""),
        )
    };
    let status = if rest.starts_with("OK") {
        LineStatus::Ok
    } else if rest.starts_with("NO") {
        LineStatus::No
    } else if rest.starts_with("BAD") {
        LineStatus::Bad
    } else {
        LineStatus::Other
    };
    ResponseLine {
        raw: raw.to_string(),
        tag,
        untagged,
        status,
        literal: None,
    }
}

/// Size of the literal announced by a trailing {N}, if any.
fn literal_size(line: &str) -> Option<usize> {
    let open = line.rfind('{')?;
    let rest = &line[open + 1..];
    let inner = rest.strip_suffix('}')?;
    inner.trim().parse().ok()
}

fn parse_capabilities(line: &str) -> Vec<String> {
    let source = if let Some(rest) = line.strip_prefix("* CAPABILITY ") {
        rest
    } else if let Some(start) = line.find("[CAPABILITY ") {
        let after = &line[start + 12..];
        after.split(']').next().unwrap_or("")
    } else {
        return Vec::new();
    };
    source
        .split_whitespace()
        .map(|w| w.to_uppercase())
        .collect()
}

fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn uid_set(uids: &BTreeSet<Uid>) -> String {
    // collapse consecutive uids into ranges: 1,2,3,7 -> 1:3,7
    let mut parts = Vec::new();
    let mut iter = uids.iter().copied();
    let mut start = match iter.next() {
        Some(u) => u,
        None => return String::new(),
    };
    let mut end = start;
    for uid in iter {
        if uid == end + 1 {
            end = uid;
        } else {
            parts.push(range_part(start, end));
            start = uid;
            end = uid;
        }
    }
    parts.push(range_part(start, end));
    parts.join(",")
}

fn range_part(start: Uid, end: Uid) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    }
}

fn is_fetch_line(line: &str) -> bool {
    line.starts_with('*') && line.contains(" FETCH (")
}

fn parse_fetch_uid(line: &str) -> Option<Uid> {
    let pos = line.find("UID ")?;
    let rest = &line[pos + 4..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn parse_fetch_flags(line: &str) -> Flags {
    let pos = match line.find("FLAGS (") {
        Some(p) => p,
        None => return Flags::default(),
    };
    let rest = &line[pos + 7..];
    let end = rest.find(')').unwrap_or(rest.len());
    let atoms: Vec<String> = rest[..end]
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    Flags::from_imap(&atoms)
}

fn apply_select_line(raw: &str, info: &mut SelectInfo) {
    let rest = match raw.strip_prefix("* ") {
        Some(r) => r.trim_start(),
        None => return,
    };
    if let Some(n) = rest.strip_suffix(" EXISTS") {
        if let Ok(n) = n.trim().parse() {
            info.exists = n;
        }
        return;
    }
    if let Some(start) = rest.find("[UIDVALIDITY ") {
        let after = &rest[start + 13..];
        if let Some(n) = after
            .split_whitespace()
            .next()
            .and_then(|s| s.trim_end_matches(']').parse().ok())
        {
            info.uid_validity = Some(n);
        }
        return;
    }
    if let Some(start) = rest.find("[UIDNEXT ") {
        let after = &rest[start + 9..];
        if let Some(n) = after
            .split_whitespace()
            .next()
            .and_then(|s| s.trim_end_matches(']').parse().ok())
        {
            info.uid_next = Some(n);
        }
    }
}

/// An untagged EXISTS, EXPUNGE, RECENT or FETCH during IDLE means the
/// selected mailbox changed.
fn is_mailbox_change(line: &str) -> bool {
    if !line.starts_with('*') {
        return false;
    }
    line.ends_with(" EXISTS")
        || line.ends_with(" EXPUNGE")
        || line.ends_with(" RECENT")
        || line.contains(" FETCH ")
        || line.contains(" FETCH (")
}

fn parse_list_line(raw: &str) -> Option<(Vec<String>, String)> {
    let rest = raw.strip_prefix("* LIST ")?.trim_start();
    if !rest.starts_with('(') {
        return None;
    }
    let close = rest.find(')')?;
    let attrs: Vec<String> = rest[1..close]
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let rest = rest[close + 1..].trim_start();
    // skip the hierarchy delimiter: quoted char or NIL
    let rest = if rest.starts_with('"') {
        let end = 1 + rest[1..].find('"')?;
        rest[end + 1..].trim_start()
    } else if rest.len() >= 3 && rest[..3].eq_ignore_ascii_case("NIL") {
        rest[3..].trim_start()
    } else {
        rest
    };
    let name = if let Some(quoted) = rest.strip_prefix('"') {
        let mut name = String::new();
        let mut escape = false;
        for c in quoted.chars() {
            if escape {
                name.push(c);
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                break;
            } else {
                name.push(c);
            }
        }
        name
    } else {
        rest.split_whitespace().next()?.to_string()
    };
    if name.is_empty() {
        None
    } else {
        Some((attrs, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_set_collapses_ranges() {
        let uids: BTreeSet<Uid> = [1, 2, 3, 7, 9, 10].into_iter().collect();
        assert_eq!(uid_set(&uids), "1:3,7,9:10");
        let single: BTreeSet<Uid> = [42].into_iter().collect();
        assert_eq!(uid_set(&single), "42");
    }

    #[test]
    fn parse_tagged_and_untagged() {
        let l = parse_line("* 23 EXISTS");
        assert!(l.untagged);
        assert_eq!(l.status, LineStatus::Other);
        let l = parse_line("A0001 OK SELECT completed");
        assert_eq!(l.tag.as_deref(), Some("A0001"));
        assert_eq!(l.status, LineStatus::Ok);
        let l = parse_line("A0002 NO [AUTHENTICATIONFAILED] nope");
        assert_eq!(l.status, LineStatus::No);
    }

    #[test]
    fn literal_size_parsing() {
        assert_eq!(
            literal_size("* 1 FETCH (UID 42 BODY[HEADER] {321}"),
            Some(321)
        );
        assert_eq!(literal_size("* 1 FETCH (UID 42 FLAGS (\\Seen))"), None);
    }

    #[test]
    fn capability_sources() {
        let caps = parse_capabilities("* OK [CAPABILITY IMAP4rev1 UIDPLUS MOVE IDLE] ready");
        assert!(caps.contains(&"UIDPLUS".to_string()));
        assert!(caps.contains(&"MOVE".to_string()));
        let caps = parse_capabilities("* CAPABILITY IMAP4rev1 AUTH=PLAIN STARTTLS");
        assert!(caps.contains(&"AUTH=PLAIN".to_string()));
    }

    #[test]
    fn select_lines() {
        let mut info = SelectInfo::default();
        apply_select_line("* 172 EXISTS", &mut info);
        apply_select_line("* OK [UIDVALIDITY 3857529045] UIDs valid", &mut info);
        apply_select_line("* OK [UIDNEXT 4392] Predicted next UID", &mut info);
        assert_eq!(info.exists, 172);
        assert_eq!(info.uid_validity, Some(3857529045));
        assert_eq!(info.uid_next, Some(4392));
    }

    #[test]
    fn fetch_line_parsing() {
        let line = "* 12 FETCH (UID 4827 FLAGS (\\Seen \\Answered))";
        assert!(is_fetch_line(line));
        assert_eq!(parse_fetch_uid(line), Some(4827));
        let flags = parse_fetch_flags(line);
        assert!(flags.is_seen());
        assert!(flags.is_answered());
        assert!(!flags.is_deleted());
    }

    #[test]
    fn list_line_parsing() {
        let (attrs, name) = parse_list_line("* LIST (\\HasNoChildren) \"/\" \"INBOX\"").unwrap();
        assert!(attrs.contains(&"\\HasNoChildren".to_string()));
        assert_eq!(name, "INBOX");
        let (_, name) =
            parse_list_line("* LIST (\\HasChildren) \"/\" \"Mail/Receipts 2024\"").unwrap();
        assert_eq!(name, "Mail/Receipts 2024");
        let (_, name) = parse_list_line("* LIST () NIL Drafts").unwrap();
        assert_eq!(name, "Drafts");
    }

    #[test]
    fn mailbox_change_lines() {
        assert!(is_mailbox_change("* 24 EXISTS"));
        assert!(is_mailbox_change("* 3 EXPUNGE"));
        assert!(is_mailbox_change("* 5 FETCH (FLAGS (\\Seen))"));
        assert!(!is_mailbox_change("* OK Still here"));
    }
}
