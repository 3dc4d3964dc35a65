/*
 * mod.rs
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

//! SASL client for the mechanisms the engine speaks: PLAIN, LOGIN, XOAUTH2.
//! PLAIN and XOAUTH2 are single-shot (initial response only); LOGIN answers
//! the Username:/Password: challenge pair.

mod mechanism;
mod plain;
mod xoauth2;

pub use mechanism::SaslMechanism;
pub use plain::encode_plain;
pub use xoauth2::xoauth2_initial_response;

#[derive(Debug)]
pub struct SaslError {
    pub message: String,
}

impl SaslError {
    pub fn invalid(msg: &str) -> Self {
        Self {
            message: msg.to_string(),
        }
    }
}

impl std::fmt::Display for SaslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SaslError {}

/// Build the initial client response for the given mechanism (raw, not yet
/// base64). LOGIN sends nothing initially and waits for challenges.
/// For XOAUTH2, `password` is the OAuth2 access token.
pub fn initial_client_response(
    mechanism: SaslMechanism,
    authcid: &str,
    password: &str,
) -> Vec<u8> {
    match mechanism {
        SaslMechanism::Plain => encode_plain("", authcid, password),
        SaslMechanism::Login => Vec::new(),
        SaslMechanism::XOAuth2 => xoauth2_initial_response(authcid, password),
    }
}

/// LOGIN: first challenge is "Username:", second is "Password:". Returns the
/// base64-encoded response for the wire.
pub fn login_respond_to_challenge(
    challenge_b64: &str,
    authcid: &str,
    password: &str,
) -> Result<Vec<u8>, SaslError> {
    let decoded = base64_decode(challenge_b64)?;
    let s = String::from_utf8_lossy(&decoded).to_lowercase();
    if s.contains("username") {
        Ok(base64_encode(authcid.as_bytes()))
    } else if s.contains("password") {
        Ok(base64_encode(password.as_bytes()))
    } else {
        Err(SaslError::invalid("unexpected LOGIN challenge"))
    }
}

pub fn base64_encode(b: &[u8]) -> Vec<u8> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = Vec::with_capacity((b.len() + 2) / 3 * 4);
    for chunk in b.chunks(3) {
        let n = (chunk[0] as usize) << 16
            | (chunk.get(1).copied().unwrap_or(0) as usize) << 8
            | chunk.get(2).copied().unwrap_or(0) as usize;
        out.push(ALPHABET[n >> 18]);
        out.push(ALPHABET[(n >> 12) & 63]);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) & 63]
        } else {
            b'='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n & 63]
        } else {
            b'='
        });
    }
    out
}

pub fn base64_decode(encoded: &str) -> Result<Vec<u8>, SaslError> {
    let encoded = encoded.trim();
    let mut out = Vec::with_capacity(encoded.len() * 3 / 4);
    let mut n = 0u32;
    let mut bits = 0u8;
    for b in encoded.bytes() {
        let v = match b {
            b'A'..=b'Z' => (b - b'A') as u32,
            b'a'..=b'z' => (b - b'a' + 26) as u32,
            b'0'..=b'9' => (b - b'0' + 52) as u32,
            b'+' => 62,
            b'/' => 63,
            b'=' => continue,
            _ => return Err(SaslError::invalid("invalid base64")),
        };
        n = (n << 6) | v;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((n >> bits) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let data = b"some arbitrary payload \x00\x01\x02";
        let enc = base64_encode(data);
        let dec = base64_decode(std::str::from_utf8(&enc).unwrap()).unwrap();
        assert_eq!(dec, data);
    }

    #[test]
    fn plain_initial_response() {
        let r = initial_client_response(SaslMechanism::Plain, "user", "secret");
        assert_eq!(r, b"\0user\0secret");
    }

    #[test]
    fn login_challenges() {
        let user_challenge = String::from_utf8(base64_encode(b"Username:")).unwrap();
        let r = login_respond_to_challenge(&user_challenge, "user", "secret").unwrap();
        assert_eq!(r, base64_encode(b"user"));
        let pass_challenge = String::from_utf8(base64_encode(b"Password:")).unwrap();
        let r = login_respond_to_challenge(&pass_challenge, "user", "secret").unwrap();
        assert_eq!(r, base64_encode(b"secret"));
    }
}
