/*
 * headers.rs
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

//! RFC 5322 header parsing: unfold fields, decode encoded words, split
//! address lists, parse dates. The envelope keeps the raw header bytes so
//! serialising a parsed Header is the identity.

use crate::mime::rfc2047::decode_encoded_words;
use crate::model::{Address, Header};

/// One unfolded header field.
#[derive(Debug, Clone)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Split the header block (up to the first empty line) into unfolded fields.
/// Accepts both CRLF and bare LF line endings.
pub fn parse_header_fields(raw: &[u8]) -> Vec<HeaderField> {
    let text = String::from_utf8_lossy(raw);
    let mut fields: Vec<HeaderField> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // continuation of the previous field
            if let Some(last) = fields.last_mut() {
                last.value.push(' ');
                last.value.push_str(line.trim());
            }
            continue;
        }
        if let Some(colon) = line.find(':') {
            fields.push(HeaderField {
                name: line[..colon].trim().to_string(),
                value: line[colon + 1..].trim().to_string(),
            });
        }
    }
    fields
}

fn field<'a>(fields: &'a [HeaderField], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| f.value.as_str())
}

/// Parse an envelope from a raw header block (or full message). The result
/// keeps `raw` verbatim.
pub fn parse_header(raw: &[u8]) -> Header {
    let header_end = find_header_end(raw);
    let head = &raw[..header_end];
    let fields = parse_header_fields(head);

    let date_text = field(&fields, "Date").unwrap_or("").to_string();
    let timestamp = parse_date(&date_text);

    let content_type = field(&fields, "Content-Type").unwrap_or("");
    let has_attachments = content_type
        .to_ascii_lowercase()
        .starts_with("multipart/mixed");

    Header {
        message_id: field(&fields, "Message-ID").map(strip_angle),
        in_reply_to: field(&fields, "In-Reply-To").map(strip_angle),
        references: field(&fields, "References")
            .map(parse_msgid_list)
            .unwrap_or_default(),
        timestamp,
        date_text,
        from: parse_address_list(field(&fields, "From").unwrap_or("")),
        reply_to: parse_address_list(field(&fields, "Reply-To").unwrap_or("")),
        to: parse_address_list(field(&fields, "To").unwrap_or("")),
        cc: parse_address_list(field(&fields, "Cc").unwrap_or("")),
        bcc: parse_address_list(field(&fields, "Bcc").unwrap_or("")),
        subject: decode_encoded_words(field(&fields, "Subject").unwrap_or("")),
        has_attachments,
        raw: head.to_vec(),
    }
}

/// Offset of the end of the header block (start of the blank separator line),
/// or the full length if no separator is present.
pub fn find_header_end(raw: &[u8]) -> usize {
    if let Some(p) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return p + 2;
    }
    if let Some(p) = raw.windows(2).position(|w| w == b"\n\n") {
        return p + 1;
    }
    raw.len()
}

fn strip_angle(s: &str) -> String {
    s.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

fn parse_msgid_list(s: &str) -> Vec<String> {
    s.split_whitespace()
        .map(strip_angle)
        .filter(|m| !m.is_empty())
        .collect()
}

fn parse_date(s: &str) -> i64 {
    if s.is_empty() {
        return 0;
    }
    // RFC 2822 with optional "(TZ)" comment tail.
    let trimmed = match s.find('(') {
        Some(p) => s[..p].trim(),
        None => s.trim(),
    };
    chrono::DateTime::parse_from_rfc2822(trimmed)
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Split a header address list on top-level commas (quotes and angle brackets
/// protect embedded commas), then parse each mailbox.
pub fn parse_address_list(s: &str) -> Vec<Address> {
    let decoded = decode_encoded_words(s);
    let mut out = Vec::new();
    let mut depth_angle = 0i32;
    let mut in_quote = false;
    let mut start = 0;
    let bytes = decoded.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quote = !in_quote,
            b'<' if !in_quote => depth_angle += 1,
            b'>' if !in_quote => depth_angle -= 1,
            b',' if !in_quote && depth_angle == 0 => {
                if let Some(a) = parse_mailbox(&decoded[start..i]) {
                    out.push(a);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if let Some(a) = parse_mailbox(&decoded[start..]) {
        out.push(a);
    }
    out
}

/// Parse one mailbox: `Name <addr>`, `"Name" <addr>`, `addr (Name)` or `addr`.
fn parse_mailbox(s: &str) -> Option<Address> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(open) = s.rfind('<') {
        let close = s[open..].find('>').map(|p| open + p)?;
        let addr = s[open + 1..close].trim();
        if addr.is_empty() {
            return None;
        }
        let name = s[..open].trim().trim_matches('"').trim();
        return Some(Address::new(
            if name.is_empty() { None } else { Some(name) },
            addr,
        ));
    }
    if let Some(open) = s.find('(') {
        let addr = s[..open].trim();
        let name = s[open + 1..].trim_end_matches(')').trim();
        if addr.is_empty() {
            return None;
        }
        return Some(Address::new(
            if name.is_empty() { None } else { Some(name) },
            addr,
        ));
    }
    Some(Address::new(None, s))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"Message-ID: <abc@example.org>\r\n\
From: \"Jane Doe\" <jane@example.org>\r\n\
To: bob@example.net, Carol <carol@example.com>\r\n\
Subject: =?UTF-8?B?aMOpbGxv?=\r\n\
Date: Mon, 01 Jan 2024 10:00:00 +0000\r\n\
References: <a@x> <b@y>\r\n\
\r\n\
body text\r\n";

    #[test]
    fn parses_envelope() {
        let h = parse_header(RAW);
        assert_eq!(h.message_id.as_deref(), Some("abc@example.org"));
        assert_eq!(h.from.len(), 1);
        assert_eq!(h.from[0].display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(h.from[0].address, "jane@example.org");
        assert_eq!(h.to.len(), 2);
        assert_eq!(h.to[0].address, "bob@example.net");
        assert_eq!(h.to[1].display_name.as_deref(), Some("Carol"));
        assert_eq!(h.subject, "héllo");
        assert_eq!(h.references, vec!["a@x".to_string(), "b@y".to_string()]);
        assert_eq!(h.timestamp, 1704103200);
    }

    #[test]
    fn raw_round_trip() {
        let h = parse_header(RAW);
        let again = parse_header(&h.raw);
        assert_eq!(again.message_id, h.message_id);
        assert_eq!(again.subject, h.subject);
        assert_eq!(again.timestamp, h.timestamp);
        assert_eq!(again.raw, h.raw);
    }

    #[test]
    fn folded_field_unfolds() {
        let raw = b"Subject: part one\r\n part two\r\n\r\n";
        let h = parse_header(raw);
        assert_eq!(h.subject, "part one part two");
    }

    #[test]
    fn address_list_with_quoted_comma() {
        let list = parse_address_list("\"Doe, Jane\" <jane@example.org>, bob@example.net");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name.as_deref(), Some("Doe, Jane"));
        assert_eq!(list[1].address, "bob@example.net");
    }

    #[test]
    fn date_with_tz_comment() {
        assert_eq!(
            parse_date("Mon, 01 Jan 2024 10:00:00 +0000 (UTC)"),
            1704103200
        );
    }
}
