/*
 * compose.rs
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

//! Assemble an outgoing RFC 5322 / MIME message from compose fields.
//! Plain bodies go out as format=flowed (RFC 3676); non-ASCII header text is
//! RFC 2047 encoded; attachments are base64 parts under multipart/mixed.

use chrono::{Local, Utc};

use crate::mime::base64;
use crate::mime::flowed;
use crate::mime::rfc2047::encode_header_value;
use crate::model::Address;

const FLOWED_WIDTH: usize = 72;

/// One attachment for an outgoing message.
#[derive(Debug, Clone)]
pub struct ComposeAttachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Fields the compose screen hands to message assembly.
#[derive(Debug, Clone, Default)]
pub struct ComposeFields {
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub attachments: Vec<ComposeAttachment>,
}

impl ComposeFields {
    /// Envelope recipients: To + Cc + Bcc (Bcc is not written to the headers).
    pub fn recipients(&self) -> Vec<&Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter()).collect()
    }
}

/// Build the complete wire message. Generates Date and Message-ID.
pub fn build_message(fields: &ComposeFields) -> Vec<u8> {
    let mut out = Vec::with_capacity(1024 + fields.body.len());

    append_address_header(&mut out, "From", std::slice::from_ref(&fields.from));
    append_address_header(&mut out, "To", &fields.to);
    if !fields.cc.is_empty() {
        append_address_header(&mut out, "Cc", &fields.cc);
    }
    if !fields.subject.is_empty() {
        append_header(&mut out, "Subject", &encode_header_value(&fields.subject));
    }
    append_header(&mut out, "Date", &Local::now().to_rfc2822());
    append_header(&mut out, "Message-ID", &format!("<{}>", generate_message_id(&fields.from)));
    if let Some(ref irt) = fields.in_reply_to {
        append_header(&mut out, "In-Reply-To", &format!("<{}>", irt));
        let mut refs: Vec<String> = fields.references.clone();
        if !refs.iter().any(|r| r == irt) {
            refs.push(irt.clone());
        }
        let formatted: Vec<String> = refs.iter().map(|r| format!("<{}>", r)).collect();
        append_header(&mut out, "References", &formatted.join(" "));
    }
    append_header(&mut out, "MIME-Version", "1.0");

    if fields.attachments.is_empty() {
        append_text_part_headers(&mut out);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(flowed::encode(&fields.body, FLOWED_WIDTH).as_bytes());
    } else {
        let boundary = generate_boundary();
        append_header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", boundary),
        );
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        append_text_part_headers(&mut out);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(flowed::encode(&fields.body, FLOWED_WIDTH).as_bytes());
        for att in &fields.attachments {
            out.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
            append_attachment_part(&mut out, att);
        }
        out.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    }
    out
}

fn append_text_part_headers(out: &mut Vec<u8>) {
    append_header(out, "Content-Type", "text/plain; charset=utf-8; format=flowed");
    append_header(out, "Content-Transfer-Encoding", "8bit");
}

fn append_attachment_part(out: &mut Vec<u8>, att: &ComposeAttachment) {
    append_header(out, "Content-Type", &att.mime_type);
    append_header(
        out,
        "Content-Disposition",
        &format!(
            "attachment; filename=\"{}\"",
            att.filename.replace('\\', "\\\\").replace('"', "\\\"")
        ),
    );
    append_header(out, "Content-Transfer-Encoding", "base64");
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(base64::encode_wrapped(&att.data).as_bytes());
}

fn append_address_header(out: &mut Vec<u8>, name: &str, addrs: &[Address]) {
    if addrs.is_empty() {
        return;
    }
    let values: Vec<String> = addrs.iter().map(format_mailbox).collect();
    append_header(out, name, &values.join(", "));
}

fn format_mailbox(a: &Address) -> String {
    match &a.display_name {
        Some(n) if !n.is_empty() => {
            let encoded = encode_header_value(n);
            if encoded == *n && n.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '.') {
                format!("{} <{}>", n, a.address)
            } else if encoded != *n {
                format!("{} <{}>", encoded, a.address)
            } else {
                format!("\"{}\" <{}>", n.replace('"', ""), a.address)
            }
        }
        _ => a.address.clone(),
    }
}

fn append_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn generate_message_id(from: &Address) -> String {
    let domain = from
        .address
        .rsplit('@')
        .next()
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    let mut rand = [0u8; 8];
    let _ = getrandom::getrandom(&mut rand);
    let unique: String = rand.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}.{}@{}", Utc::now().timestamp(), unique, domain)
}

fn generate_boundary() -> String {
    let mut rand = [0u8; 12];
    let _ = getrandom::getrandom(&mut rand);
    let unique: String = rand.iter().map(|b| format!("{:02x}", b)).collect();
    format!("=_lettera_{}", unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::parse_body;
    use crate::mime::parse_header;

    fn fields() -> ComposeFields {
        ComposeFields {
            from: Address::new(Some("Jane"), "jane@example.org"),
            to: vec![Address::new(None, "bob@example.net")],
            subject: "Hi".to_string(),
            body: "hello there".to_string(),
            ..ComposeFields::default()
        }
    }

    #[test]
    fn built_message_parses_back() {
        let raw = build_message(&fields());
        let h = parse_header(&raw);
        assert_eq!(h.subject, "Hi");
        assert_eq!(h.from[0].address, "jane@example.org");
        assert_eq!(h.to[0].address, "bob@example.net");
        assert!(h.message_id.is_some());
        let b = parse_body(&raw, false);
        assert!(b.format_flowed);
        assert_eq!(b.text_plain.trim(), "hello there");
    }

    #[test]
    fn bcc_not_in_headers() {
        let mut f = fields();
        f.bcc = vec![Address::new(None, "secret@example.org")];
        let raw = build_message(&f);
        let text = String::from_utf8_lossy(&raw);
        assert!(!text.contains("secret@example.org"));
        assert_eq!(f.recipients().len(), 2);
    }

    #[test]
    fn reply_threading_headers() {
        let mut f = fields();
        f.in_reply_to = Some("orig@example.org".to_string());
        f.references = vec!["root@example.org".to_string()];
        let raw = build_message(&f);
        let h = parse_header(&raw);
        assert_eq!(h.in_reply_to.as_deref(), Some("orig@example.org"));
        assert_eq!(
            h.references,
            vec!["root@example.org".to_string(), "orig@example.org".to_string()]
        );
    }

    #[test]
    fn attachment_round_trip() {
        let mut f = fields();
        f.attachments = vec![ComposeAttachment {
            filename: "data.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            data: vec![0, 1, 2, 250, 251],
        }];
        let raw = build_message(&f);
        let b = parse_body(&raw, false);
        assert!(b.has_attachments());
        let att = b.parts.iter().find(|p| p.is_attachment()).unwrap();
        assert_eq!(att.filename.as_deref(), Some("data.bin"));
        assert_eq!(att.data, vec![0, 1, 2, 250, 251]);
    }
}
