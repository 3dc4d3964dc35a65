/*
 * body.rs
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

//! Walk a raw RFC 822 message into displayable text and a part list.
//! The first non-attachment text/plain part becomes the plain body; the first
//! text/html part is kept raw and only reduced to text when HTML processing
//! is requested (the terminal renderer owns real HTML conversion; the
//! reduction here feeds search indexing and preview).

use std::collections::HashMap;

use crate::mime::flowed;
use crate::mime::headers::{find_header_end, parse_header_fields, HeaderField};
use crate::mime::quoted_printable;
use crate::mime::rfc2047::decode_encoded_words;
use crate::mime::base64;
use crate::model::{Body, Part};

/// Parse a raw message into a Body. When `process_html` is set and the message
/// has no plain part, the HTML part is reduced to text and `html_parsed` set.
pub fn parse_body(raw: &[u8], process_html: bool) -> Body {
    let mut body = Body {
        raw: raw.to_vec(),
        ..Body::default()
    };
    let mut index = 0u32;
    walk_entity(raw, &mut body, &mut index, 0);

    if body.text_plain.is_empty() && !body.text_html.is_empty() && process_html {
        body.text_plain = html_to_text(&body.text_html);
        body.html_parsed = true;
    }
    body
}

const MAX_MIME_DEPTH: usize = 16;

fn walk_entity(entity: &[u8], body: &mut Body, index: &mut u32, depth: usize) {
    if depth > MAX_MIME_DEPTH {
        return;
    }
    let header_end = find_header_end(entity);
    let fields = parse_header_fields(&entity[..header_end]);
    let content = strip_separator(&entity[header_end..]);

    let ct_value = field_value(&fields, "Content-Type").unwrap_or("text/plain");
    let (mime_type, params) = parse_content_type(ct_value);

    if mime_type.starts_with("multipart/") {
        if let Some(boundary) = params.get("boundary") {
            for sub in split_multipart(content, boundary) {
                walk_entity(sub, body, index, depth + 1);
            }
        }
        return;
    }
    if mime_type == "message/rfc822" {
        walk_entity(content, body, index, depth + 1);
        return;
    }

    let cte = field_value(&fields, "Content-Transfer-Encoding")
        .unwrap_or("7bit")
        .trim()
        .to_ascii_lowercase();
    let data = decode_transfer(content, &cte);
    let filename = part_filename(&fields, &params);
    let content_id = field_value(&fields, "Content-ID")
        .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string());
    let charset = params
        .get("charset")
        .cloned()
        .unwrap_or_else(|| "utf-8".to_string());

    let is_attachment = filename.is_some();
    if !is_attachment && mime_type == "text/plain" && body.text_plain.is_empty() {
        let text = decode_charset(&data, &charset);
        let is_flowed = params
            .get("format")
            .map(|f| f.eq_ignore_ascii_case("flowed"))
            .unwrap_or(false);
        body.format_flowed = is_flowed;
        body.text_plain = if is_flowed {
            let delsp = params
                .get("delsp")
                .map(|d| d.eq_ignore_ascii_case("yes"))
                .unwrap_or(false);
            flowed::decode(&text, delsp)
        } else {
            text
        };
    } else if !is_attachment && mime_type == "text/html" && body.text_html.is_empty() {
        body.text_html = decode_charset(&data, &charset);
    }

    body.parts.push(Part {
        index: *index,
        mime_type: mime_type.to_string(),
        filename,
        content_id,
        size: data.len(),
        data,
    });
    *index += 1;
}

fn field_value<'a>(fields: &'a [HeaderField], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| f.value.as_str())
}

/// Drop the blank separator line left at the start of the content slice.
fn strip_separator(content: &[u8]) -> &[u8] {
    if content.starts_with(b"\r\n") {
        &content[2..]
    } else if content.starts_with(b"\n") {
        &content[1..]
    } else {
        content
    }
}

/// Parse `type/subtype; key=value; ...` into lowercase type and params.
pub fn parse_content_type(value: &str) -> (String, HashMap<String, String>) {
    let mut parts = value.split(';');
    let mime_type = parts
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let mut params = HashMap::new();
    for p in parts {
        if let Some(eq) = p.find('=') {
            let key = p[..eq].trim().to_ascii_lowercase();
            let val = p[eq + 1..].trim().trim_matches('"').to_string();
            params.insert(key, val);
        }
    }
    (mime_type, params)
}

fn part_filename(fields: &[HeaderField], ct_params: &HashMap<String, String>) -> Option<String> {
    if let Some(cd) = field_value(fields, "Content-Disposition") {
        let (disp, params) = parse_content_type(cd);
        if let Some(name) = params.get("filename") {
            return Some(decode_encoded_words(name));
        }
        if disp == "attachment" {
            return ct_params
                .get("name")
                .map(|n| decode_encoded_words(n))
                .or_else(|| Some(String::from("attachment")));
        }
    }
    ct_params.get("name").map(|n| decode_encoded_words(n))
}

fn decode_transfer(content: &[u8], cte: &str) -> Vec<u8> {
    match cte {
        "base64" => base64::decode(content),
        "quoted-printable" => quoted_printable::decode(content),
        _ => content.to_vec(),
    }
}

fn decode_charset(data: &[u8], charset: &str) -> String {
    let cs = charset.to_ascii_lowercase();
    if cs.starts_with("iso-8859-1") || cs == "windows-1252" || cs == "latin1" {
        return data.iter().map(|&b| b as char).collect();
    }
    String::from_utf8_lossy(data).into_owned()
}

/// Split multipart content on `--boundary` delimiter lines. The preamble and
/// epilogue are discarded per RFC 2046.
fn split_multipart<'a>(content: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delim = format!("--{}", boundary);
    let close = format!("--{}--", boundary);
    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut pos = 0;

    while pos <= content.len() {
        let line_end = content[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| pos + p + 1)
            .unwrap_or(content.len() + 1);
        let line_slice = &content[pos..line_end.min(content.len())];
        let line = std::str::from_utf8(line_slice)
            .unwrap_or("")
            .trim_end();
        let is_close = line == close;
        if line == delim || is_close {
            if let Some(start) = current_start {
                // trim trailing CRLF that belongs to the delimiter
                let mut end = pos;
                if end >= 2 && &content[end - 2..end] == b"\r\n" {
                    end -= 2;
                } else if end >= 1 && content[end - 1] == b'\n' {
                    end -= 1;
                }
                parts.push(&content[start..end]);
            }
            if is_close {
                break;
            }
            current_start = Some(line_end.min(content.len()));
        }
        if line_end > content.len() {
            break;
        }
        pos = line_end;
    }
    parts
}

/// Minimal tag-stripping reduction of HTML to text, for indexing and preview.
/// Real rendering is the terminal layer's concern.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    let mut skip_content = false;
    let mut chars = html.chars().peekable();
    while let Some(c) = chars.next() {
        if in_tag {
            if c == '>' {
                in_tag = false;
                let t = tag.trim_start_matches('/').to_ascii_lowercase();
                let name: String = t.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
                if name == "script" || name == "style" {
                    skip_content = !tag.starts_with('/');
                }
                if matches!(name.as_str(), "br" | "p" | "div" | "tr" | "li" | "h1" | "h2" | "h3") {
                    out.push('\n');
                }
                tag.clear();
            } else {
                tag.push(c);
            }
            continue;
        }
        if c == '<' {
            in_tag = true;
            continue;
        }
        if skip_content {
            continue;
        }
        if c == '&' {
            let mut entity = String::new();
            while let Some(&n) = chars.peek() {
                if n == ';' || entity.len() > 8 {
                    chars.next();
                    break;
                }
                entity.push(n);
                chars.next();
            }
            out.push_str(match entity.as_str() {
                "amp" => "&",
                "lt" => "<",
                "gt" => ">",
                "quot" => "\"",
                "apos" => "'",
                "nbsp" => " ",
                _ => "",
            });
            continue;
        }
        out.push(c);
    }
    // collapse runs of blank lines
    let mut cleaned = String::with_capacity(out.len());
    let mut blank = 0;
    for line in out.lines() {
        if line.trim().is_empty() {
            blank += 1;
            if blank > 1 {
                continue;
            }
        } else {
            blank = 0;
        }
        cleaned.push_str(line.trim_end());
        cleaned.push('\n');
    }
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_plain_message() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\n\r\nhello body\r\n";
        let b = parse_body(raw, false);
        assert_eq!(b.text_plain.trim(), "hello body");
        assert!(!b.format_flowed);
        assert_eq!(b.parts.len(), 1);
        assert!(!b.has_attachments());
    }

    #[test]
    fn flowed_plain_message() {
        let raw = b"Content-Type: text/plain; format=flowed\r\n\r\nfirst \r\nsecond\r\n";
        let b = parse_body(raw, false);
        assert!(b.format_flowed);
        assert_eq!(b.text_plain.trim(), "first second");
    }

    #[test]
    fn multipart_with_attachment() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"XX\"\r\n\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\r\n\
the text\r\n\
--XX\r\n\
Content-Type: application/pdf; name=\"doc.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\r\n\
aGVsbG8=\r\n\
--XX--\r\n";
        let b = parse_body(raw, false);
        assert_eq!(b.text_plain.trim(), "the text");
        assert!(b.has_attachments());
        let att = b.parts.iter().find(|p| p.is_attachment()).unwrap();
        assert_eq!(att.filename.as_deref(), Some("doc.pdf"));
        assert_eq!(att.data, b"hello");
    }

    #[test]
    fn multipart_alternative_prefers_plain() {
        let raw = b"Content-Type: multipart/alternative; boundary=YY\r\n\r\n\
--YY\r\n\
Content-Type: text/plain\r\n\r\n\
plain version\r\n\
--YY\r\n\
Content-Type: text/html\r\n\r\n\
<p>html version</p>\r\n\
--YY--\r\n";
        let b = parse_body(raw, false);
        assert_eq!(b.text_plain.trim(), "plain version");
        assert!(b.text_html.contains("html version"));
        assert!(!b.html_parsed);
    }

    #[test]
    fn html_only_processed_on_request() {
        let raw = b"Content-Type: text/html\r\n\r\n<p>Hi &amp; bye</p>\r\n";
        let unprocessed = parse_body(raw, false);
        assert!(unprocessed.text_plain.is_empty());
        let processed = parse_body(raw, true);
        assert!(processed.html_parsed);
        assert_eq!(processed.text_plain.trim(), "Hi & bye");
    }

    #[test]
    fn quoted_printable_body() {
        let raw =
            b"Content-Type: text/plain\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\ncaf=C3=A9\r\n";
        let b = parse_body(raw, false);
        assert_eq!(b.text_plain.trim(), "café");
    }
}
