/*
 * rfc2047.rs
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

//! RFC 2047 encoded-words: decode `=?charset?B|Q?payload?=` in header values,
//! encode non-ASCII header text for compose (B-encoding, UTF-8).

use crate::mime::base64;
use crate::mime::quoted_printable;

/// Expand all encoded-words in a header value. Unknown charsets fall back to
/// lossy UTF-8. Whitespace between adjacent encoded-words is dropped per RFC.
pub fn decode_encoded_words(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    let mut last_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (literal, tail) = rest.split_at(start);
        match decode_one(tail) {
            Some((decoded, consumed)) => {
                if !(last_was_encoded && literal.chars().all(char::is_whitespace)) {
                    out.push_str(literal);
                }
                out.push_str(&decoded);
                rest = &tail[consumed..];
                last_was_encoded = true;
            }
            None => {
                out.push_str(literal);
                out.push_str("=?");
                rest = &tail[2..];
                last_was_encoded = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode one encoded-word at the start of `s` (which begins with "=?").
/// Returns (decoded, bytes consumed).
fn decode_one(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let q1 = inner.find('?')?;
    let charset = &inner[..q1];
    let after_charset = &inner[q1 + 1..];
    let mut chars = after_charset.chars();
    let encoding = chars.next()?;
    if !encoding.is_ascii() || chars.next()? != '?' {
        return None;
    }
    let encoding = encoding.to_ascii_lowercase();
    let payload_area = &after_charset[2..];
    let end = payload_area.find("?=")?;
    let payload = &payload_area[..end];
    let consumed = 2 + q1 + 1 + 2 + end + 2;

    let decoded_bytes = match encoding {
        'b' => base64::decode(payload.as_bytes()),
        'q' => quoted_printable::decode_q(payload.as_bytes()),
        _ => return None,
    };
    Some((charset_to_string(&decoded_bytes, charset), consumed))
}

/// Interpret bytes in the named charset. UTF-8 and ASCII directly; ISO-8859-1
/// and windows-1252 approximated byte-wise; anything else lossy UTF-8.
fn charset_to_string(bytes: &[u8], charset: &str) -> String {
    let cs = charset.to_ascii_lowercase();
    if cs == "utf-8" || cs == "us-ascii" || cs == "utf8" {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    if cs.starts_with("iso-8859-1") || cs == "windows-1252" || cs == "latin1" {
        return bytes.iter().map(|&b| b as char).collect();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Encode header text for the wire: ASCII passes through, otherwise one or
/// more B-encoded UTF-8 words, each within the 75-character word limit.
pub fn encode_header_value(s: &str) -> String {
    if s.is_ascii() {
        return s.to_string();
    }
    // 75 chars per word: "=?UTF-8?B?" + payload + "?=" leaves 63 base64 chars,
    // i.e. up to 45 input bytes; chunk on char boundaries below that.
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in s.chars() {
        if chunk.len() + c.len_utf8() > 45 {
            words.push(format!("=?UTF-8?B?{}?=", base64::encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", base64::encode(chunk.as_bytes())));
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_b_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?Y2Fmw6k=?="), "café");
    }

    #[test]
    fn decode_q_word() {
        assert_eq!(
            decode_encoded_words("=?utf-8?q?caf=C3=A9_au_lait?="),
            "café au lait"
        );
    }

    #[test]
    fn adjacent_words_drop_whitespace() {
        assert_eq!(
            decode_encoded_words("=?UTF-8?B?YWI=?= =?UTF-8?B?Y2Q=?="),
            "abcd"
        );
    }

    #[test]
    fn literal_text_preserved() {
        assert_eq!(decode_encoded_words("plain subject"), "plain subject");
        assert_eq!(
            decode_encoded_words("Re: =?UTF-8?B?aMOpbGxv?= there"),
            "Re: héllo there"
        );
    }

    #[test]
    fn encode_round_trip() {
        let s = "Överraskning på fredag";
        let enc = encode_header_value(s);
        assert!(enc.starts_with("=?UTF-8?B?"));
        assert_eq!(decode_encoded_words(&enc), s);
    }

    #[test]
    fn encode_ascii_passthrough() {
        assert_eq!(encode_header_value("hello"), "hello");
    }
}
