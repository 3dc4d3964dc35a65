/*
 * flowed.rs
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

//! Format=flowed (RFC 3676): a trailing space marks a soft line break.
//! Decode joins flowed lines; encode soft-wraps outgoing paragraphs.

/// Join flowed lines. Quote prefixes (`>`) must match for lines to join;
/// space-stuffed lines are unstuffed. `delsp` removes the soft-break space.
pub fn decode(text: &str, delsp: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut flowing = false;
    let mut current_quote = 0usize;

    for line in text.lines() {
        let (quote_depth, rest) = split_quote_prefix(line);
        // unstuff
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        let is_signature_sep = rest == "--" || rest == "-- ";
        let flowed_line = rest.ends_with(' ') && !is_signature_sep;

        let content = if flowed_line && delsp {
            &rest[..rest.len() - 1]
        } else {
            rest
        };

        if flowing && quote_depth == current_quote {
            out.push_str(content);
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            for _ in 0..quote_depth {
                out.push('>');
            }
            if quote_depth > 0 {
                out.push(' ');
            }
            out.push_str(content);
        }
        flowing = flowed_line;
        current_quote = quote_depth;
    }
    out
}

fn split_quote_prefix(line: &str) -> (usize, &str) {
    let mut depth = 0;
    let mut rest = line;
    while let Some(r) = rest.strip_prefix('>') {
        depth += 1;
        rest = r;
    }
    (depth, rest)
}

/// Soft-wrap paragraphs at `width` columns with trailing-space soft breaks.
/// Existing hard breaks are kept; lines starting with `>` or `From ` are
/// space-stuffed per RFC 3676.
pub fn encode(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / width * 2);
    for line in text.lines() {
        if line.len() <= width {
            push_stuffed(&mut out, line);
            out.push_str("\r\n");
            continue;
        }
        let mut remaining = line;
        while remaining.len() > width {
            // break at the last space at or before width
            let cut = remaining[..=floor_char_boundary(remaining, width)]
                .rfind(' ')
                .unwrap_or(0);
            if cut == 0 {
                break;
            }
            push_stuffed(&mut out, &remaining[..=cut]);
            out.push_str("\r\n");
            remaining = &remaining[cut + 1..];
        }
        push_stuffed(&mut out, remaining);
        out.push_str("\r\n");
    }
    out
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len() - 1;
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn push_stuffed(out: &mut String, line: &str) {
    if line.starts_with('>') || line.starts_with(' ') || line.starts_with("From ") {
        out.push(' ');
    }
    out.push_str(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_flowed_lines() {
        assert_eq!(decode("one \ntwo \nthree", false), "one two three");
    }

    #[test]
    fn hard_break_preserved() {
        assert_eq!(decode("one\ntwo", false), "one\ntwo");
    }

    #[test]
    fn delsp_removes_break_space() {
        assert_eq!(decode("on \ne", true), "one");
    }

    #[test]
    fn signature_separator_not_flowed() {
        assert_eq!(decode("-- \nsig", false), "-- \nsig");
    }

    #[test]
    fn quote_depth_change_breaks_flow() {
        assert_eq!(decode("> quoted \nunquoted", false), "> quoted\nunquoted");
    }

    #[test]
    fn encode_wraps_long_lines() {
        let text = "aaaa bbbb cccc dddd eeee";
        let enc = encode(text, 10);
        for line in enc.lines() {
            assert!(line.len() <= 11);
        }
        assert_eq!(decode(&enc.replace("\r\n", "\n"), false), text);
    }

    #[test]
    fn encode_stuffs_quote_lines() {
        let enc = encode("> hi", 72);
        assert!(enc.starts_with(" > hi"));
    }
}
