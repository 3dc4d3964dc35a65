/*
 * dot_stuffer.rs
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

//! DATA transparency (RFC 5321 §4.5.2): a line starting with '.' gets an
//! extra '.'; the terminator CRLF.CRLF is appended after ensuring the message
//! ends with CRLF.

/// Dot-stuff a complete message and append the DATA terminator.
pub fn stuff_and_terminate(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 8);
    let mut at_line_start = true;
    for &b in message {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_line_is_doubled() {
        assert_eq!(stuff_and_terminate(b".\r\n"), b"..\r\n.\r\n");
    }

    #[test]
    fn dot_mid_line_untouched() {
        assert_eq!(stuff_and_terminate(b"a.b\r\n"), b"a.b\r\n.\r\n");
    }

    #[test]
    fn dot_after_break_is_doubled() {
        assert_eq!(stuff_and_terminate(b"Hi\r\n.\r\nBye\r\n"), b"Hi\r\n..\r\nBye\r\n.\r\n");
    }

    #[test]
    fn missing_final_crlf_added() {
        assert_eq!(stuff_and_terminate(b"Hi"), b"Hi\r\n.\r\n");
    }

    #[test]
    fn leading_dot_on_first_line() {
        assert_eq!(stuff_and_terminate(b".start\r\n"), b"..start\r\n.\r\n");
    }

    #[test]
    fn empty_message() {
        assert_eq!(stuff_and_terminate(b""), b"\r\n.\r\n");
    }
}
