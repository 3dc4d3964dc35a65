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

//! MIME support: header/envelope parsing, RFC 2047 encoded words, body part
//! extraction, format=flowed (RFC 3676) and outgoing message assembly.
//! Parsers degrade on malformed input instead of erroring; the server copy
//! stays authoritative.

pub mod base64;
mod body;
mod compose;
pub mod flowed;
mod headers;
pub mod quoted_printable;
pub mod rfc2047;

pub use body::parse_body;
pub use compose::{build_message, ComposeAttachment, ComposeFields};
pub use headers::{parse_header, parse_header_fields, HeaderField};
