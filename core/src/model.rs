/*
 * model.rs
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

//! Engine data model: headers, flags, bodies, and the request/action/response
//! payloads exchanged between the controller and the managers.

use std::collections::{BTreeMap, BTreeSet};

/// Server-assigned per-folder message identifier, stable within a UIDVALIDITY epoch.
pub type Uid = u32;

/// Message flag bits (IMAP system flags the engine cares about).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(pub u32);

impl Flags {
    pub const SEEN: u32 = 1 << 0;
    pub const ANSWERED: u32 = 1 << 1;
    pub const FLAGGED: u32 = 1 << 2;
    pub const DELETED: u32 = 1 << 3;
    pub const DRAFT: u32 = 1 << 4;

    pub fn is_seen(&self) -> bool {
        self.0 & Self::SEEN != 0
    }

    pub fn set_seen(&mut self, seen: bool) {
        if seen {
            self.0 |= Self::SEEN;
        } else {
            self.0 &= !Self::SEEN;
        }
    }

    pub fn is_answered(&self) -> bool {
        self.0 & Self::ANSWERED != 0
    }

    pub fn is_flagged(&self) -> bool {
        self.0 & Self::FLAGGED != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.0 & Self::DELETED != 0
    }

    pub fn is_draft(&self) -> bool {
        self.0 & Self::DRAFT != 0
    }

    /// Parse from IMAP flag atoms as returned by FETCH (FLAGS ...).
    pub fn from_imap(atoms: &[String]) -> Self {
        let mut bits = 0;
        for atom in atoms {
            match atom.trim_start_matches('\\').to_ascii_uppercase().as_str() {
                "SEEN" => bits |= Self::SEEN,
                "ANSWERED" => bits |= Self::ANSWERED,
                "FLAGGED" => bits |= Self::FLAGGED,
                "DELETED" => bits |= Self::DELETED,
                "DRAFT" => bits |= Self::DRAFT,
                _ => {}
            }
        }
        Flags(bits)
    }
}

/// Display name plus addr-spec, e.g. `Jane Doe <jane@example.org>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub display_name: Option<String>,
    pub address: String,
}

impl Address {
    pub fn new(display_name: Option<&str>, address: &str) -> Self {
        Self {
            display_name: display_name.map(|s| s.to_string()),
            address: address.to_string(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.display_name {
            Some(n) => write!(f, "{} <{}>", n, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Parsed envelope of one message. `raw` is the header block as fetched; the
/// serialised form of a Header is its raw text, so parse/serialise round-trips.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    /// Unix timestamp parsed from the Date header (0 if absent or unparsable).
    pub timestamp: i64,
    /// Verbatim RFC-822 date string.
    pub date_text: String,
    pub from: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: String,
    pub has_attachments: bool,
    pub raw: Vec<u8>,
}

impl Header {
    /// First From address, for list display and sort keys.
    pub fn from_first(&self) -> Option<&Address> {
        self.from.first()
    }

    /// Short display name for the sender: display name if present, else addr-spec.
    pub fn sender_name(&self) -> &str {
        match self.from.first() {
            Some(a) => a.display_name.as_deref().unwrap_or(&a.address),
            None => "",
        }
    }

    /// All addresses mentioned in From/Reply-To/To/Cc/Bcc, for address harvesting.
    pub fn all_addresses(&self) -> Vec<&Address> {
        self.from
            .iter()
            .chain(self.reply_to.iter())
            .chain(self.to.iter())
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .collect()
    }
}

/// One decoded MIME part of a body.
#[derive(Debug, Clone, Default)]
pub struct Part {
    pub index: u32,
    pub mime_type: String,
    pub filename: Option<String>,
    pub content_id: Option<String>,
    pub size: usize,
    pub data: Vec<u8>,
}

impl Part {
    pub fn is_attachment(&self) -> bool {
        self.filename.is_some()
    }
}

/// Raw RFC-822 payload plus derived views. `text_html` is only populated once
/// HTML processing has run; `html_parsed` records that it has.
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub raw: Vec<u8>,
    pub text_plain: String,
    pub text_html: String,
    pub parts: Vec<Part>,
    pub format_flowed: bool,
    pub html_parsed: bool,
}

impl Body {
    pub fn has_attachments(&self) -> bool {
        self.parts.iter().any(|p| p.is_attachment())
    }
}

/// How aggressively the prefetch worker walks the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrefetchLevel {
    None = 0,
    CurrentMessage = 1,
    CurrentView = 2,
    FullSync = 3,
}

impl PrefetchLevel {
    pub fn from_config(n: u32) -> Self {
        match n {
            0 => PrefetchLevel::None,
            1 => PrefetchLevel::CurrentMessage,
            2 => PrefetchLevel::CurrentView,
            _ => PrefetchLevel::FullSync,
        }
    }
}

impl Default for PrefetchLevel {
    fn default() -> Self {
        PrefetchLevel::None
    }
}

/// Per-operation failure bits carried by a Response.
pub mod response_status {
    pub const OK: u32 = 0;
    pub const GET_FOLDERS_FAILED: u32 = 1 << 0;
    pub const GET_UIDS_FAILED: u32 = 1 << 1;
    pub const GET_HEADERS_FAILED: u32 = 1 << 2;
    pub const GET_FLAGS_FAILED: u32 = 1 << 3;
    pub const GET_BODIES_FAILED: u32 = 1 << 4;
    pub const LOGIN_FAILED: u32 = 1 << 5;
}

/// Read-only query serviced by an IMAP worker.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub prefetch_level: PrefetchLevel,
    pub folder: String,
    pub get_folders: bool,
    pub get_uids: bool,
    pub process_html: bool,
    pub get_headers: BTreeSet<Uid>,
    pub get_flags: BTreeSet<Uid>,
    pub get_bodies: BTreeSet<Uid>,
    pub try_count: u32,
}

impl Request {
    pub fn is_empty(&self) -> bool {
        !self.get_folders
            && !self.get_uids
            && self.get_headers.is_empty()
            && self.get_flags.is_empty()
            && self.get_bodies.is_empty()
    }
}

/// Mutation serviced by the foreground IMAP worker.
#[derive(Debug, Clone, Default)]
pub struct Action {
    pub folder: String,
    pub uids: BTreeSet<Uid>,
    pub set_seen: bool,
    pub set_unseen: bool,
    pub upload_draft: bool,
    pub upload_message: bool,
    pub delete_permanently: bool,
    pub update_cache_only: bool,
    pub move_destination: String,
    /// Complete RFC-822 payload for upload actions.
    pub msg: String,
    /// Derived bodies to persist for update-cache-only actions.
    pub set_bodies_cache: BTreeMap<Uid, Body>,
    pub try_count: u32,
}

impl Action {
    pub fn is_move(&self) -> bool {
        !self.move_destination.is_empty()
    }
}

/// Mirrors the request's output fields; `status` carries per-field failure bits.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u32,
    pub folder: String,
    pub cached: bool,
    pub folders: BTreeSet<String>,
    pub uids: BTreeSet<Uid>,
    pub headers: BTreeMap<Uid, Header>,
    pub flags: BTreeMap<Uid, Flags>,
    pub bodies: BTreeMap<Uid, Body>,
}

/// Outcome of an Action.
#[derive(Debug, Clone, Copy)]
pub struct ActionResult {
    pub ok: bool,
}

/// Full-text query handed to the search worker.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub offset: usize,
    pub max: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, offset: usize, max: usize) -> Self {
        Self {
            query: query.into(),
            offset,
            max,
        }
    }
}

/// Ordered hits plus their headers; `has_more` signals another page exists.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub folder_uids: Vec<(String, Uid)>,
    pub headers: Vec<Header>,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_from_imap_atoms() {
        let atoms = vec!["\\Seen".to_string(), "\\Answered".to_string()];
        let f = Flags::from_imap(&atoms);
        assert!(f.is_seen());
        assert!(f.is_answered());
        assert!(!f.is_deleted());
    }

    #[test]
    fn flags_seen_toggle() {
        let mut f = Flags::default();
        f.set_seen(true);
        assert!(f.is_seen());
        f.set_seen(false);
        assert!(!f.is_seen());
    }

    #[test]
    fn prefetch_level_ordering() {
        assert!(PrefetchLevel::CurrentView < PrefetchLevel::FullSync);
        assert!(PrefetchLevel::None < PrefetchLevel::CurrentMessage);
        assert_eq!(PrefetchLevel::from_config(7), PrefetchLevel::FullSync);
    }

    #[test]
    fn address_display() {
        let a = Address::new(Some("Jane Doe"), "jane@example.org");
        assert_eq!(a.to_string(), "Jane Doe <jane@example.org>");
        let b = Address::new(None, "jane@example.org");
        assert_eq!(b.to_string(), "jane@example.org");
    }
}
