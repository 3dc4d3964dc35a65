/*
 * sortfilter.rs
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

//! Message list ordering. Each mode maps a message to a string sort key (or
//! filters it out), so the display projection is a plain ordered string map
//! and iteration order is the display order.

use chrono::{TimeZone, Utc};

use crate::model::{Flags, Header, Uid};

/// Sort and filter modes for the message list. Default is date descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortFilter {
    Default,
    DateAsc,
    DateDesc,
    NameAsc,
    NameDesc,
    SubjectAsc,
    SubjectDesc,
    UnseenAsc,
    UnseenDesc,
    AttachmentAsc,
    AttachmentDesc,
    UnseenOnly,
    AttachmentOnly,
    CurrentDateOnly,
    CurrentNameOnly,
    CurrentSubjectOnly,
}

impl Default for SortFilter {
    fn default() -> Self {
        SortFilter::Default
    }
}

impl SortFilter {
    /// Filter modes hide messages; sort modes only reorder.
    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            SortFilter::UnseenOnly
                | SortFilter::AttachmentOnly
                | SortFilter::CurrentDateOnly
                | SortFilter::CurrentNameOnly
                | SortFilter::CurrentSubjectOnly
        )
    }
}

/// Reference values of the currently highlighted message, for the
/// "current-..." filters.
#[derive(Debug, Clone, Default)]
pub struct CurrentRef {
    pub day: String,
    pub name: String,
    pub subject: String,
}

impl CurrentRef {
    pub fn from_header(header: &Header) -> Self {
        Self {
            day: day_of(header.timestamp),
            name: normalize(header.sender_name()),
            subject: normalize_subject(&header.subject),
        }
    }
}

fn day_of(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d").to_string(),
        _ => String::new(),
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Strip reply/forward prefixes so a thread sorts together.
fn normalize_subject(s: &str) -> String {
    let mut out = s.trim();
    loop {
        let lower = out.to_lowercase();
        let stripped = lower
            .strip_prefix("re:")
            .or_else(|| lower.strip_prefix("fwd:"))
            .or_else(|| lower.strip_prefix("fw:"));
        match stripped {
            Some(rest) => {
                out = &out[out.len() - rest.len()..];
                out = out.trim_start();
            }
            None => break,
        }
    }
    out.to_lowercase()
}

// fixed-width numeric components keep lexicographic order == numeric order
fn num_asc(n: i64) -> String {
    format!("{:016}", n.clamp(0, i64::MAX) as u64)
}

fn num_desc(n: i64) -> String {
    format!("{:016}", u64::MAX - n.clamp(0, i64::MAX) as u64)
}

fn uid_desc(uid: Uid) -> String {
    format!("{:010}", u32::MAX - uid)
}

fn uid_asc(uid: Uid) -> String {
    format!("{:010}", uid)
}

// hex-encode text (optionally byte-inverted for descending order) so the key
// stays valid UTF-8 whatever the input
fn text_key(s: &str, descending: bool) -> String {
    let lowered = s.to_lowercase();
    let bytes = lowered.as_bytes().iter().take(48);
    let mut out = String::with_capacity(96);
    for &b in bytes {
        let v = if descending { 255 - b } else { b };
        out.push_str(&format!("{:02x}", v));
    }
    // terminator orders shorter strings consistently
    out.push_str(if descending { "ff" } else { "00" });
    out
}

fn date_desc_tail(header: &Header, uid: Uid) -> String {
    format!("{}_{}", num_desc(header.timestamp), uid_desc(uid))
}

/// The display key for one message under a mode, or None when the mode
/// filters it out. Pure: the projection is fully determined by its inputs.
pub fn display_key(
    mode: SortFilter,
    header: &Header,
    flags: Flags,
    uid: Uid,
    current: Option<&CurrentRef>,
) -> Option<String> {
    let key = match mode {
        SortFilter::Default | SortFilter::DateDesc => date_desc_tail(header, uid),
        SortFilter::DateAsc => format!("{}_{}", num_asc(header.timestamp), uid_asc(uid)),
        SortFilter::NameAsc => format!(
            "{}_{}",
            text_key(header.sender_name(), false),
            date_desc_tail(header, uid)
        ),
        SortFilter::NameDesc => format!(
            "{}_{}",
            text_key(header.sender_name(), true),
            date_desc_tail(header, uid)
        ),
        SortFilter::SubjectAsc => format!(
            "{}_{}",
            text_key(&normalize_subject(&header.subject), false),
            date_desc_tail(header, uid)
        ),
        SortFilter::SubjectDesc => format!(
            "{}_{}",
            text_key(&normalize_subject(&header.subject), true),
            date_desc_tail(header, uid)
        ),
        SortFilter::UnseenAsc => format!(
            "{}_{}",
            if flags.is_seen() { '0' } else { '1' },
            date_desc_tail(header, uid)
        ),
        SortFilter::UnseenDesc => format!(
            "{}_{}",
            if flags.is_seen() { '1' } else { '0' },
            date_desc_tail(header, uid)
        ),
        SortFilter::AttachmentAsc => format!(
            "{}_{}",
            if header.has_attachments { '1' } else { '0' },
            date_desc_tail(header, uid)
        ),
        SortFilter::AttachmentDesc => format!(
            "{}_{}",
            if header.has_attachments { '0' } else { '1' },
            date_desc_tail(header, uid)
        ),
        SortFilter::UnseenOnly => {
            if flags.is_seen() {
                return None;
            }
            date_desc_tail(header, uid)
        }
        SortFilter::AttachmentOnly => {
            if !header.has_attachments {
                return None;
            }
            date_desc_tail(header, uid)
        }
        SortFilter::CurrentDateOnly => {
            let current = current?;
            if day_of(header.timestamp) != current.day {
                return None;
            }
            date_desc_tail(header, uid)
        }
        SortFilter::CurrentNameOnly => {
            let current = current?;
            if normalize(header.sender_name()) != current.name {
                return None;
            }
            date_desc_tail(header, uid)
        }
        SortFilter::CurrentSubjectOnly => {
            let current = current?;
            if normalize_subject(&header.subject) != current.subject {
                return None;
            }
            date_desc_tail(header, uid)
        }
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::parse_header;
    use std::collections::BTreeMap;

    fn header(from: &str, subject: &str, ts_hour: u32) -> Header {
        let raw = format!(
            "From: {}\r\nSubject: {}\r\nDate: Mon, 01 Jan 2024 {:02}:00:00 +0000\r\n\r\n",
            from, subject, ts_hour
        );
        parse_header(raw.as_bytes())
    }

    fn project(
        mode: SortFilter,
        items: &[(Uid, Header, Flags)],
        current: Option<&CurrentRef>,
    ) -> Vec<Uid> {
        let mut map = BTreeMap::new();
        for (uid, h, f) in items {
            if let Some(key) = display_key(mode, h, *f, *uid, current) {
                map.insert(key, *uid);
            }
        }
        map.into_values().collect()
    }

    #[test]
    fn default_is_newest_first() {
        let items = vec![
            (1, header("a@x", "one", 9), Flags::default()),
            (2, header("b@x", "two", 11), Flags::default()),
            (3, header("c@x", "three", 10), Flags::default()),
        ];
        assert_eq!(project(SortFilter::Default, &items, None), vec![2, 3, 1]);
        assert_eq!(project(SortFilter::DateAsc, &items, None), vec![1, 3, 2]);
    }

    #[test]
    fn same_timestamp_orders_by_uid_desc() {
        let items = vec![
            (5, header("a@x", "s", 9), Flags::default()),
            (9, header("b@x", "s", 9), Flags::default()),
        ];
        assert_eq!(project(SortFilter::Default, &items, None), vec![9, 5]);
    }

    #[test]
    fn name_sort_both_directions() {
        let items = vec![
            (1, header("zoe@x", "s", 9), Flags::default()),
            (2, header("adam@x", "s", 9), Flags::default()),
            (3, header("mia@x", "s", 9), Flags::default()),
        ];
        assert_eq!(project(SortFilter::NameAsc, &items, None), vec![2, 3, 1]);
        assert_eq!(project(SortFilter::NameDesc, &items, None), vec![1, 3, 2]);
    }

    #[test]
    fn unseen_only_filters() {
        let seen = Flags(Flags::SEEN);
        let items = vec![
            (1, header("a@x", "s", 9), seen),
            (2, header("b@x", "s", 10), Flags::default()),
        ];
        assert_eq!(project(SortFilter::UnseenOnly, &items, None), vec![2]);
        // no duplicates, size matches filter predicate
        assert_eq!(project(SortFilter::UnseenDesc, &items, None), vec![2, 1]);
    }

    #[test]
    fn subject_normalization_groups_replies() {
        assert_eq!(normalize_subject("Re: Fwd: Hello"), "hello");
        assert_eq!(normalize_subject("hello"), "hello");
        let a = header("a@x", "Re: Plans", 9);
        let b = header("b@x", "plans", 10);
        let current = CurrentRef::from_header(&a);
        let items = vec![
            (1, a, Flags::default()),
            (2, b, Flags::default()),
            (3, header("c@x", "other", 11), Flags::default()),
        ];
        assert_eq!(
            project(SortFilter::CurrentSubjectOnly, &items, Some(&current)),
            vec![2, 1]
        );
    }

    #[test]
    fn current_date_filter() {
        let current = CurrentRef::from_header(&header("a@x", "s", 9));
        let mut items = vec![
            (1, header("a@x", "s", 9), Flags::default()),
            (2, header("b@x", "s", 23), Flags::default()),
        ];
        // push one to another day
        let other = parse_header(
            b"From: c@x\r\nSubject: s\r\nDate: Tue, 02 Jan 2024 09:00:00 +0000\r\n\r\n",
        );
        items.push((3, other, Flags::default()));
        assert_eq!(
            project(SortFilter::CurrentDateOnly, &items, Some(&current)),
            vec![2, 1]
        );
    }

    #[test]
    fn attachment_modes() {
        let mut with_att = header("a@x", "s", 9);
        with_att.has_attachments = true;
        let items = vec![
            (1, with_att, Flags::default()),
            (2, header("b@x", "s", 10), Flags::default()),
        ];
        assert_eq!(project(SortFilter::AttachmentOnly, &items, None), vec![1]);
        assert_eq!(
            project(SortFilter::AttachmentDesc, &items, None),
            vec![1, 2]
        );
    }
}
