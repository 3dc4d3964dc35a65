/*
 * addressbook.rs
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

//! Address harvesting: every processed message contributes its addresses,
//! keyed by message-id so a message is only counted once. Lookups filter by
//! substring and order by how often an address has been seen. A separate
//! multiset counts observed From addresses for sender selection.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::warn;

use crate::cache::crypto;
use crate::model::Address;

const BOOK_MAGIC: &str = "# lettera-addressbook v1";

pub struct AddressBook {
    path: PathBuf,
    password: Option<String>,
    msgids: HashSet<String>,
    addresses: HashMap<String, u32>,
    from_addresses: HashMap<String, u32>,
    dirty: bool,
}

impl AddressBook {
    /// Open (or create) the book at `path`, sealed when a password is given.
    pub fn open(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        let mut book = Self {
            path: path.into(),
            password,
            msgids: HashSet::new(),
            addresses: HashMap::new(),
            from_addresses: HashMap::new(),
            dirty: false,
        };
        book.load();
        book
    }

    fn load(&mut self) {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(_) => return,
        };
        let plain = match &self.password {
            Some(pass) => match crypto::open(&data, pass) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "address book unreadable, starting empty");
                    return;
                }
            },
            None => data,
        };
        let text = String::from_utf8_lossy(&plain);
        let mut lines = text.lines();
        if lines.next() != Some(BOOK_MAGIC) {
            warn!("address book has unknown format, starting empty");
            return;
        }
        for line in lines {
            if let Some(msgid) = line.strip_prefix("m ") {
                self.msgids.insert(msgid.to_string());
            } else if let Some(rest) = line.strip_prefix("a ") {
                if let Some((count, addr)) = split_count(rest) {
                    self.addresses.insert(addr.to_string(), count);
                }
            } else if let Some(rest) = line.strip_prefix("f ") {
                if let Some((count, addr)) = split_count(rest) {
                    self.from_addresses.insert(addr.to_string(), count);
                }
            }
        }
    }

    /// Persist if dirty.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut text = String::new();
        text.push_str(BOOK_MAGIC);
        text.push('\n');
        for msgid in &self.msgids {
            text.push_str(&format!("m {}\n", msgid));
        }
        for (addr, count) in &self.addresses {
            text.push_str(&format!("a {} {}\n", count, addr));
        }
        for (addr, count) in &self.from_addresses {
            text.push_str(&format!("f {} {}\n", count, addr));
        }
        let data = match &self.password {
            Some(pass) => crypto::seal(text.as_bytes(), pass),
            None => text.into_bytes(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    /// Record the addresses a message contributed. A message-id already seen
    /// is skipped entirely.
    pub fn add(&mut self, msgid: &str, addresses: &[Address]) {
        if msgid.is_empty() || !self.msgids.insert(msgid.to_string()) {
            return;
        }
        for a in addresses {
            let key = a.to_string();
            *self.addresses.entry(key).or_insert(0) += 1;
        }
        self.dirty = true;
    }

    /// Count one observed From address (called on successful send).
    pub fn add_from(&mut self, address: &Address) {
        *self
            .from_addresses
            .entry(address.to_string())
            .or_insert(0) += 1;
        self.dirty = true;
    }

    /// Addresses whose display name or mailbox contains `filter`
    /// (case-insensitive), most frequently seen first.
    pub fn lookup(&self, filter: &str) -> Vec<String> {
        let needle = filter.to_lowercase();
        let mut hits: Vec<(&String, u32)> = self
            .addresses
            .iter()
            .filter(|(addr, _)| needle.is_empty() || addr.to_lowercase().contains(&needle))
            .map(|(addr, count)| (addr, *count))
            .collect();
        hits.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        hits.into_iter().map(|(addr, _)| addr.clone()).collect()
    }

    /// Observed From addresses, most frequent first.
    pub fn lookup_from(&self) -> Vec<String> {
        let mut hits: Vec<(&String, u32)> = self
            .from_addresses
            .iter()
            .map(|(addr, count)| (addr, *count))
            .collect();
        hits.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        hits.into_iter().map(|(addr, _)| addr.clone()).collect()
    }

    /// Re-key the persisted book.
    pub fn change_pass(&mut self, new_password: Option<String>) -> io::Result<()> {
        self.password = new_password;
        self.dirty = true;
        self.flush()
    }
}

fn split_count(rest: &str) -> Option<(u32, &str)> {
    let sp = rest.find(' ')?;
    let count = rest[..sp].parse().ok()?;
    Some((count, &rest[sp + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: Option<&str>, a: &str) -> Address {
        Address::new(name, a)
    }

    #[test]
    fn msgid_deduplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut book = AddressBook::open(tmp.path().join("addressbook.db"), None);
        let addrs = vec![addr(Some("Al"), "al@x.test")];
        book.add("m1@x", &addrs);
        book.add("m1@x", &addrs);
        book.add("m2@x", &addrs);
        let hits = book.lookup("al");
        assert_eq!(hits, vec!["Al <al@x.test>".to_string()]);
        // counted twice (two distinct message ids), not three times
        assert_eq!(*book.addresses.get("Al <al@x.test>").unwrap(), 2);
    }

    #[test]
    fn lookup_orders_by_frequency() {
        let tmp = tempfile::tempdir().unwrap();
        let mut book = AddressBook::open(tmp.path().join("addressbook.db"), None);
        book.add("m1", &[addr(None, "rare@x.test")]);
        book.add("m2", &[addr(None, "frequent@x.test")]);
        book.add("m3", &[addr(None, "frequent@x.test")]);
        let hits = book.lookup("test");
        assert_eq!(hits[0], "frequent@x.test");
        assert_eq!(hits[1], "rare@x.test");
    }

    #[test]
    fn lookup_matches_display_name_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut book = AddressBook::open(tmp.path().join("addressbook.db"), None);
        book.add("m1", &[addr(Some("Jane Doe"), "jd@x.test")]);
        assert_eq!(book.lookup("jane").len(), 1);
        assert_eq!(book.lookup("DOE").len(), 1);
        assert_eq!(book.lookup("nobody").len(), 0);
    }

    #[test]
    fn persistence_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("addressbook.db");
        {
            let mut book = AddressBook::open(&path, None);
            book.add("m1", &[addr(None, "al@x.test")]);
            book.add_from(&addr(None, "me@x.test"));
            book.flush().unwrap();
        }
        let book = AddressBook::open(&path, None);
        assert_eq!(book.lookup("al").len(), 1);
        assert_eq!(book.lookup_from(), vec!["me@x.test".to_string()]);
    }

    #[test]
    fn change_pass_rekeys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("addressbook.db");
        {
            let mut book = AddressBook::open(&path, Some("old".into()));
            book.add("m1", &[addr(None, "al@x.test")]);
            book.flush().unwrap();
            book.change_pass(Some("new".into())).unwrap();
        }
        let stale = AddressBook::open(&path, Some("old".into()));
        assert!(stale.lookup("al").is_empty());
        let fresh = AddressBook::open(&path, Some("new".into()));
        assert_eq!(fresh.lookup("al").len(), 1);
    }
}
