/*
 * index.rs
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

//! Inverted index over cached headers and plain-text bodies. Documents are
//! (folder, uid); postings carry field bits and positions so phrases and
//! field scoping work. Hits come back ordered by message time descending.
//! State persists to one file under the index directory, sealed when a
//! password is set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::cache::crypto;
use crate::model::{Header, Uid};
use crate::search::query::{parse_query, tokenize_text, Field, QueryNode};

const INDEX_MAGIC: &str = "# lettera-index v1";
const INDEX_FILE: &str = "index.dat";
/// Position gap between fields of one document, so phrases never span fields.
const FIELD_GAP: u32 = 100;

type DocId = u64;

#[derive(Debug, Clone)]
struct DocMeta {
    folder: String,
    uid: Uid,
    timestamp: i64,
}

/// One posting occurrence: field bit plus position within the document.
type Occurrence = (u8, u32);

pub struct SearchIndex {
    dir: PathBuf,
    password: Option<String>,
    docs: HashMap<DocId, DocMeta>,
    doc_ids: HashMap<(String, Uid), DocId>,
    postings: BTreeMap<String, HashMap<DocId, Vec<Occurrence>>>,
    next_doc: DocId,
    dirty: bool,
}

impl SearchIndex {
    /// Open the index under `dir`, loading any persisted state.
    pub fn open(dir: impl Into<PathBuf>, password: Option<String>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut index = Self {
            dir,
            password,
            docs: HashMap::new(),
            doc_ids: HashMap::new(),
            postings: BTreeMap::new(),
            next_doc: 1,
            dirty: false,
        };
        index.load();
        Ok(index)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn load(&mut self) {
        let data = match fs::read(self.index_path()) {
            Ok(d) => d,
            Err(_) => return,
        };
        let plain = match &self.password {
            Some(pass) => match crypto::open(&data, pass) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "search index unreadable, starting empty");
                    return;
                }
            },
            None => data,
        };
        let text = String::from_utf8_lossy(&plain);
        let mut lines = text.lines();
        if lines.next() != Some(INDEX_MAGIC) {
            warn!("search index has unknown format, starting empty");
            return;
        }
        let mut current_token: Option<String> = None;
        for line in lines {
            if let Some(rest) = line.strip_prefix("doc ") {
                let mut parts = rest.splitn(4, ' ');
                let id = parts.next().and_then(|s| s.parse().ok());
                let uid = parts.next().and_then(|s| s.parse().ok());
                let ts = parts.next().and_then(|s| s.parse().ok());
                let folder = parts.next();
                if let (Some(id), Some(uid), Some(ts), Some(folder)) = (id, uid, ts, folder) {
                    self.docs.insert(
                        id,
                        DocMeta {
                            folder: folder.to_string(),
                            uid,
                            timestamp: ts,
                        },
                    );
                    self.doc_ids.insert((folder.to_string(), uid), id);
                    self.next_doc = self.next_doc.max(id + 1);
                }
            } else if let Some(tok) = line.strip_prefix("tok ") {
                current_token = Some(tok.to_string());
            } else if let Some(rest) = line.strip_prefix("p ") {
                let mut parts = rest.split(' ');
                let doc = parts.next().and_then(|s| s.parse().ok());
                let field = parts.next().and_then(|s| s.parse().ok());
                let pos = parts.next().and_then(|s| s.parse().ok());
                if let (Some(tok), Some(doc), Some(field), Some(pos)) =
                    (current_token.as_ref(), doc, field, pos)
                {
                    self.postings
                        .entry(tok.clone())
                        .or_default()
                        .entry(doc)
                        .or_default()
                        .push((field, pos));
                }
            }
        }
    }

    /// Persist if dirty. Dead documents are compacted away.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut text = String::new();
        text.push_str(INDEX_MAGIC);
        text.push('\n');
        for (id, meta) in &self.docs {
            text.push_str(&format!(
                "doc {} {} {} {}\n",
                id, meta.uid, meta.timestamp, meta.folder
            ));
        }
        for (token, docs) in &self.postings {
            let live: Vec<_> = docs
                .iter()
                .filter(|(doc, _)| self.docs.contains_key(doc))
                .collect();
            if live.is_empty() {
                continue;
            }
            text.push_str("tok ");
            text.push_str(token);
            text.push('\n');
            for (doc, occurrences) in live {
                for (field, pos) in occurrences {
                    text.push_str(&format!("p {} {} {}\n", doc, field, pos));
                }
            }
        }
        let data = match &self.password {
            Some(pass) => crypto::seal(text.as_bytes(), pass),
            None => text.into_bytes(),
        };
        let tmp = self.index_path().with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, self.index_path())?;
        self.dirty = false;
        Ok(())
    }

    /// Add (or replace) the document for (folder, uid). Idempotent: indexing
    /// the same content twice leaves one document.
    pub fn index(&mut self, folder: &str, uid: Uid, header: &Header, body_plain: &str) {
        self.remove(folder, uid);
        let id = self.next_doc;
        self.next_doc += 1;
        self.docs.insert(
            id,
            DocMeta {
                folder: folder.to_string(),
                uid,
                timestamp: header.timestamp,
            },
        );
        self.doc_ids.insert((folder.to_string(), uid), id);

        let from_text = header
            .from
            .iter()
            .chain(header.reply_to.iter())
            .map(|a| format!("{} {}", a.display_name.as_deref().unwrap_or(""), a.address))
            .collect::<Vec<_>>()
            .join(" ");
        let to_text = header
            .to
            .iter()
            .chain(header.cc.iter())
            .map(|a| format!("{} {}", a.display_name.as_deref().unwrap_or(""), a.address))
            .collect::<Vec<_>>()
            .join(" ");

        let mut pos = 0u32;
        for (field, text) in [
            (Field::Folder, folder),
            (Field::Subject, header.subject.as_str()),
            (Field::From, from_text.as_str()),
            (Field::To, to_text.as_str()),
            (Field::Body, body_plain),
        ] {
            for token in tokenize_text(text) {
                self.postings
                    .entry(token)
                    .or_default()
                    .entry(id)
                    .or_default()
                    .push((field.bit(), pos));
                pos += 1;
            }
            pos += FIELD_GAP;
        }
        self.dirty = true;
    }

    /// Drop the document for (folder, uid). Idempotent.
    pub fn remove(&mut self, folder: &str, uid: Uid) {
        if let Some(id) = self.doc_ids.remove(&(folder.to_string(), uid)) {
            self.docs.remove(&id);
            for docs in self.postings.values_mut() {
                docs.remove(&id);
            }
            self.postings.retain(|_, docs| !docs.is_empty());
            self.dirty = true;
        }
    }

    /// Run a query. Returns (folder, uid) hits ordered by message time
    /// descending and whether more hits exist past the page.
    pub fn search(
        &self,
        query: &str,
        offset: usize,
        max: usize,
    ) -> Result<(Vec<(String, Uid)>, bool), crate::search::query::QueryParseError> {
        let node = parse_query(query)?;
        let matched = self.eval(&node);
        let mut hits: Vec<&DocMeta> = matched
            .iter()
            .filter_map(|id| self.docs.get(id))
            .collect();
        hits.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.folder.cmp(&a.folder))
                .then_with(|| b.uid.cmp(&a.uid))
        });
        let total = hits.len();
        let page: Vec<(String, Uid)> = hits
            .into_iter()
            .skip(offset)
            .take(max)
            .map(|m| (m.folder.clone(), m.uid))
            .collect();
        let has_more = total > offset + page.len();
        Ok((page, has_more))
    }

    fn all_docs(&self) -> HashSet<DocId> {
        self.docs.keys().copied().collect()
    }

    fn eval(&self, node: &QueryNode) -> HashSet<DocId> {
        match node {
            QueryNode::Term {
                field,
                tokens,
                prefix,
                phrase,
            } => {
                let mask = field.map(|f| f.bit());
                if *phrase {
                    self.eval_phrase(tokens, mask)
                } else if *prefix {
                    self.eval_prefix(&tokens[0], mask)
                } else {
                    self.eval_word(&tokens[0], mask)
                }
            }
            QueryNode::Not(inner) => {
                let matched = self.eval(inner);
                self.all_docs().difference(&matched).copied().collect()
            }
            QueryNode::And(parts) => {
                let mut iter = parts.iter();
                let mut acc = match iter.next() {
                    Some(p) => self.eval(p),
                    None => return HashSet::new(),
                };
                for p in iter {
                    let rhs = self.eval(p);
                    acc.retain(|d| rhs.contains(d));
                    if acc.is_empty() {
                        break;
                    }
                }
                acc
            }
            QueryNode::Or(parts) => {
                let mut acc = HashSet::new();
                for p in parts {
                    acc.extend(self.eval(p));
                }
                acc
            }
            QueryNode::Xor(l, r) => {
                let lhs = self.eval(l);
                let rhs = self.eval(r);
                lhs.symmetric_difference(&rhs).copied().collect()
            }
        }
    }

    fn eval_word(&self, token: &str, mask: Option<u8>) -> HashSet<DocId> {
        let mut out = HashSet::new();
        if let Some(docs) = self.postings.get(token) {
            for (doc, occurrences) in docs {
                if !self.docs.contains_key(doc) {
                    continue;
                }
                if occurrence_matches(occurrences, mask) {
                    out.insert(*doc);
                }
            }
        }
        out
    }

    fn eval_prefix(&self, stem: &str, mask: Option<u8>) -> HashSet<DocId> {
        let mut out = HashSet::new();
        for (token, docs) in self.postings.range(stem.to_string()..) {
            if !token.starts_with(stem) {
                break;
            }
            for (doc, occurrences) in docs {
                if !self.docs.contains_key(doc) {
                    continue;
                }
                if occurrence_matches(occurrences, mask) {
                    out.insert(*doc);
                }
            }
        }
        out
    }

    /// Phrase: every token present in the same field at consecutive positions.
    fn eval_phrase(&self, tokens: &[String], mask: Option<u8>) -> HashSet<DocId> {
        let mut out = HashSet::new();
        let first = match self.postings.get(&tokens[0]) {
            Some(d) => d,
            None => return out,
        };
        'docs: for (doc, occurrences) in first {
            if !self.docs.contains_key(doc) {
                continue;
            }
            for &(field, base) in occurrences {
                if let Some(m) = mask {
                    if field & m == 0 {
                        continue;
                    }
                }
                let mut all = true;
                for (i, token) in tokens.iter().enumerate().skip(1) {
                    let found = self
                        .postings
                        .get(token)
                        .and_then(|d| d.get(doc))
                        .map(|occ| occ.contains(&(field, base + i as u32)))
                        .unwrap_or(false);
                    if !found {
                        all = false;
                        break;
                    }
                }
                if all {
                    out.insert(*doc);
                    continue 'docs;
                }
            }
        }
        out
    }

    /// Switch the sealing password; the next flush writes with the new key.
    pub fn change_pass(&mut self, new_password: Option<String>) -> io::Result<()> {
        self.password = new_password;
        self.dirty = true;
        self.flush()
    }

    /// Drop all index state, in memory and on disk.
    pub fn clear(&mut self) -> io::Result<()> {
        self.docs.clear();
        self.doc_ids.clear();
        self.postings.clear();
        self.next_doc = 1;
        self.dirty = false;
        let path = self.index_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn occurrence_matches(occurrences: &[Occurrence], mask: Option<u8>) -> bool {
    match mask {
        Some(m) => occurrences.iter().any(|(f, _)| f & m != 0),
        None => !occurrences.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::parse_header;

    fn header(subject: &str, from: &str, date: &str) -> Header {
        let raw = format!(
            "Message-ID: <{}@x>\r\nFrom: {}\r\nSubject: {}\r\nDate: {}\r\n\r\n",
            subject.replace(' ', "_"),
            from,
            subject,
            date
        );
        parse_header(raw.as_bytes())
    }

    fn sample_index(dir: &Path) -> SearchIndex {
        let mut ix = SearchIndex::open(dir, None).unwrap();
        ix.index(
            "INBOX",
            1,
            &header("invoice january", "al@x.test", "Mon, 01 Jan 2024 09:00:00 +0000"),
            "please find the invoice attached",
        );
        ix.index(
            "INBOX",
            2,
            &header("invoice february", "bea@y.test", "Thu, 01 Feb 2024 09:00:00 +0000"),
            "second invoice of the year",
        );
        ix.index(
            "Archive",
            3,
            &header("invoice march", "al@x.test", "Fri, 01 Mar 2024 09:00:00 +0000"),
            "third invoice, final notice",
        );
        ix.index(
            "INBOX",
            4,
            &header("lunch plans", "bea@y.test", "Fri, 01 Mar 2024 10:00:00 +0000"),
            "are you free on friday",
        );
        ix
    }

    #[test]
    fn results_ordered_by_date_descending() {
        let tmp = tempfile::tempdir().unwrap();
        let ix = sample_index(tmp.path());
        let (hits, has_more) = ix.search("subject:\"invoice\"", 0, 10).unwrap();
        assert!(!has_more);
        assert_eq!(
            hits,
            vec![
                ("Archive".to_string(), 3),
                ("INBOX".to_string(), 2),
                ("INBOX".to_string(), 1),
            ]
        );
    }

    #[test]
    fn pagination_has_more() {
        let tmp = tempfile::tempdir().unwrap();
        let ix = sample_index(tmp.path());
        let (page1, more1) = ix.search("invoice", 0, 2).unwrap();
        assert_eq!(page1.len(), 2);
        assert!(more1);
        let (page2, more2) = ix.search("invoice", 2, 2).unwrap();
        assert_eq!(page2.len(), 1);
        assert!(!more2);
    }

    #[test]
    fn field_scope_restricts() {
        let tmp = tempfile::tempdir().unwrap();
        let ix = sample_index(tmp.path());
        let (hits, _) = ix.search("from:al", 0, 10).unwrap();
        assert_eq!(hits.len(), 2);
        let (hits, _) = ix.search("folder:archive", 0, 10).unwrap();
        assert_eq!(hits, vec![("Archive".to_string(), 3)]);
        // "friday" appears only in a body
        let (hits, _) = ix.search("subject:friday", 0, 10).unwrap();
        assert!(hits.is_empty());
        let (hits, _) = ix.search("body:friday", 0, 10).unwrap();
        assert_eq!(hits, vec![("INBOX".to_string(), 4)]);
    }

    #[test]
    fn boolean_operators() {
        let tmp = tempfile::tempdir().unwrap();
        let ix = sample_index(tmp.path());
        let (hits, _) = ix.search("invoice AND february", 0, 10).unwrap();
        assert_eq!(hits, vec![("INBOX".to_string(), 2)]);
        let (hits, _) = ix.search("january OR february", 0, 10).unwrap();
        assert_eq!(hits.len(), 2);
        let (hits, _) = ix.search("invoice -final", 0, 10).unwrap();
        assert_eq!(hits.len(), 2);
        let (hits, _) = ix.search("invoice XOR friday", 0, 10).unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn phrase_requires_adjacency() {
        let tmp = tempfile::tempdir().unwrap();
        let ix = sample_index(tmp.path());
        let (hits, _) = ix.search("\"final notice\"", 0, 10).unwrap();
        assert_eq!(hits, vec![("Archive".to_string(), 3)]);
        let (hits, _) = ix.search("\"notice final\"", 0, 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn prefix_wildcard() {
        let tmp = tempfile::tempdir().unwrap();
        let ix = sample_index(tmp.path());
        let (hits, _) = ix.search("febr*", 0, 10).unwrap();
        assert_eq!(hits, vec![("INBOX".to_string(), 2)]);
    }

    #[test]
    fn index_remove_index_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ix = SearchIndex::open(tmp.path(), None).unwrap();
        let h = header("hello", "al@x.test", "Mon, 01 Jan 2024 09:00:00 +0000");
        ix.index("INBOX", 1, &h, "body text");
        ix.remove("INBOX", 1);
        ix.index("INBOX", 1, &h, "body text");
        let (hits, _) = ix.search("hello", 0, 10).unwrap();
        assert_eq!(hits, vec![("INBOX".to_string(), 1)]);
        // duplicate index call leaves one document
        ix.index("INBOX", 1, &h, "body text");
        let (hits, _) = ix.search("hello", 0, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn removed_doc_never_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ix = sample_index(tmp.path());
        ix.remove("INBOX", 2);
        let (hits, _) = ix.search("invoice", 0, 10).unwrap();
        assert!(!hits.contains(&("INBOX".to_string(), 2)));
        ix.remove("INBOX", 2);
    }

    #[test]
    fn persistence_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut ix = sample_index(tmp.path());
            ix.flush().unwrap();
        }
        let ix = SearchIndex::open(tmp.path(), None).unwrap();
        let (hits, _) = ix.search("subject:invoice", 0, 10).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn sealed_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut ix = SearchIndex::open(tmp.path(), Some("pw".into())).unwrap();
            ix.index(
                "INBOX",
                1,
                &header("secret", "al@x.test", "Mon, 01 Jan 2024 09:00:00 +0000"),
                "body",
            );
            ix.flush().unwrap();
        }
        // wrong password: starts empty rather than erroring
        let ix = SearchIndex::open(tmp.path(), Some("other".into())).unwrap();
        let (hits, _) = ix.search("secret", 0, 10).unwrap();
        assert!(hits.is_empty());
        let ix = SearchIndex::open(tmp.path(), Some("pw".into())).unwrap();
        let (hits, _) = ix.search("secret", 0, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
