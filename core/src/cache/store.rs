/*
 * store.rs
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

//! Folder cache on disk. Each folder lives under a directory named by the
//! SHA-256 of its name:
//!
//! ```text
//! cache/<sha256(folder)>/name        folder name, for enumeration
//! cache/<sha256(folder)>/validity    UIDVALIDITY epoch
//! cache/<sha256(folder)>/uids        uid set, one per line
//! cache/<sha256(folder)>/flags       "uid bits" per line
//! cache/<sha256(folder)>/headers/<uid>
//! cache/<sha256(folder)>/bodies/<uid>
//! ```
//!
//! Header and body files are sealed when a password is set. Reads degrade to
//! a miss on any failure; the server is the source of truth.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::cache::crypto::{self, folder_dir_name};
use crate::mime;
use crate::model::{Body, Flags, Header, Uid};

const UIDS_MAGIC: &str = "# lettera-uids v1";
const FLAGS_MAGIC: &str = "# lettera-flags v1";
const BODY_MAGIC: &str = "# lettera-body v1";

pub struct CacheStore {
    root: PathBuf,
    password: Option<String>,
    versions: Mutex<HashMap<String, u64>>,
}

impl CacheStore {
    /// Open (creating if needed) the cache under `root`. A password enables
    /// sealing of header and body blobs.
    pub fn new(root: impl Into<PathBuf>, password: Option<String>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            password,
            versions: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_dir(&self, folder: &str) -> PathBuf {
        self.root.join(folder_dir_name(folder))
    }

    fn ensure_folder_dir(&self, folder: &str) -> io::Result<PathBuf> {
        let dir = self.folder_dir(folder);
        if !dir.exists() {
            fs::create_dir_all(dir.join("headers"))?;
            fs::create_dir_all(dir.join("bodies"))?;
            fs::write(dir.join("name"), folder.as_bytes())?;
        }
        Ok(dir)
    }

    /// Monotonic counter bumped whenever a folder's uid set is replaced.
    pub fn uids_version(&self, folder: &str) -> u64 {
        *self
            .versions
            .lock()
            .unwrap()
            .get(folder)
            .unwrap_or(&0)
    }

    fn bump_version(&self, folder: &str) {
        *self
            .versions
            .lock()
            .unwrap()
            .entry(folder.to_string())
            .or_insert(0) += 1;
    }

    /// Folder names with cached data, for export and re-keying.
    pub fn cached_folders(&self) -> Vec<String> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return out,
        };
        for entry in entries.flatten() {
            let name_file = entry.path().join("name");
            if let Ok(name) = fs::read_to_string(&name_file) {
                out.push(name);
            }
        }
        out.sort();
        out
    }

    /// Stored UIDVALIDITY for the folder, if any.
    pub fn uid_validity(&self, folder: &str) -> Option<u32> {
        let text = fs::read_to_string(self.folder_dir(folder).join("validity")).ok()?;
        text.trim().parse().ok()
    }

    /// Record the server's UIDVALIDITY. A changed epoch invalidates every
    /// cached uid, so the folder's entries are wiped before the new value is
    /// written.
    pub fn set_uid_validity(&self, folder: &str, validity: u32) -> io::Result<()> {
        if let Some(stored) = self.uid_validity(folder) {
            if stored != validity {
                warn!(folder, stored, validity, "uidvalidity changed, wiping folder cache");
                self.wipe_folder(folder)?;
            }
        }
        let dir = self.ensure_folder_dir(folder)?;
        fs::write(dir.join("validity"), validity.to_string())
    }

    fn wipe_folder(&self, folder: &str) -> io::Result<()> {
        let dir = self.folder_dir(folder);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.bump_version(folder);
        Ok(())
    }

    pub fn get_uids(&self, folder: &str) -> Option<BTreeSet<Uid>> {
        let text = fs::read_to_string(self.folder_dir(folder).join("uids")).ok()?;
        let mut lines = text.lines();
        if lines.next() != Some(UIDS_MAGIC) {
            return None;
        }
        Some(lines.filter_map(|l| l.trim().parse().ok()).collect())
    }

    /// Replace the folder's uid set and bump its version counter.
    pub fn put_uids(&self, folder: &str, uids: &BTreeSet<Uid>) -> io::Result<()> {
        let dir = self.ensure_folder_dir(folder)?;
        let mut text = String::with_capacity(uids.len() * 8 + UIDS_MAGIC.len() + 1);
        text.push_str(UIDS_MAGIC);
        text.push('\n');
        for uid in uids {
            text.push_str(&uid.to_string());
            text.push('\n');
        }
        write_atomic(&dir.join("uids"), text.as_bytes())?;
        self.bump_version(folder);
        Ok(())
    }

    pub fn get_header(&self, folder: &str, uid: Uid) -> Option<Header> {
        let raw = self.read_blob(&self.folder_dir(folder).join("headers").join(uid.to_string()))?;
        Some(mime::parse_header(&raw))
    }

    pub fn put_header(&self, folder: &str, uid: Uid, header: &Header) -> io::Result<()> {
        let dir = self.ensure_folder_dir(folder)?;
        self.write_blob(&dir.join("headers").join(uid.to_string()), &header.raw)
    }

    pub fn get_flags(&self, folder: &str, uid: Uid) -> Option<Flags> {
        self.get_all_flags(folder).get(&uid).copied()
    }

    pub fn get_all_flags(&self, folder: &str) -> BTreeMap<Uid, Flags> {
        let mut out = BTreeMap::new();
        let text = match fs::read_to_string(self.folder_dir(folder).join("flags")) {
            Ok(t) => t,
            Err(_) => return out,
        };
        let mut lines = text.lines();
        if lines.next() != Some(FLAGS_MAGIC) {
            return out;
        }
        for line in lines {
            let mut parts = line.split_whitespace();
            if let (Some(u), Some(f)) = (parts.next(), parts.next()) {
                if let (Ok(u), Ok(f)) = (u.parse(), f.parse()) {
                    out.insert(u, Flags(f));
                }
            }
        }
        out
    }

    /// Merge flag entries into the folder's flag table.
    pub fn put_flags(&self, folder: &str, flags: &BTreeMap<Uid, Flags>) -> io::Result<()> {
        let mut table = self.get_all_flags(folder);
        for (uid, f) in flags {
            table.insert(*uid, *f);
        }
        self.write_flags_table(folder, &table)
    }

    pub fn put_flag(&self, folder: &str, uid: Uid, flags: Flags) -> io::Result<()> {
        let mut one = BTreeMap::new();
        one.insert(uid, flags);
        self.put_flags(folder, &one)
    }

    fn write_flags_table(&self, folder: &str, table: &BTreeMap<Uid, Flags>) -> io::Result<()> {
        let dir = self.ensure_folder_dir(folder)?;
        let mut text = String::with_capacity(table.len() * 12 + FLAGS_MAGIC.len() + 1);
        text.push_str(FLAGS_MAGIC);
        text.push('\n');
        for (uid, f) in table {
            text.push_str(&format!("{} {}\n", uid, f.0));
        }
        write_atomic(&dir.join("flags"), text.as_bytes())
    }

    pub fn get_body(&self, folder: &str, uid: Uid) -> Option<Body> {
        let blob = self.read_blob(&self.folder_dir(folder).join("bodies").join(uid.to_string()))?;
        match parse_body_container(&blob) {
            Some(b) => Some(b),
            None => {
                warn!(folder, uid, "malformed body cache entry, treating as miss");
                None
            }
        }
    }

    pub fn put_body(&self, folder: &str, uid: Uid, body: &Body) -> io::Result<()> {
        let dir = self.ensure_folder_dir(folder)?;
        let blob = serialize_body_container(body);
        self.write_blob(&dir.join("bodies").join(uid.to_string()), &blob)
    }

    /// Drop one message's header, body and flag entries.
    pub fn remove_message(&self, folder: &str, uid: Uid) -> io::Result<()> {
        let dir = self.folder_dir(folder);
        let _ = fs::remove_file(dir.join("headers").join(uid.to_string()));
        let _ = fs::remove_file(dir.join("bodies").join(uid.to_string()));
        let mut table = self.get_all_flags(folder);
        if table.remove(&uid).is_some() {
            self.write_flags_table(folder, &table)?;
        }
        Ok(())
    }

    /// Rename a folder's cache directory. Noop when the source is absent.
    pub fn rename_folder(&self, old: &str, new: &str) -> io::Result<()> {
        let old_dir = self.folder_dir(old);
        if !old_dir.exists() {
            return Ok(());
        }
        let new_dir = self.folder_dir(new);
        if new_dir.exists() {
            fs::remove_dir_all(&new_dir)?;
        }
        fs::rename(&old_dir, &new_dir)?;
        fs::write(new_dir.join("name"), new.as_bytes())?;
        self.bump_version(old);
        self.bump_version(new);
        Ok(())
    }

    /// Wipe the whole cache.
    pub fn clear(&self) -> io::Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        self.versions.lock().unwrap().clear();
        Ok(())
    }

    /// Re-seal every header and body blob under a new password. Plain tables
    /// (uids, flags) are untouched.
    pub fn change_pass(&self, old_pass: &str, new_pass: &str) -> io::Result<()> {
        for folder in self.cached_folders() {
            let dir = self.folder_dir(&folder);
            for sub in ["headers", "bodies"] {
                let subdir = dir.join(sub);
                let entries = match fs::read_dir(&subdir) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    let sealed = fs::read(&path)?;
                    let plain = crypto::open(&sealed, old_pass).map_err(|e| {
                        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
                    })?;
                    write_atomic(&path, &crypto::seal(&plain, new_pass))?;
                }
            }
        }
        Ok(())
    }

    fn read_blob(&self, path: &Path) -> Option<Vec<u8>> {
        let data = fs::read(path).ok()?;
        match &self.password {
            Some(pass) => match crypto::open(&data, pass) {
                Ok(plain) => Some(plain),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cache blob unreadable, treating as miss");
                    None
                }
            },
            None => Some(data),
        }
    }

    fn write_blob(&self, path: &Path, plain: &[u8]) -> io::Result<()> {
        match &self.password {
            Some(pass) => write_atomic(path, &crypto::seal(plain, pass)),
            None => write_atomic(path, plain),
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

/// Body cache container: derived fields plus the raw payload, so HTML
/// processing survives restarts without refetching.
fn serialize_body_container(body: &Body) -> Vec<u8> {
    let plain = body.text_plain.as_bytes();
    let html = body.text_html.as_bytes();
    let head = format!(
        "{}\nflowed {}\nhtmlparsed {}\nplain {}\nhtml {}\nraw {}\n",
        BODY_MAGIC,
        body.format_flowed as u8,
        body.html_parsed as u8,
        plain.len(),
        html.len(),
        body.raw.len()
    );
    let mut out = Vec::with_capacity(head.len() + plain.len() + html.len() + body.raw.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(plain);
    out.extend_from_slice(html);
    out.extend_from_slice(&body.raw);
    out
}

fn read_line(blob: &[u8], pos: usize) -> Option<(String, usize)> {
    let rest = blob.get(pos..)?;
    let nl = rest.iter().position(|&b| b == b'\n')?;
    let s = String::from_utf8_lossy(&rest[..nl]).into_owned();
    Some((s, pos + nl + 1))
}

fn parse_body_container(blob: &[u8]) -> Option<Body> {
    let (magic, mut pos) = read_line(blob, 0)?;
    if magic != BODY_MAGIC {
        return None;
    }
    let mut flowed = false;
    let mut html_parsed = false;
    let mut plain_len = 0usize;
    let mut html_len = 0usize;
    let mut raw_len = 0usize;
    for _ in 0..5 {
        let (l, next) = read_line(blob, pos)?;
        pos = next;
        let mut parts = l.split_whitespace();
        let key = parts.next()?;
        let val = parts.next()?;
        match key {
            "flowed" => flowed = val == "1",
            "htmlparsed" => html_parsed = val == "1",
            "plain" => plain_len = val.parse().ok()?,
            "html" => html_len = val.parse().ok()?,
            "raw" => raw_len = val.parse().ok()?,
            _ => return None,
        }
    }
    if pos + plain_len + html_len + raw_len != blob.len() {
        return None;
    }
    let text_plain = String::from_utf8_lossy(&blob[pos..pos + plain_len]).into_owned();
    let text_html =
        String::from_utf8_lossy(&blob[pos + plain_len..pos + plain_len + html_len]).into_owned();
    let raw = blob[pos + plain_len + html_len..].to_vec();

    // parts are derived from raw, not persisted
    let derived = mime::parse_body(&raw, false);
    Some(Body {
        raw,
        text_plain,
        text_html,
        parts: derived.parts,
        format_flowed: flowed,
        html_parsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::parse_header;

    fn store(dir: &Path, pass: Option<&str>) -> CacheStore {
        CacheStore::new(dir.join("cache"), pass.map(|s| s.to_string())).unwrap()
    }

    fn sample_header() -> Header {
        parse_header(
            b"Message-ID: <m1@x>\r\nFrom: a@x\r\nSubject: s\r\nDate: Mon, 01 Jan 2024 10:00:00 +0000\r\n\r\n",
        )
    }

    fn sample_body() -> Body {
        mime::parse_body(b"Content-Type: text/plain\r\n\r\nhello\r\n", false)
    }

    #[test]
    fn uids_round_trip_bumps_version() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        assert!(s.get_uids("INBOX").is_none());
        let v0 = s.uids_version("INBOX");
        let uids: BTreeSet<Uid> = [1, 2, 3].into_iter().collect();
        s.put_uids("INBOX", &uids).unwrap();
        assert_eq!(s.get_uids("INBOX").unwrap(), uids);
        assert!(s.uids_version("INBOX") > v0);
    }

    #[test]
    fn header_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        let h = sample_header();
        s.put_header("INBOX", 7, &h).unwrap();
        let back = s.get_header("INBOX", 7).unwrap();
        assert_eq!(back.message_id, h.message_id);
        assert_eq!(back.subject, h.subject);
        assert_eq!(back.raw, h.raw);
    }

    #[test]
    fn encrypted_blobs_unreadable_with_wrong_pass() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let s = store(tmp.path(), Some("pw"));
            s.put_header("INBOX", 7, &sample_header()).unwrap();
            assert!(s.get_header("INBOX", 7).is_some());
        }
        let wrong = store(tmp.path(), Some("other"));
        assert!(wrong.get_header("INBOX", 7).is_none());
    }

    #[test]
    fn body_container_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        let mut b = sample_body();
        b.text_html = "<p>hi</p>".to_string();
        b.html_parsed = true;
        s.put_body("INBOX", 3, &b).unwrap();
        let back = s.get_body("INBOX", 3).unwrap();
        assert_eq!(back.raw, b.raw);
        assert_eq!(back.text_plain, b.text_plain);
        assert_eq!(back.text_html, b.text_html);
        assert!(back.html_parsed);
        assert_eq!(back.parts.len(), 1);
    }

    #[test]
    fn flags_merge_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        s.put_flag("INBOX", 1, Flags(Flags::SEEN)).unwrap();
        s.put_flag("INBOX", 2, Flags(0)).unwrap();
        assert!(s.get_flags("INBOX", 1).unwrap().is_seen());
        assert_eq!(s.get_all_flags("INBOX").len(), 2);
        s.remove_message("INBOX", 1).unwrap();
        assert!(s.get_flags("INBOX", 1).is_none());
        assert!(s.get_flags("INBOX", 2).is_some());
    }

    #[test]
    fn removed_message_is_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        s.put_header("INBOX", 9, &sample_header()).unwrap();
        s.put_body("INBOX", 9, &sample_body()).unwrap();
        s.remove_message("INBOX", 9).unwrap();
        assert!(s.get_header("INBOX", 9).is_none());
        assert!(s.get_body("INBOX", 9).is_none());
    }

    #[test]
    fn uidvalidity_change_wipes_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        s.set_uid_validity("INBOX", 100).unwrap();
        s.put_header("INBOX", 1, &sample_header()).unwrap();
        s.set_uid_validity("INBOX", 100).unwrap();
        assert!(s.get_header("INBOX", 1).is_some());
        s.set_uid_validity("INBOX", 101).unwrap();
        assert!(s.get_header("INBOX", 1).is_none());
        assert_eq!(s.uid_validity("INBOX"), Some(101));
    }

    #[test]
    fn rename_folder_moves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), None);
        s.put_header("Old", 1, &sample_header()).unwrap();
        s.rename_folder("Old", "New").unwrap();
        assert!(s.get_header("Old", 1).is_none());
        assert!(s.get_header("New", 1).is_some());
        assert!(s.cached_folders().contains(&"New".to_string()));
        // renaming an absent folder is a noop
        s.rename_folder("Ghost", "Other").unwrap();
    }

    #[test]
    fn change_pass_reseals() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let s = store(tmp.path(), Some("old"));
            s.put_header("INBOX", 1, &sample_header()).unwrap();
            s.change_pass("old", "new").unwrap();
        }
        let s = store(tmp.path(), Some("new"));
        assert!(s.get_header("INBOX", 1).is_some());
    }
}
