/*
 * maildir.rs
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

//! Offline export of the cache into a Maildir tree: one maildir per folder,
//! messages delivered into cur/ with the Seen flag mapped to `S`. Folder
//! names are =XX hex-encoded where the filesystem would object.

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use crate::cache::CacheStore;

const SAFE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._-";

/// Encode a folder name for use as a directory name: unsafe bytes become
/// =XX hex escapes.
pub fn encode_folder_name(name: &str) -> String {
    let bytes = name.as_bytes();
    if !bytes.is_empty() && bytes.iter().all(|b| SAFE_CHARS.contains(b)) {
        return name.to_string();
    }
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if SAFE_CHARS.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("={:02X}", b));
        }
    }
    out
}

/// Export every cached message into `target`. Returns the message count.
pub fn export(cache: &CacheStore, target: &Path) -> io::Result<usize> {
    let mut exported = 0usize;
    for folder in cache.cached_folders() {
        let dir = target.join(encode_folder_name(&folder));
        for sub in ["cur", "new", "tmp"] {
            fs::create_dir_all(dir.join(sub))?;
        }
        let uids = cache.get_uids(&folder).unwrap_or_default();
        let flags = cache.get_all_flags(&folder);
        for uid in uids {
            let body = match cache.get_body(&folder, uid) {
                Some(b) => b,
                None => continue,
            };
            let seen = flags.get(&uid).map(|f| f.is_seen()).unwrap_or(false);
            let suffix = if seen { "S" } else { "" };
            let name = format!("{}.lettera:2,{}", uid, suffix);
            let tmp = dir.join("tmp").join(&name.replace(':', "_"));
            fs::write(&tmp, &body.raw)?;
            fs::rename(&tmp, dir.join("cur").join(&name))?;
            exported += 1;
        }
        info!(folder, "folder exported");
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    #[test]
    fn folder_name_encoding() {
        assert_eq!(encode_folder_name("INBOX"), "INBOX");
        assert_eq!(encode_folder_name("Mail/Sub"), "Mail=2FSub");
        assert_eq!(encode_folder_name("a b"), "a=20b");
    }

    #[test]
    fn exports_cached_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"), None).unwrap();
        let raw = b"From: a@x\r\nSubject: s\r\n\r\nhello\r\n";
        let header = mime::parse_header(raw);
        let body = mime::parse_body(raw, false);
        let uids: BTreeSet<u32> = [7].into_iter().collect();
        cache.put_uids("INBOX", &uids).unwrap();
        cache.put_header("INBOX", 7, &header).unwrap();
        cache.put_body("INBOX", 7, &body).unwrap();
        let mut flags = BTreeMap::new();
        flags.insert(7u32, crate::model::Flags(crate::model::Flags::SEEN));
        cache.put_flags("INBOX", &flags).unwrap();

        let out = tmp.path().join("maildir");
        let n = export(&cache, &out).unwrap();
        assert_eq!(n, 1);
        let cur = out.join("INBOX/cur");
        let entries: Vec<_> = fs::read_dir(&cur).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_string_lossy().into_owned();
        assert!(name.ends_with(":2,S"));
        assert_eq!(fs::read(entries[0].path()).unwrap(), raw.to_vec());
    }
}
