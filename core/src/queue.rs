/*
 * queue.rs
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

//! Durable FIFO of complete messages awaiting the network: drafts to upload,
//! outbox messages to send, compose backups. Each entry is one `.eml` file
//! with a monotonic numeric prefix; draining renames the files into a
//! sentinel directory first so a crash mid-drain loses nothing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Which sub-queue an offline message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Draft,
    Outbox,
    ComposeBackup,
}

impl QueueKind {
    fn dir_name(&self) -> &'static str {
        match self {
            QueueKind::Draft => "drafts",
            QueueKind::Outbox => "outbox",
            QueueKind::ComposeBackup => "compose",
        }
    }
}

pub struct OfflineQueue {
    root: PathBuf,
}

impl OfflineQueue {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for kind in [QueueKind::Draft, QueueKind::Outbox, QueueKind::ComposeBackup] {
            fs::create_dir_all(root.join(kind.dir_name()))?;
        }
        Ok(Self { root })
    }

    fn dir(&self, kind: QueueKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Numbered entries currently in a sub-queue, FIFO order.
    fn entries(&self, dir: &Path) -> Vec<(u64, PathBuf)> {
        let mut out = Vec::new();
        let iter = match fs::read_dir(dir) {
            Ok(i) => i,
            Err(_) => return out,
        };
        for entry in iter.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("eml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(n) = stem.parse::<u64>() {
                    out.push((n, path));
                }
            }
        }
        out.sort_by_key(|(n, _)| *n);
        out
    }

    fn next_number(&self, kind: QueueKind) -> u64 {
        self.entries(&self.dir(kind))
            .last()
            .map(|(n, _)| n + 1)
            .unwrap_or(0)
    }

    /// Append a message blob to a sub-queue.
    pub fn push(&self, kind: QueueKind, blob: &[u8]) -> io::Result<()> {
        let n = self.next_number(kind);
        let dir = self.dir(kind);
        let tmp = dir.join(format!("{}.tmp", n));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, dir.join(format!("{}.eml", n)))
    }

    /// Drain a sub-queue: rename all entries into a sentinel directory, read
    /// them in FIFO order, then delete. Returns the blobs.
    pub fn pop_all(&self, kind: QueueKind) -> Vec<Vec<u8>> {
        let dir = self.dir(kind);
        let drain_dir = dir.join(".drain");
        if let Err(e) = fs::create_dir_all(&drain_dir) {
            warn!(error = %e, "cannot create drain dir");
            return Vec::new();
        }
        let mut moved = Vec::new();
        for (n, path) in self.entries(&dir) {
            let target = drain_dir.join(format!("{}.eml", n));
            match fs::rename(&path, &target) {
                Ok(()) => moved.push((n, target)),
                Err(e) => warn!(error = %e, "cannot move queue entry for drain"),
            }
        }
        let mut out = Vec::new();
        for (_, path) in &moved {
            match fs::read(path) {
                Ok(blob) => out.push(blob),
                Err(e) => warn!(error = %e, "cannot read queue entry"),
            }
        }
        for (_, path) in &moved {
            let _ = fs::remove_file(path);
        }
        let _ = fs::remove_dir(&drain_dir);
        out
    }

    /// Recover entries stranded in a sentinel directory by a crash mid-drain:
    /// move them back to the queue ahead of a normal drain.
    pub fn recover(&self, kind: QueueKind) {
        let dir = self.dir(kind);
        let drain_dir = dir.join(".drain");
        let iter = match fs::read_dir(&drain_dir) {
            Ok(i) => i,
            Err(_) => return,
        };
        for entry in iter.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name() {
                let _ = fs::rename(&path, dir.join(name));
            }
        }
        let _ = fs::remove_dir(&drain_dir);
    }

    pub fn len(&self, kind: QueueKind) -> usize {
        self.entries(&self.dir(kind)).len()
    }

    pub fn is_empty(&self, kind: QueueKind) -> bool {
        self.len(kind) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let tmp = tempfile::tempdir().unwrap();
        let q = OfflineQueue::new(tmp.path().join("queue")).unwrap();
        q.push(QueueKind::Draft, b"first").unwrap();
        q.push(QueueKind::Draft, b"second").unwrap();
        q.push(QueueKind::Draft, b"third").unwrap();
        assert_eq!(q.len(QueueKind::Draft), 3);
        let drained = q.pop_all(QueueKind::Draft);
        assert_eq!(drained, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
        assert!(q.is_empty(QueueKind::Draft));
    }

    #[test]
    fn sub_queues_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let q = OfflineQueue::new(tmp.path().join("queue")).unwrap();
        q.push(QueueKind::Outbox, b"out").unwrap();
        q.push(QueueKind::ComposeBackup, b"backup").unwrap();
        assert_eq!(q.len(QueueKind::Outbox), 1);
        assert_eq!(q.len(QueueKind::ComposeBackup), 1);
        assert!(q.is_empty(QueueKind::Draft));
        assert_eq!(q.pop_all(QueueKind::Outbox), vec![b"out".to_vec()]);
        assert_eq!(q.len(QueueKind::ComposeBackup), 1);
    }

    #[test]
    fn drain_then_push_restarts_numbering() {
        let tmp = tempfile::tempdir().unwrap();
        let q = OfflineQueue::new(tmp.path().join("queue")).unwrap();
        q.push(QueueKind::Outbox, b"a").unwrap();
        q.pop_all(QueueKind::Outbox);
        q.push(QueueKind::Outbox, b"b").unwrap();
        assert_eq!(q.pop_all(QueueKind::Outbox), vec![b"b".to_vec()]);
    }

    #[test]
    fn recover_stranded_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let q = OfflineQueue::new(tmp.path().join("queue")).unwrap();
        // simulate a crash mid-drain: an entry sits in .drain
        let drain = tmp.path().join("queue/drafts/.drain");
        fs::create_dir_all(&drain).unwrap();
        fs::write(drain.join("0.eml"), b"stranded").unwrap();
        q.recover(QueueKind::Draft);
        assert_eq!(q.pop_all(QueueKind::Draft), vec![b"stranded".to_vec()]);
    }

    #[test]
    fn pop_on_empty_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let q = OfflineQueue::new(tmp.path().join("queue")).unwrap();
        assert!(q.pop_all(QueueKind::Draft).is_empty());
    }
}
