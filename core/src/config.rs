/*
 * config.rs
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

//! Engine configuration: a key=value file under the application directory.
//! The password never lives in that file; with save_pass=1 it is sealed into
//! a separate `pass` file with XChaCha20-Poly1305 under a generated `.key`
//! file (mode 0o600). Unknown keys survive a round trip.

use std::fs;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::XChaCha20Poly1305;

use crate::model::PrefetchLevel;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

const PASS_MAGIC: &[u8] = b"LTPW1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub name: String,
    pub user: String,
    /// Runtime-only; never written to the config file.
    pub pass: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub inbox: String,
    pub sent: String,
    pub drafts: String,
    pub trash: String,
    pub cache_encrypt: bool,
    pub save_pass: bool,
    pub prefetch_level: PrefetchLevel,
    pub client_store_sent: bool,
    /// Seconds between compose backups; 0 disables.
    pub compose_backup_interval: u64,
    /// Start disconnected.
    pub offline: bool,
    /// Keys this version does not know, preserved verbatim on save.
    unknown: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            name: String::new(),
            user: String::new(),
            pass: String::new(),
            imap_host: String::new(),
            imap_port: 993,
            smtp_host: String::new(),
            smtp_port: 465,
            inbox: "INBOX".to_string(),
            sent: "Sent".to_string(),
            drafts: "Drafts".to_string(),
            trash: "Trash".to_string(),
            cache_encrypt: true,
            save_pass: false,
            prefetch_level: PrefetchLevel::CurrentView,
            client_store_sent: true,
            compose_backup_interval: 10,
            offline: false,
            unknown: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a key=value config file. Missing file yields defaults.
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut config = Config::default();
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(config),
            Err(e) => return Err(e),
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "address" => config.address = value.to_string(),
                "name" => config.name = value.to_string(),
                "user" => config.user = value.to_string(),
                "imap_host" => config.imap_host = value.to_string(),
                "imap_port" => config.imap_port = value.parse().unwrap_or(993),
                "smtp_host" => config.smtp_host = value.to_string(),
                "smtp_port" => config.smtp_port = value.parse().unwrap_or(465),
                "inbox" => config.inbox = value.to_string(),
                "sent" => config.sent = value.to_string(),
                "drafts" => config.drafts = value.to_string(),
                "trash" => config.trash = value.to_string(),
                "cache_encrypt" => config.cache_encrypt = value == "1",
                "save_pass" => config.save_pass = value == "1",
                "prefetch_level" => {
                    config.prefetch_level = PrefetchLevel::from_config(value.parse().unwrap_or(2))
                }
                "client_store_sent" => config.client_store_sent = value == "1",
                "compose_backup_interval" => {
                    config.compose_backup_interval = value.parse().unwrap_or(10)
                }
                "offline" => config.offline = value == "1",
                _ => config.unknown.push((key.to_string(), value.to_string())),
            }
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut text = String::new();
        text.push_str(&format!("address={}\n", self.address));
        text.push_str(&format!("name={}\n", self.name));
        text.push_str(&format!("user={}\n", self.user));
        text.push_str(&format!("imap_host={}\n", self.imap_host));
        text.push_str(&format!("imap_port={}\n", self.imap_port));
        text.push_str(&format!("smtp_host={}\n", self.smtp_host));
        text.push_str(&format!("smtp_port={}\n", self.smtp_port));
        text.push_str(&format!("inbox={}\n", self.inbox));
        text.push_str(&format!("sent={}\n", self.sent));
        text.push_str(&format!("drafts={}\n", self.drafts));
        text.push_str(&format!("trash={}\n", self.trash));
        text.push_str(&format!("cache_encrypt={}\n", self.cache_encrypt as u8));
        text.push_str(&format!("save_pass={}\n", self.save_pass as u8));
        text.push_str(&format!("prefetch_level={}\n", self.prefetch_level as u8));
        text.push_str(&format!(
            "client_store_sent={}\n",
            self.client_store_sent as u8
        ));
        text.push_str(&format!(
            "compose_backup_interval={}\n",
            self.compose_backup_interval
        ));
        text.push_str(&format!("offline={}\n", self.offline as u8));
        for (key, value) in &self.unknown {
            text.push_str(&format!("{}={}\n", key, value));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)
    }
}

fn key_path(dir: &Path) -> std::path::PathBuf {
    dir.join(".key")
}

fn pass_path(dir: &Path) -> std::path::PathBuf {
    dir.join("pass")
}

fn read_key(path: &Path) -> io::Result<[u8; KEY_LEN]> {
    let buf = fs::read(path)?;
    if buf.len() != KEY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "key file has wrong length",
        ));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&buf);
    Ok(key)
}

fn get_or_create_key(dir: &Path) -> io::Result<[u8; KEY_LEN]> {
    let path = key_path(dir);
    match read_key(&path) {
        Ok(key) => return Ok(key),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    let _ = fs::set_permissions(dir, PermissionsExt::from_mode(0o700));
    let mut key = [0u8; KEY_LEN];
    getrandom::getrandom(&mut key)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let mut f = open_private(&path)?;
    f.write_all(&key)?;
    f.flush()?;
    Ok(key)
}

fn open_private(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .mode(0o600)
            .open(path)
    }
    #[cfg(not(unix))]
    {
        File::create(path)
    }
}

/// Seal the password into `<dir>/pass` under the generated key file.
pub fn save_password(dir: &Path, pass: &str) -> io::Result<()> {
    let key = get_or_create_key(dir)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, pass.as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let mut f = open_private(&pass_path(dir))?;
    f.write_all(PASS_MAGIC)?;
    f.write_all(nonce.as_slice())?;
    f.write_all(&ciphertext)?;
    f.flush()?;
    Ok(())
}

/// Load the sealed password, if present and intact.
pub fn load_password(dir: &Path) -> Option<String> {
    let raw = fs::read(pass_path(dir)).ok()?;
    if !raw.starts_with(PASS_MAGIC) || raw.len() < PASS_MAGIC.len() + NONCE_LEN + 16 {
        return None;
    }
    let key = read_key(&key_path(dir)).ok()?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key).ok()?;
    let nonce_slice = &raw[PASS_MAGIC.len()..PASS_MAGIC.len() + NONCE_LEN];
    let nonce = chacha20poly1305::XNonce::from_slice(nonce_slice);
    let plain = cipher
        .decrypt(nonce, &raw[PASS_MAGIC.len() + NONCE_LEN..])
        .ok()?;
    String::from_utf8(plain).ok()
}

/// Remove the sealed password and its key.
pub fn forget_password(dir: &Path) {
    let _ = fs::remove_file(pass_path(dir));
    let _ = fs::remove_file(key_path(dir));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let c = Config::load(&tmp.path().join("config")).unwrap();
        assert_eq!(c.inbox, "INBOX");
        assert_eq!(c.imap_port, 993);
        assert!(c.cache_encrypt);
        assert!(!c.offline);
    }

    #[test]
    fn round_trip_preserves_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        fs::write(
            &path,
            "address=me@x.test\nimap_host=mail.x.test\nprefetch_level=3\nfuture_option=7\n",
        )
        .unwrap();
        let c = Config::load(&path).unwrap();
        assert_eq!(c.address, "me@x.test");
        assert_eq!(c.prefetch_level, PrefetchLevel::FullSync);
        c.save(&path).unwrap();
        let again = Config::load(&path).unwrap();
        assert_eq!(again.address, "me@x.test");
        assert_eq!(again.unknown, vec![("future_option".to_string(), "7".to_string())]);
    }

    #[test]
    fn pass_never_written() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        let mut c = Config::default();
        c.pass = "secret".to_string();
        c.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("secret"));
    }

    #[test]
    fn password_seal_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        save_password(tmp.path(), "hunter2").unwrap();
        assert_eq!(load_password(tmp.path()).as_deref(), Some("hunter2"));
        forget_password(tmp.path());
        assert!(load_password(tmp.path()).is_none());
    }

    #[test]
    fn tampered_pass_file_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        save_password(tmp.path(), "hunter2").unwrap();
        let path = tmp.path().join("pass");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        fs::write(&path, raw).unwrap();
        assert!(load_password(tmp.path()).is_none());
    }
}
