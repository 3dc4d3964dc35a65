/*
 * crypto.rs
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

//! At-rest sealing for cached blobs. File format:
//! salt(16) || AES-256-CBC ciphertext || sha256(plaintext).
//! Key and IV come from PBKDF2-HMAC-SHA256 over the password with the
//! per-file random salt; the trailing digest detects wrong keys and
//! corruption on read.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const PBKDF2_ROUNDS: u32 = 4096;

#[derive(Debug, PartialEq, Eq)]
pub enum SealError {
    /// Sealed blob shorter than salt + digest, or padding invalid.
    Malformed,
    /// Plaintext digest mismatch: wrong password or corrupted file.
    Integrity,
}

impl std::fmt::Display for SealError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealError::Malformed => write!(f, "sealed blob is malformed"),
            SealError::Integrity => write!(f, "integrity check failed (wrong key or corrupted)"),
        }
    }
}

impl std::error::Error for SealError {}

fn derive_key_iv(password: &str, salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut okm = [0u8; KEY_LEN + IV_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut okm);
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&okm[..KEY_LEN]);
    iv.copy_from_slice(&okm[KEY_LEN..]);
    (key, iv)
}

/// Seal a plaintext blob with the password. A fresh random salt is drawn for
/// every call, so sealing the same blob twice yields different bytes.
pub fn seal(plaintext: &[u8], password: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    let _ = getrandom::getrandom(&mut salt);
    let (key, iv) = derive_key_iv(password, &salt);
    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let digest = Sha256::digest(plaintext);

    let mut out = Vec::with_capacity(SALT_LEN + ciphertext.len() + DIGEST_LEN);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&digest);
    out
}

/// Open a sealed blob. Returns the plaintext only when the trailing digest
/// matches.
pub fn open(sealed: &[u8], password: &str) -> Result<Vec<u8>, SealError> {
    if sealed.len() < SALT_LEN + DIGEST_LEN {
        return Err(SealError::Malformed);
    }
    let salt = &sealed[..SALT_LEN];
    let ciphertext = &sealed[SALT_LEN..sealed.len() - DIGEST_LEN];
    let expected = &sealed[sealed.len() - DIGEST_LEN..];

    let (key, iv) = derive_key_iv(password, salt);
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| SealError::Malformed)?;

    let digest = Sha256::digest(&plaintext);
    if digest.as_slice() != expected {
        return Err(SealError::Integrity);
    }
    Ok(plaintext)
}

/// Hex SHA-256 of a folder name, used as its on-disk directory name.
pub fn folder_dir_name(folder: &str) -> String {
    let digest = Sha256::digest(folder.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let blob = b"raw message payload";
        let sealed = seal(blob, "hunter2");
        assert_ne!(sealed, blob.to_vec());
        assert_eq!(open(&sealed, "hunter2").unwrap(), blob.to_vec());
    }

    #[test]
    fn wrong_password_fails() {
        let sealed = seal(b"secret mail", "right");
        let err = open(&sealed, "wrong").unwrap_err();
        assert!(matches!(err, SealError::Integrity | SealError::Malformed));
    }

    #[test]
    fn fresh_salt_every_seal() {
        let a = seal(b"same", "pw");
        let b = seal(b"same", "pw");
        assert_ne!(a, b);
        assert_eq!(open(&a, "pw").unwrap(), open(&b, "pw").unwrap());
    }

    #[test]
    fn truncated_blob_is_malformed() {
        assert_eq!(open(b"short", "pw").unwrap_err(), SealError::Malformed);
    }

    #[test]
    fn folder_dir_is_hex_sha256() {
        let name = folder_dir_name("INBOX");
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(folder_dir_name("INBOX"), folder_dir_name("Sent"));
    }
}
