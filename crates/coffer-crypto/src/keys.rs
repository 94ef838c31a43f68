//! Key factors and their combination into a composite key
//!
//! A factor contributes a fixed 256-bit digest; the composite key hashes
//! the concatenation of all factor digests in insertion order, so the
//! same factors in the same order always reproduce the same raw key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::path::Path;
use zeroize::Zeroize;

use coffer_core::{CofferError, CofferResult};

use crate::KEY_SIZE;

/// One authentication factor. Implementations digest their secret material
/// into a fixed 256-bit value; the secret itself never leaves the factor.
pub trait KeyFactor: Send + Sync {
    fn raw_key(&self) -> [u8; KEY_SIZE];
}

/// Password factor: SHA-256 of the UTF-8 password.
pub struct PasswordKey {
    digest: [u8; KEY_SIZE],
}

impl PasswordKey {
    pub fn new(password: SecretString) -> Self {
        let digest = Sha256::digest(password.expose_secret().as_bytes());
        Self {
            digest: digest.into(),
        }
    }
}

impl KeyFactor for PasswordKey {
    fn raw_key(&self) -> [u8; KEY_SIZE] {
        self.digest
    }
}

impl Drop for PasswordKey {
    fn drop(&mut self) {
        self.digest.zeroize();
    }
}

impl std::fmt::Debug for PasswordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordKey")
            .field("digest", &"[REDACTED]")
            .finish()
    }
}

/// Key-file factor: SHA-256 of the decoded key material on disk.
///
/// Creation and loading are two distinct steps. A missing file can be
/// created with fresh random material via [`KeyfileKey::create`], but the
/// factor is only usable after a successful [`KeyfileKey::load`].
pub struct KeyfileKey {
    digest: [u8; KEY_SIZE],
}

impl KeyfileKey {
    /// Write a fresh key file: 32 random bytes, base64, single line.
    ///
    /// Fails with `Conflict` if the path already exists.
    pub fn create(path: &Path) -> CofferResult<()> {
        if path.exists() {
            return Err(CofferError::Conflict(format!(
                "key file already exists: {}",
                path.display()
            )));
        }
        let mut material = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut material);
        let encoded = BASE64.encode(material);
        material.zeroize();
        std::fs::write(path, encoded + "\n")?;
        tracing::info!(path = %path.display(), "key file created");
        Ok(())
    }

    /// Load a key file written by [`KeyfileKey::create`].
    pub fn load(path: &Path) -> CofferResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut material = BASE64.decode(content.trim()).map_err(|_| {
            CofferError::Validation(format!("key file is not valid base64: {}", path.display()))
        })?;
        if material.len() != KEY_SIZE {
            material.zeroize();
            return Err(CofferError::Validation(format!(
                "key file has wrong size: {}",
                path.display()
            )));
        }
        let digest = Sha256::digest(&material);
        material.zeroize();
        Ok(Self {
            digest: digest.into(),
        })
    }
}

impl KeyFactor for KeyfileKey {
    fn raw_key(&self) -> [u8; KEY_SIZE] {
        self.digest
    }
}

impl Drop for KeyfileKey {
    fn drop(&mut self) {
        self.digest.zeroize();
    }
}

impl std::fmt::Debug for KeyfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyfileKey")
            .field("digest", &"[REDACTED]")
            .finish()
    }
}

/// Ordered combination of key factors.
///
/// An empty composite key is invalid: every database operation that would
/// seal or unseal checks [`CompositeKey::is_empty`] first and fails with
/// `NoKey` before any key derivation runs.
#[derive(Default)]
pub struct CompositeKey {
    factors: Vec<Box<dyn KeyFactor>>,
}

impl CompositeKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, factor: Box<dyn KeyFactor>) {
        self.factors.push(factor);
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Combine all factor digests: SHA-256 over their concatenation, in
    /// insertion order. Deterministic for a given factor sequence.
    pub fn raw_key(&self) -> CofferResult<[u8; KEY_SIZE]> {
        if self.is_empty() {
            return Err(CofferError::NoKey);
        }
        let mut hasher = Sha256::new();
        for factor in &self.factors {
            let mut digest = factor.raw_key();
            hasher.update(digest);
            digest.zeroize();
        }
        Ok(hasher.finalize().into())
    }
}

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeKey")
            .field("factors", &self.factors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_key(pw: &str) -> Box<dyn KeyFactor> {
        Box::new(PasswordKey::new(SecretString::from(pw.to_string())))
    }

    #[test]
    fn test_raw_key_deterministic() {
        let mut key1 = CompositeKey::new();
        key1.add_key(password_key("hunter2"));
        let mut key2 = CompositeKey::new();
        key2.add_key(password_key("hunter2"));

        assert_eq!(key1.raw_key().unwrap(), key2.raw_key().unwrap());
        // repeated derivation on the same key is stable
        assert_eq!(key1.raw_key().unwrap(), key1.raw_key().unwrap());
    }

    #[test]
    fn test_raw_key_order_dependent() {
        let mut ab = CompositeKey::new();
        ab.add_key(password_key("a"));
        ab.add_key(password_key("b"));
        let mut ba = CompositeKey::new();
        ba.add_key(password_key("b"));
        ba.add_key(password_key("a"));

        assert_ne!(ab.raw_key().unwrap(), ba.raw_key().unwrap());
    }

    #[test]
    fn test_empty_composite_key_rejected() {
        let key = CompositeKey::new();
        assert!(key.is_empty());
        assert!(matches!(key.raw_key(), Err(CofferError::NoKey)));
    }

    #[test]
    fn test_keyfile_create_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffer.key");

        KeyfileKey::create(&path).unwrap();
        let loaded1 = KeyfileKey::load(&path).unwrap();
        let loaded2 = KeyfileKey::load(&path).unwrap();

        assert_eq!(loaded1.raw_key(), loaded2.raw_key());
    }

    #[test]
    fn test_keyfile_create_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffer.key");
        std::fs::write(&path, "existing").unwrap();

        let result = KeyfileKey::create(&path);
        assert!(matches!(result, Err(CofferError::Conflict(_))));
    }

    #[test]
    fn test_keyfile_load_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = KeyfileKey::load(&dir.path().join("absent.key"));
        assert!(matches!(result, Err(CofferError::Io(_))));
    }

    #[test]
    fn test_keyfile_load_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        std::fs::write(&path, "not base64 at all!!").unwrap();

        let result = KeyfileKey::load(&path);
        assert!(matches!(result, Err(CofferError::Validation(_))));
    }

    #[test]
    fn test_password_and_keyfile_combine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffer.key");
        KeyfileKey::create(&path).unwrap();

        let mut pw_only = CompositeKey::new();
        pw_only.add_key(password_key("hunter2"));

        let mut both = CompositeKey::new();
        both.add_key(password_key("hunter2"));
        both.add_key(Box::new(KeyfileKey::load(&path).unwrap()));

        assert_ne!(pw_only.raw_key().unwrap(), both.raw_key().unwrap());
    }
}
