//! Authenticated sealing of the serialized node tree
//!
//! Sealed format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = the envelope header bytes (KDF + cipher parameters)
//! ```
//!
//! Binding the header as AAD means any tampering with the stored
//! parameters invalidates the tag, even though the header itself is
//! plaintext.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use coffer_core::{CofferError, CofferResult};

use crate::kdf::MasterKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Seal a plaintext container under the master key.
///
/// Returns `[24-byte nonce][ciphertext][16-byte tag]`.
pub fn seal(plaintext: &[u8], key: &MasterKey, header: &[u8]) -> CofferResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: header,
            },
        )
        .map_err(|e| CofferError::Validation(format!("sealing failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Unseal a container sealed by [`seal`].
///
/// Failure taxonomy: input too short to hold a nonce and tag is a
/// structural problem (`CorruptFile`); an authentication failure means
/// the derived key or the header does not match (`Auth`), which the
/// caller reports as "wrong password or key file".
pub fn unseal(sealed: &[u8], key: &MasterKey, header: &[u8]) -> CofferResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CofferError::CorruptFile(format!(
            "sealed payload too short: {} bytes",
            sealed.len()
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| CofferError::Auth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn test_key(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let key = test_key(42);
        let header = b"header-v1";
        let plaintext = b"the quick brown fox";

        let sealed = seal(plaintext, &key, header).unwrap();
        let opened = unseal(&sealed, &key, header).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_unseal_wrong_key_is_auth_error() {
        let header = b"header-v1";
        let sealed = seal(b"secret", &test_key(1), header).unwrap();

        let result = unseal(&sealed, &test_key(2), header);
        assert!(matches!(result, Err(CofferError::Auth)));
    }

    #[test]
    fn test_unseal_tampered_header_is_auth_error() {
        let key = test_key(42);
        let sealed = seal(b"secret", &key, b"header-v1").unwrap();

        // Parameter tampering breaks the tag even with the right key.
        let result = unseal(&sealed, &key, b"header-v2");
        assert!(matches!(result, Err(CofferError::Auth)));
    }

    #[test]
    fn test_unseal_tampered_ciphertext_is_auth_error() {
        let key = test_key(42);
        let header = b"header-v1";
        let mut sealed = seal(b"secret", &key, header).unwrap();
        sealed[NONCE_SIZE + 2] ^= 0xFF;

        let result = unseal(&sealed, &key, header);
        assert!(matches!(result, Err(CofferError::Auth)));
    }

    #[test]
    fn test_unseal_truncated_is_corrupt_file() {
        let key = test_key(42);
        let result = unseal(&[0u8; 10], &key, b"header-v1");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_sealed_size() {
        let key = test_key(42);
        let sealed = seal(&[0u8; 1000], &key, b"h").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 1000 + TAG_SIZE);
    }
}
