//! The versioned container envelope
//!
//! On-disk layout:
//! ```text
//! [8 bytes: magic "COFFERDB"][4 bytes: header length, LE]
//! [header: JSON, plaintext][sealed payload: nonce + ciphertext + tag]
//! ```
//!
//! The header stores the KDF and cipher parameters needed to re-derive
//! the key. It is plaintext but tamper-evident: the exact header bytes
//! are the AAD of the sealed payload, so editing any parameter breaks
//! the authentication tag. Version mismatches fail closed — a newer
//! format is refused, never best-effort parsed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use coffer_core::{CofferError, CofferResult};
use coffer_crypto::{KdfParams, SALT_SIZE};

pub const MAGIC: &[u8; 8] = b"COFFERDB";
pub const FORMAT_VERSION: u32 = 1;
pub const CIPHER_ID: &str = "xchacha20poly1305";
pub const KDF_ID: &str = "argon2id";

/// Sanity cap on the header length field, to reject garbage early.
const MAX_HEADER_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub version: u32,
    pub cipher: String,
    pub kdf: KdfHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfHeader {
    pub algorithm: String,
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    /// base64
    pub salt: String,
}

impl EnvelopeHeader {
    pub fn new(kdf: &KdfParams) -> Self {
        Self {
            version: FORMAT_VERSION,
            cipher: CIPHER_ID.to_string(),
            kdf: KdfHeader {
                algorithm: KDF_ID.to_string(),
                mem_cost_kib: kdf.mem_cost_kib,
                time_cost: kdf.time_cost,
                parallelism: kdf.parallelism,
                salt: BASE64.encode(kdf.salt),
            },
        }
    }

    /// Reconstruct KDF parameters from the header. Any inconsistency is
    /// a corrupt-file condition: the parameters came from the file, not
    /// from the caller.
    pub fn kdf_params(&self) -> CofferResult<KdfParams> {
        if self.kdf.algorithm != KDF_ID {
            return Err(CofferError::CorruptFile(format!(
                "unsupported KDF: {}",
                self.kdf.algorithm
            )));
        }
        let salt_bytes = BASE64
            .decode(&self.kdf.salt)
            .map_err(|_| CofferError::CorruptFile("salt is not valid base64".into()))?;
        let salt: [u8; SALT_SIZE] = salt_bytes
            .try_into()
            .map_err(|_| CofferError::CorruptFile("salt has wrong length".into()))?;
        Ok(KdfParams {
            mem_cost_kib: self.kdf.mem_cost_kib,
            time_cost: self.kdf.time_cost,
            parallelism: self.kdf.parallelism,
            salt,
        })
    }
}

/// Assemble the full container: magic, header length, header, sealed
/// payload. Returns the container and the exact header bytes used (the
/// caller seals with those bytes as AAD *before* assembling).
pub fn encode_header(header: &EnvelopeHeader) -> CofferResult<Vec<u8>> {
    serde_json::to_vec(header)
        .map_err(|e| CofferError::Validation(format!("header serialization: {e}")))
}

pub fn assemble(header_bytes: &[u8], sealed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header_bytes.len() + sealed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(header_bytes);
    out.extend_from_slice(sealed);
    out
}

/// Split a container into its parsed header, the raw header bytes (for
/// AAD verification), and the sealed payload. All failures here are
/// structural (`CorruptFile`) — no key material is involved yet.
pub fn disassemble(container: &[u8]) -> CofferResult<(EnvelopeHeader, &[u8], &[u8])> {
    if container.len() < MAGIC.len() + 4 {
        return Err(CofferError::CorruptFile("file too short".into()));
    }
    let (magic, rest) = container.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(CofferError::CorruptFile("not a coffer database".into()));
    }
    let (len_bytes, rest) = rest.split_at(4);
    let header_len = u32::from_le_bytes(len_bytes.try_into().expect("4 bytes")) as usize;
    if header_len > MAX_HEADER_LEN || header_len > rest.len() {
        return Err(CofferError::CorruptFile("header length out of range".into()));
    }
    let (header_bytes, sealed) = rest.split_at(header_len);

    let header: EnvelopeHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| CofferError::CorruptFile(format!("malformed header: {e}")))?;

    if header.version > FORMAT_VERSION {
        return Err(CofferError::CorruptFile(format!(
            "format version {} is newer than supported ({})",
            header.version, FORMAT_VERSION
        )));
    }
    if header.cipher != CIPHER_ID {
        return Err(CofferError::CorruptFile(format!(
            "unsupported cipher: {}",
            header.cipher
        )));
    }

    Ok((header, header_bytes, sealed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
            salt: [9u8; SALT_SIZE],
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let params = sample_params();
        let header = EnvelopeHeader::new(&params);
        let bytes = encode_header(&header).unwrap();
        let container = assemble(&bytes, b"sealed-payload");

        let (parsed, header_bytes, sealed) = disassemble(&container).unwrap();
        assert_eq!(header_bytes, bytes.as_slice());
        assert_eq!(sealed, b"sealed-payload");
        assert_eq!(parsed.kdf_params().unwrap(), params);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let result = disassemble(b"NOTADB!!\x00\x00\x00\x00rest");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_truncated_is_corrupt() {
        assert!(matches!(
            disassemble(b"COF"),
            Err(CofferError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_newer_version_fails_closed() {
        let mut header = EnvelopeHeader::new(&sample_params());
        header.version = FORMAT_VERSION + 1;
        let bytes = encode_header(&header).unwrap();
        let container = assemble(&bytes, b"");

        let result = disassemble(&container);
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_header_length_out_of_range_is_corrupt() {
        let mut container = Vec::new();
        container.extend_from_slice(MAGIC);
        container.extend_from_slice(&u32::MAX.to_le_bytes());
        container.extend_from_slice(b"short");

        assert!(matches!(
            disassemble(&container),
            Err(CofferError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_unknown_cipher_is_corrupt() {
        let mut header = EnvelopeHeader::new(&sample_params());
        header.cipher = "rot13".into();
        let bytes = encode_header(&header).unwrap();
        let container = assemble(&bytes, b"");

        assert!(matches!(
            disassemble(&container),
            Err(CofferError::CorruptFile(_))
        ));
    }
}
