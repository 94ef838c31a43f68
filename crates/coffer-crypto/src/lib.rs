//! coffer-crypto: the unlock protocol for a coffer database
//!
//! Pipeline: key factors → composite key → Argon2id → master key → AEAD seal
//!
//! ```text
//! PasswordKey ─┐
//! KeyfileKey ──┤ CompositeKey::raw_key()   (SHA-256 over factor digests)
//!              └──► Argon2id(salt, cost)   (KdfEngine::transform)
//!                     └──► MasterKey (256-bit)
//!                            └──► XChaCha20-Poly1305 seal/unseal
//!                                 (AAD = envelope header, so parameter
//!                                  tampering invalidates the tag)
//! ```

pub mod kdf;
pub mod keys;
pub mod seal;

pub use kdf::{KdfEngine, KdfParams, MasterKey, MAX_ROUNDS, MIN_ROUNDS};
pub use keys::{CompositeKey, KeyFactor, KeyfileKey, PasswordKey};
pub use seal::{seal, unseal};

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;
