//! Key derivation: composite key raw secret → Argon2id → master key
//!
//! Derivation is CPU-bound and deliberately slow; callers on a
//! latency-sensitive path must run it on a worker thread. There is no
//! cancellation — a derivation runs to completion and the result is
//! simply dropped if abandoned.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use std::time::Instant;
use zeroize::Zeroize;

use coffer_core::{CofferError, CofferResult};

use crate::{KEY_SIZE, SALT_SIZE};

/// Lowest permitted Argon2id time cost.
pub const MIN_ROUNDS: u32 = 1;
/// Highest permitted Argon2id time cost.
pub const MAX_ROUNDS: u32 = 64;

/// Benchmark refinement passes before settling on a round count.
const BENCHMARK_STEPS: u32 = 3;

/// A 256-bit master key derived from the composite key via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters plus the per-database salt.
///
/// The salt is regenerated whenever the KDF is (re)attached to a database;
/// it is stored in the envelope header and does not need to be secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Time cost / iterations
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
    /// Per-database salt
    pub salt: [u8; SALT_SIZE],
}

impl KdfParams {
    /// Fresh parameters with a random salt.
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            mem_cost_kib,
            time_cost,
            parallelism,
            salt: random_salt(),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(65536, 3, 4)
    }
}

fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// The key-derivation engine for one database.
#[derive(Debug, Clone)]
pub struct KdfEngine {
    params: KdfParams,
}

impl KdfEngine {
    /// Validates the time cost against [`MIN_ROUNDS`]..=[`MAX_ROUNDS`].
    pub fn new(params: KdfParams) -> CofferResult<Self> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&params.time_cost) {
            return Err(CofferError::Validation(format!(
                "KDF rounds {} outside {}..={}",
                params.time_cost, MIN_ROUNDS, MAX_ROUNDS
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    pub fn set_rounds(&mut self, rounds: u32) -> CofferResult<()> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&rounds) {
            return Err(CofferError::Validation(format!(
                "KDF rounds {rounds} outside {MIN_ROUNDS}..={MAX_ROUNDS}"
            )));
        }
        self.params.time_cost = rounds;
        Ok(())
    }

    /// Draw a fresh salt. Called whenever this KDF is (re)attached to a
    /// database, so two databases never share a salt.
    pub fn regenerate_salt(&mut self) {
        self.params.salt = random_salt();
    }

    /// Derive the master key from the composite key's raw secret.
    pub fn transform(&self, composite_raw: &[u8; KEY_SIZE]) -> CofferResult<MasterKey> {
        derive(composite_raw, &self.params)
    }

    /// Find the largest round count where one derivation takes roughly
    /// `target_ms` wall-clock milliseconds.
    ///
    /// One calibration run at the minimum cost gives a per-round estimate;
    /// the candidate is then re-measured and rescaled a fixed number of
    /// times and clamped into bounds. An unreachable target settles on the
    /// nearest bound instead of looping.
    pub fn benchmark(&self, target_ms: u64) -> u32 {
        let probe = [0x55u8; KEY_SIZE];
        let mut calibration = self.params.clone();
        calibration.time_cost = MIN_ROUNDS;

        let per_round = match timed_derive(&probe, &calibration) {
            Ok(ms) => ms.max(1),
            Err(_) => return MIN_ROUNDS,
        };

        let mut rounds = clamp_rounds(target_ms / per_round);
        for _ in 0..BENCHMARK_STEPS {
            calibration.time_cost = rounds;
            let elapsed = match timed_derive(&probe, &calibration) {
                Ok(ms) => ms.max(1),
                Err(_) => break,
            };
            // Close enough: within 10% of the target.
            if elapsed.abs_diff(target_ms) * 10 <= target_ms {
                break;
            }
            let next = clamp_rounds(u64::from(rounds) * target_ms / elapsed);
            if next == rounds {
                break;
            }
            rounds = next;
        }

        tracing::debug!(rounds, target_ms, "KDF benchmark settled");
        rounds
    }
}

fn clamp_rounds(rounds: u64) -> u32 {
    rounds.clamp(u64::from(MIN_ROUNDS), u64::from(MAX_ROUNDS)) as u32
}

fn timed_derive(raw: &[u8; KEY_SIZE], params: &KdfParams) -> CofferResult<u64> {
    let start = Instant::now();
    derive(raw, params)?;
    Ok(start.elapsed().as_millis() as u64)
}

fn derive(raw: &[u8; KEY_SIZE], params: &KdfParams) -> CofferResult<MasterKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CofferError::Validation(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(raw, &params.salt, &mut key)
        .map_err(|e| CofferError::Validation(format!("Argon2id derivation failed: {e}")))?;

    Ok(MasterKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fast params so tests stay quick
    fn test_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
            salt: [7u8; SALT_SIZE],
        }
    }

    #[test]
    fn test_transform_deterministic() {
        let engine = KdfEngine::new(test_params()).unwrap();
        let raw = [3u8; KEY_SIZE];

        let key1 = engine.transform(&raw).unwrap();
        let key2 = engine.transform(&raw).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_transform_salt_sensitive() {
        let engine1 = KdfEngine::new(test_params()).unwrap();
        let mut params2 = test_params();
        params2.salt = [8u8; SALT_SIZE];
        let engine2 = KdfEngine::new(params2).unwrap();
        let raw = [3u8; KEY_SIZE];

        assert_ne!(
            engine1.transform(&raw).unwrap().as_bytes(),
            engine2.transform(&raw).unwrap().as_bytes()
        );
    }

    #[test]
    fn test_rounds_out_of_bounds_rejected() {
        let mut params = test_params();
        params.time_cost = MAX_ROUNDS + 1;
        assert!(matches!(
            KdfEngine::new(params),
            Err(CofferError::Validation(_))
        ));

        let mut engine = KdfEngine::new(test_params()).unwrap();
        assert!(engine.set_rounds(0).is_err());
        assert!(engine.set_rounds(MAX_ROUNDS).is_ok());
    }

    #[test]
    fn test_regenerate_salt_changes_salt() {
        let mut engine = KdfEngine::new(test_params()).unwrap();
        let before = engine.params().salt;
        engine.regenerate_salt();
        assert_ne!(before, engine.params().salt);
    }

    #[test]
    fn test_benchmark_stays_in_bounds() {
        let engine = KdfEngine::new(test_params()).unwrap();

        // An unreachable target must settle on a bound, not loop.
        let rounds = engine.benchmark(0);
        assert!((MIN_ROUNDS..=MAX_ROUNDS).contains(&rounds));

        let rounds = engine.benchmark(1);
        assert!((MIN_ROUNDS..=MAX_ROUNDS).contains(&rounds));
    }
}
