//! Entropy pool
//!
//! A ChaCha20 CSPRNG seeded once from the loader's entropy seed, mixed with
//! operating-system entropy unless the pool is built deterministically for
//! tests. The seed passes through a domain-separated SHA-256 so neither input
//! is used raw.

use keystone_core::{EntropySeed, Result, TrustError};
use rand::rngs::OsRng;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

const POOL_DOMAIN: &[u8] = b"keystone:entropy-pool:v1";

/// Where the pool's seed material comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyMode {
    /// Loader seed mixed with OS entropy
    Mixed,
    /// Loader seed only; reproducible, for tests and simulation
    Deterministic,
}

/// CSPRNG owned by the vault
pub struct EntropyPool {
    rng: ChaCha20Rng,
}

impl EntropyPool {
    /// Seed a new pool
    pub fn seed(loader_seed: &EntropySeed, mode: EntropyMode) -> Result<Self> {
        let mut os_entropy = [0u8; 32];
        if mode == EntropyMode::Mixed {
            OsRng
                .try_fill_bytes(&mut os_entropy)
                .map_err(|e| TrustError::key_derivation(format!("OS entropy unavailable: {e}")))?;
        }

        let mut hasher = Sha256::new();
        hasher.update(POOL_DOMAIN);
        hasher.update(loader_seed.as_bytes());
        hasher.update(os_entropy);
        let mut seed: [u8; 32] = hasher.finalize().into();
        os_entropy.zeroize();

        let rng = ChaCha20Rng::from_seed(seed);
        seed.zeroize();
        Ok(Self { rng })
    }

    /// Fill a buffer with random bytes
    pub fn fill(&mut self, out: &mut [u8]) {
        self.rng.fill_bytes(out);
    }

    /// Draw 32 random bytes
    pub fn bytes32(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.rng.fill_bytes(&mut out);
        out
    }

    /// Draw a random u64
    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// Replace the generator state with a fixed all-zero seed
    pub(crate) fn wipe(&mut self) {
        self.rng = ChaCha20Rng::from_seed([0u8; 32]);
    }
}

impl std::fmt::Debug for EntropyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EntropyPool(<redacted>)")
    }
}

impl Drop for EntropyPool {
    fn drop(&mut self) {
        self.wipe();
    }
}
