//! Key test helpers
//!
//! Deterministic manifest signers so that tests can reproduce trust anchors
//! across runs.

use keystone_vault::{ManifestSigner, VerifyingKey};
use sha2::{Digest, Sha256};

/// Manifest signing key fixture
#[derive(Debug)]
pub struct KeyTestFixture {
    signer: ManifestSigner,
    key_id: String,
}

impl KeyTestFixture {
    /// Fixture from a fixed 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signer = ManifestSigner::from_seed(seed);
        let key_id = format!("key_{}", &hex::encode(signer.public_key().as_bytes())[..16]);
        Self { signer, key_id }
    }

    /// Fixture from a seed string, hashed to 32 bytes
    pub fn from_seed_string(seed: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        Self::from_seed(&digest)
    }

    /// The signer
    pub fn signer(&self) -> &ManifestSigner {
        &self.signer
    }

    /// Public key to install as a trust anchor
    pub fn public_key(&self) -> VerifyingKey {
        self.signer.public_key()
    }

    /// Short printable identifier
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// The signer most tests trust
pub fn trusted_signer() -> KeyTestFixture {
    KeyTestFixture::from_seed_string("keystone-trusted-signer")
}

/// A signer no fixture installs as an anchor
pub fn rogue_signer() -> KeyTestFixture {
    KeyTestFixture::from_seed_string("keystone-rogue-signer")
}
