//! Offline manifest signer
//!
//! Build-time counterpart of the kernel's manifest verification. It lives
//! outside the [`Vault`](crate::Vault) so the kernel-resident key custody
//! never gains a manifest-signing path.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;
use std::fmt;

/// Ed25519 key used by the packaging tool to sign module manifests
pub struct ManifestSigner {
    key: SigningKey,
}

impl ManifestSigner {
    /// Generate a fresh signer
    pub fn generate<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self {
            key: SigningKey::generate(rng),
        }
    }

    /// Signer from a fixed 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Public key to install as a manifest trust anchor
    pub fn public_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign canonical manifest bytes
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(message)
    }
}

impl fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("public_key", &hex::encode(self.public_key().as_bytes()))
            .finish_non_exhaustive()
    }
}
