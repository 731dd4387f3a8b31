//! Keystone Vault - key custody for the trust chain
//!
//! The [`Vault`] owns the token-authority signing key, the master secret for
//! context key derivation and the entropy pool, and keeps the audit trail of
//! boot measurement and trust-anchor changes. Manifests are signed off-line by
//! [`ManifestSigner`]; the vault only verifies them.

#![forbid(unsafe_code)]

/// Vault audit trail
pub mod audit;

/// Entropy pool
pub mod entropy;

/// HKDF key derivation
pub mod key_derivation;

/// Offline manifest signing
pub mod signer;

/// Vault implementation
pub mod vault;

pub use audit::{AuditEvent, AuditRecord};
pub use ed25519_dalek::{Signature, VerifyingKey};
pub use entropy::{EntropyMode, EntropyPool};
pub use key_derivation::{DerivedKey, KeyContext, KeyUsage};
pub use signer::ManifestSigner;
pub use vault::{verify_signature, MeasurementRecord, SigningGrant, Vault, VaultBuilder};
