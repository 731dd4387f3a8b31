//! Module manifests
//!
//! A manifest names a module, pins its content digest and declares the
//! capabilities it needs. Every field except the signature is covered by the
//! signature: the canonical signing bytes are a domain prefix followed by the
//! bincode encoding of [`UnsignedManifest`], so changing any field invalidates
//! the signature by construction.

use ed25519_dalek::{Signature, VerifyingKey};
use keystone_core::time::add_duration;
use keystone_core::{hash, CapabilitySet, ContentDigest, ModuleId, Result, TimestampMs, TrustError};
use keystone_vault::ManifestSigner;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Domain separation prefix for manifest signatures
pub const MANIFEST_SIGNING_DOMAIN: &[u8] = b"keystone.manifest.v1";

/// Manifest fields covered by the signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedManifest {
    /// Module name, also its registry identity
    pub name: String,
    /// Module version string
    pub version: String,
    /// SHA-256 digest of the module bytes
    pub content_hash: ContentDigest,
    /// Capabilities the module declares
    pub required_capabilities: CapabilitySet,
    /// Public key of the signer; selects the trust anchor
    pub signer: VerifyingKey,
    /// Whether non-expiring tokens may be issued to this module
    pub allow_persistent_token: bool,
    /// Declared memory budget in bytes
    pub memory_bytes: u64,
    /// When the manifest was produced
    pub issued_at: TimestampMs,
    /// Validity window after `issued_at`; `None` never lapses
    pub expiry_secs: Option<u64>,
}

impl UnsignedManifest {
    /// Canonical bytes the signature covers
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| TrustError::serialization(format!("manifest encoding failed: {e}")))?;
        let mut bytes = Vec::with_capacity(MANIFEST_SIGNING_DOMAIN.len() + body.len());
        bytes.extend_from_slice(MANIFEST_SIGNING_DOMAIN);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Sign with the offline signer
    ///
    /// The `signer` field is overwritten with the signer's public key.
    pub fn sign(mut self, signer: &ManifestSigner) -> Result<ModuleManifest> {
        self.signer = signer.public_key();
        let signature = signer.sign(&self.signing_bytes()?);
        Ok(ModuleManifest {
            name: self.name,
            version: self.version,
            content_hash: self.content_hash,
            required_capabilities: self.required_capabilities,
            signer: self.signer,
            allow_persistent_token: self.allow_persistent_token,
            memory_bytes: self.memory_bytes,
            issued_at: self.issued_at,
            expiry_secs: self.expiry_secs,
            signature,
        })
    }
}

/// Signed module manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name, also its registry identity
    pub name: String,
    /// Module version string
    pub version: String,
    /// SHA-256 digest of the module bytes
    pub content_hash: ContentDigest,
    /// Capabilities the module declares
    pub required_capabilities: CapabilitySet,
    /// Public key of the signer; selects the trust anchor
    pub signer: VerifyingKey,
    /// Whether non-expiring tokens may be issued to this module
    pub allow_persistent_token: bool,
    /// Declared memory budget in bytes
    pub memory_bytes: u64,
    /// When the manifest was produced
    pub issued_at: TimestampMs,
    /// Validity window after `issued_at`; `None` never lapses
    pub expiry_secs: Option<u64>,
    /// Ed25519 signature over [`UnsignedManifest::signing_bytes`]
    pub signature: Signature,
}

impl ModuleManifest {
    /// The signed portion of this manifest
    pub fn unsigned(&self) -> UnsignedManifest {
        UnsignedManifest {
            name: self.name.clone(),
            version: self.version.clone(),
            content_hash: self.content_hash,
            required_capabilities: self.required_capabilities,
            signer: self.signer,
            allow_persistent_token: self.allow_persistent_token,
            memory_bytes: self.memory_bytes,
            issued_at: self.issued_at,
            expiry_secs: self.expiry_secs,
        }
    }

    /// Canonical bytes the signature covers
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        self.unsigned().signing_bytes()
    }

    /// Registry identity of the module
    pub fn module_id(&self) -> ModuleId {
        ModuleId::new(self.name.as_str())
    }

    /// Last instant the manifest is valid, if it lapses at all
    pub fn valid_until(&self) -> Option<TimestampMs> {
        self.expiry_secs
            .map(|secs| add_duration(self.issued_at, Duration::from_secs(secs)))
    }

    /// Whether the validity window has passed at `now`
    pub fn is_expired_at(&self, now: TimestampMs) -> bool {
        self.valid_until().is_some_and(|until| now > until)
    }
}

/// Build-time helper for producing signed manifests
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    name: String,
    version: String,
    capabilities: CapabilitySet,
    allow_persistent_token: bool,
    memory_bytes: u64,
    issued_at: TimestampMs,
    expiry_secs: Option<u64>,
}

impl ManifestBuilder {
    /// Start a manifest for `name` at `version`
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            capabilities: CapabilitySet::empty(),
            allow_persistent_token: false,
            memory_bytes: 1024 * 1024,
            issued_at: 0,
            expiry_secs: None,
        }
    }

    /// Declare capabilities
    pub fn capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Permit non-expiring tokens
    pub fn allow_persistent_token(mut self, allow: bool) -> Self {
        self.allow_persistent_token = allow;
        self
    }

    /// Declared memory budget
    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// Production time stamped into the manifest
    pub fn issued_at(mut self, at: TimestampMs) -> Self {
        self.issued_at = at;
        self
    }

    /// Let the manifest lapse `secs` seconds after it was issued
    pub fn expiry_secs(mut self, secs: u64) -> Self {
        self.expiry_secs = Some(secs);
        self
    }

    /// Unsigned manifest pinning `payload`
    pub fn unsigned_for(self, payload: &[u8], signer: VerifyingKey) -> UnsignedManifest {
        UnsignedManifest {
            name: self.name,
            version: self.version,
            content_hash: hash::hash(payload),
            required_capabilities: self.capabilities,
            signer,
            allow_persistent_token: self.allow_persistent_token,
            memory_bytes: self.memory_bytes,
            issued_at: self.issued_at,
            expiry_secs: self.expiry_secs,
        }
    }

    /// Hash `payload` and sign the manifest
    pub fn sign_for(self, payload: &[u8], signer: &ManifestSigner) -> Result<ModuleManifest> {
        self.unsigned_for(payload, signer.public_key()).sign(signer)
    }
}
