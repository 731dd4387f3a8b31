//! Manifest verification
//!
//! Admission runs in a fixed order: content digest, signature against the
//! trust anchor the manifest names, non-empty capability set, then policy
//! bounds, including the manifest's own validity window. The first failing
//! step decides the error. Only a manifest that passes every step becomes a
//! [`VerifiedManifest`].

use keystone_core::config::ManifestPolicy;
use keystone_core::{
    hash, CapabilitySet, ContentDigest, ModuleId, PhysicalClock, Result, TimestampMs, TrustError,
};
use keystone_vault::{Vault, VerifyingKey};
use std::sync::Arc;

use crate::artifact::ModuleArtifact;
use crate::manifest::ModuleManifest;

/// A manifest that passed verification
///
/// Has no public constructor; [`ManifestVerifier`] is the only producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedManifest {
    manifest: ModuleManifest,
    module_id: ModuleId,
}

impl VerifiedManifest {
    /// Registry identity of the module
    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    /// Module version
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Verified content digest
    pub fn content_hash(&self) -> &ContentDigest {
        &self.manifest.content_hash
    }

    /// Capabilities the manifest declares
    pub fn declared_capabilities(&self) -> CapabilitySet {
        self.manifest.required_capabilities
    }

    /// Whether non-expiring tokens may be issued
    pub fn allow_persistent_token(&self) -> bool {
        self.manifest.allow_persistent_token
    }

    /// Declared memory budget
    pub fn memory_bytes(&self) -> u64 {
        self.manifest.memory_bytes
    }

    /// Last instant the manifest was valid, if it lapses
    pub fn valid_until(&self) -> Option<TimestampMs> {
        self.manifest.valid_until()
    }

    /// Key that signed the manifest
    pub fn signer(&self) -> &VerifyingKey {
        &self.manifest.signer
    }

    /// The underlying manifest
    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }
}

/// Decides module admission
#[derive(Debug)]
pub struct ManifestVerifier {
    vault: Arc<Vault>,
    clock: Arc<dyn PhysicalClock>,
    policy: ManifestPolicy,
}

impl ManifestVerifier {
    /// Verifier checking signatures through `vault`, bounds from `policy` and
    /// manifest lapse against `clock`
    pub fn new(vault: Arc<Vault>, clock: Arc<dyn PhysicalClock>, policy: ManifestPolicy) -> Self {
        Self {
            vault,
            clock,
            policy,
        }
    }

    /// Verify `manifest` against the raw module `bytes`
    pub fn verify(&self, manifest: ModuleManifest, bytes: &[u8]) -> Result<VerifiedManifest> {
        match self.check(&manifest, bytes) {
            Ok(()) => {
                tracing::debug!(
                    module = %manifest.name,
                    version = %manifest.version,
                    capabilities = %manifest.required_capabilities,
                    "manifest verified"
                );
                let module_id = manifest.module_id();
                Ok(VerifiedManifest {
                    manifest,
                    module_id,
                })
            }
            Err(e) => {
                tracing::warn!(module = %manifest.name, error = %e, "manifest rejected");
                Err(e)
            }
        }
    }

    /// Decode a CBOR artifact and verify it; returns the payload alongside
    pub fn verify_artifact(&self, artifact_bytes: &[u8]) -> Result<(VerifiedManifest, Vec<u8>)> {
        let artifact = ModuleArtifact::decode(artifact_bytes)?;
        let verified = self.verify(artifact.manifest, &artifact.payload)?;
        Ok((verified, artifact.payload))
    }

    fn check(&self, manifest: &ModuleManifest, bytes: &[u8]) -> Result<()> {
        if !hash::hash(bytes).ct_eq(&manifest.content_hash) {
            return Err(TrustError::HashMismatch);
        }

        // Unencodable manifests cannot carry a valid signature
        let signed = manifest
            .signing_bytes()
            .map_err(|_| TrustError::SignatureInvalid)?;
        if !self
            .vault
            .verify_manifest_signature(&manifest.signer, &signed, &manifest.signature)
        {
            return Err(TrustError::SignatureInvalid);
        }

        if manifest.required_capabilities.is_empty() {
            return Err(TrustError::EmptyCapabilitySet);
        }

        self.check_policy(manifest)
    }

    fn check_policy(&self, manifest: &ModuleManifest) -> Result<()> {
        let name = &manifest.name;
        if name.is_empty() {
            return Err(TrustError::manifest_rejected("module name is empty"));
        }
        if name.len() > self.policy.max_name_len {
            return Err(TrustError::manifest_rejected(format!(
                "module name is {} bytes, limit is {}",
                name.len(),
                self.policy.max_name_len
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(TrustError::manifest_rejected(
                "module name must be ASCII alphanumeric, '-', '_' or '.'",
            ));
        }
        if manifest.version.trim().is_empty() {
            return Err(TrustError::manifest_rejected("module version is empty"));
        }
        if manifest.memory_bytes == 0 || manifest.memory_bytes > self.policy.max_memory_bytes {
            return Err(TrustError::manifest_rejected(format!(
                "memory budget {} outside 1..={}",
                manifest.memory_bytes, self.policy.max_memory_bytes
            )));
        }
        if let Some(until) = manifest.valid_until() {
            let now = self.clock.now_ms()?;
            if now > until {
                return Err(TrustError::manifest_rejected(format!(
                    "manifest lapsed at {until}, now {now}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use assert_matches::assert_matches;
    use keystone_core::{Capability, EntropySeed};
    use keystone_vault::ManifestSigner;
    use std::sync::atomic::{AtomicU64, Ordering};

    const PAYLOAD: &[u8] = b"echo module bytes";

    #[derive(Debug, Default)]
    struct FixedClock(AtomicU64);

    impl PhysicalClock for FixedClock {
        fn now_ms(&self) -> Result<TimestampMs> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[derive(Debug)]
    struct DeadClock;

    impl PhysicalClock for DeadClock {
        fn now_ms(&self) -> Result<TimestampMs> {
            Err(TrustError::clock_unavailable("rtc offline"))
        }
    }

    fn setup() -> (ManifestVerifier, ManifestSigner) {
        setup_with_clock(Arc::new(FixedClock::default()))
    }

    fn setup_with_clock(clock: Arc<dyn PhysicalClock>) -> (ManifestVerifier, ManifestSigner) {
        let signer = ManifestSigner::from_seed(&[21u8; 32]);
        let vault = Vault::builder(EntropySeed::new([0u8; 32]))
            .deterministic()
            .manifest_anchor(signer.public_key())
            .build()
            .unwrap();
        (
            ManifestVerifier::new(Arc::new(vault), clock, ManifestPolicy::default()),
            signer,
        )
    }

    fn manifest(signer: &ManifestSigner) -> ModuleManifest {
        ManifestBuilder::new("echo", "1.0.0")
            .capabilities(CapabilitySet::from_capabilities(&[Capability::IO, Capability::IPC]))
            .sign_for(PAYLOAD, signer)
            .unwrap()
    }

    #[test]
    fn test_valid_manifest_verifies() {
        let (verifier, signer) = setup();
        let verified = verifier.verify(manifest(&signer), PAYLOAD).unwrap();
        assert_eq!(verified.module_id().as_str(), "echo");
        assert!(verified.declared_capabilities().contains(Capability::IPC));
        assert!(!verified.allow_persistent_token());
    }

    #[test]
    fn test_hash_checked_before_signature() {
        let (verifier, signer) = setup();
        let mut m = manifest(&signer);
        m.name = "tampered".into();
        assert_matches!(verifier.verify(m, b"other bytes"), Err(TrustError::HashMismatch));
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let (verifier, _) = setup();
        let rogue = ManifestSigner::from_seed(&[99u8; 32]);
        assert_matches!(
            verifier.verify(manifest(&rogue), PAYLOAD),
            Err(TrustError::SignatureInvalid)
        );
    }

    #[test]
    fn test_empty_capabilities_rejected_after_signature() {
        let (verifier, signer) = setup();
        let m = ManifestBuilder::new("idle", "1.0.0")
            .sign_for(PAYLOAD, &signer)
            .unwrap();
        assert_matches!(verifier.verify(m, PAYLOAD), Err(TrustError::EmptyCapabilitySet));
    }

    #[test]
    fn test_policy_bounds() {
        let (verifier, signer) = setup();
        let long = "x".repeat(33);
        let cases = [
            ManifestBuilder::new(long.as_str(), "1"),
            ManifestBuilder::new("bad name", "1"),
            ManifestBuilder::new("echo", " "),
            ManifestBuilder::new("echo", "1").memory_bytes(0),
            ManifestBuilder::new("echo", "1").memory_bytes(u64::MAX),
        ];
        for builder in cases {
            let m = builder
                .capabilities(Capability::IO.into())
                .sign_for(PAYLOAD, &signer)
                .unwrap();
            assert_matches!(verifier.verify(m, PAYLOAD), Err(TrustError::ManifestRejected { .. }));
        }
    }

    #[test]
    fn test_approved_signer_accepted_later() {
        let (verifier, _) = setup();
        let other = ManifestSigner::from_seed(&[5u8; 32]);
        assert!(verifier.verify(manifest(&other), PAYLOAD).is_err());
        verifier.vault.approve_signer(other.public_key());
        assert!(verifier.verify(manifest(&other), PAYLOAD).is_ok());
    }

    #[test]
    fn test_lapsed_manifest_rejected() {
        let clock = Arc::new(FixedClock::default());
        let (verifier, signer) = setup_with_clock(clock.clone());
        let lapsing = || {
            ManifestBuilder::new("echo", "1.0.0")
                .capabilities(Capability::IO.into())
                .issued_at(1_000)
                .expiry_secs(10)
                .sign_for(PAYLOAD, &signer)
                .unwrap()
        };

        clock.0.store(11_000, Ordering::SeqCst);
        let verified = verifier.verify(lapsing(), PAYLOAD).unwrap();
        assert_eq!(verified.valid_until(), Some(11_000));

        clock.0.store(11_001, Ordering::SeqCst);
        assert_matches!(
            verifier.verify(lapsing(), PAYLOAD),
            Err(TrustError::ManifestRejected { .. })
        );
    }

    #[test]
    fn test_lapse_check_fails_closed_without_clock() {
        let (verifier, signer) = setup_with_clock(Arc::new(DeadClock));
        assert!(verifier.verify(manifest(&signer), PAYLOAD).is_ok());

        let lapsing = ManifestBuilder::new("echo", "1.0.0")
            .capabilities(Capability::IO.into())
            .expiry_secs(60)
            .sign_for(PAYLOAD, &signer)
            .unwrap();
        assert_matches!(
            verifier.verify(lapsing, PAYLOAD),
            Err(TrustError::ClockUnavailable { .. })
        );
    }
}
