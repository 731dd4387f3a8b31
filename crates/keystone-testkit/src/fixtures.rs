//! Assembled trust chains for component tests
//!
//! [`TrustChainFixture`] wires a deterministic vault, verifier, issuer,
//! registry and gate around a [`ManualClock`], without the kernel's boot
//! sequence.

use keystone_authorization::{CapabilityToken, TokenIssuer, TokenRegistry};
use keystone_core::{CapabilitySet, TrustConfig};
use keystone_guards::SyscallGate;
use keystone_manifest::{ManifestVerifier, VerifiedManifest};
use keystone_vault::Vault;
use std::sync::Arc;
use std::time::Duration;

use crate::builders::{test_entropy_seed, ModuleFixture};
use crate::keys::{trusted_signer, KeyTestFixture};
use crate::time::ManualClock;

/// Wired components sharing one manual clock
#[derive(Debug)]
pub struct TrustChainFixture {
    /// Signer installed as the only manifest anchor
    pub signer: KeyTestFixture,
    /// Shared clock
    pub clock: ManualClock,
    /// Vault holding the token authority
    pub vault: Arc<Vault>,
    /// Manifest verifier
    pub verifier: ManifestVerifier,
    /// Live token registry
    pub registry: Arc<TokenRegistry>,
    /// Token issuer
    pub issuer: Arc<TokenIssuer>,
    /// Syscall gate
    pub gate: SyscallGate,
}

impl TrustChainFixture {
    /// Fixture with default configuration
    pub fn new() -> Self {
        Self::with_config(TrustConfig::default())
    }

    /// Fixture with explicit configuration
    pub fn with_config(config: TrustConfig) -> Self {
        let signer = trusted_signer();
        let clock = ManualClock::at_test_epoch();
        let vault = Arc::new(
            Vault::builder(test_entropy_seed())
                .deterministic()
                .manifest_anchor(signer.public_key())
                .build()
                .expect("fixture vault builds"),
        );
        let registry = Arc::new(TokenRegistry::new(
            vault.token_verifying_key(),
            Arc::new(clock.clone()),
        ));
        let grant = vault.take_signing_grant().expect("fresh vault has a grant");
        let issuer = Arc::new(TokenIssuer::new(
            Arc::clone(&vault),
            grant,
            Arc::clone(&registry),
            Arc::new(clock.clone()),
            &config.tokens,
        ));
        let verifier = ManifestVerifier::new(
            Arc::clone(&vault),
            Arc::new(clock.clone()),
            config.manifest.clone(),
        );
        let gate = SyscallGate::new(Arc::clone(&registry), config.gate);
        Self {
            signer,
            clock,
            vault,
            verifier,
            registry,
            issuer,
            gate,
        }
    }

    /// Verify `module` as signed by the fixture's trusted signer
    pub fn verify(&self, module: &ModuleFixture) -> VerifiedManifest {
        self.verifier
            .verify(module.manifest(&self.signer), module.payload_bytes())
            .expect("fixture module verifies")
    }

    /// Verify `module` and issue a token for all its declared capabilities
    pub fn admit(&self, module: &ModuleFixture, ttl: Option<Duration>) -> CapabilityToken {
        self.admit_subset(module, module.capabilities(), ttl)
    }

    /// Verify `module` and issue a token for `requested`
    pub fn admit_subset(
        &self,
        module: &ModuleFixture,
        requested: CapabilitySet,
        ttl: Option<Duration>,
    ) -> CapabilityToken {
        let verified = self.verify(module);
        self.issuer
            .issue(&verified, requested, ttl)
            .expect("fixture token issues")
    }
}

impl Default for TrustChainFixture {
    fn default() -> Self {
        Self::new()
    }
}
