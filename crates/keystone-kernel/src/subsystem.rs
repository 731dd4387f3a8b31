//! Trust subsystem
//!
//! [`TrustSubsystem`] is the explicit context object that owns the trust chain
//! for one boot. [`TrustSubsystem::bootstrap`] checks the loader handoff,
//! measures the kernel image, builds the vault and wires verifier, issuer,
//! registry and gate. At runtime it is the entry point for module admission,
//! syscall enforcement and revocation.
//!
//! Errors that mean the chain itself can no longer be trusted (`DoubleInit`,
//! `RegistryCorrupt`) pass through [`TrustSubsystem::escalate`], which halts the
//! subsystem and wipes the vault. A halted subsystem admits nothing and denies
//! every call.

use keystone_authorization::{CapabilityToken, TokenIssuer, TokenRegistry};
use keystone_core::{
    BootFlags, BootHandoff, BootMeasurement, BootMeasurementUnit, Capability, CapabilitySet,
    ContentDigest, ModuleId, PhysicalClock, Result, TimestampMs, TrustConfig, TrustError,
};
use keystone_guards::{Allowance, SyscallGate};
use keystone_manifest::{ManifestVerifier, ModuleManifest, VerifiedManifest};
use keystone_vault::{MeasurementRecord, Vault, VerifyingKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::revocation::RevocationReason;

/// Bookkeeping for an admitted module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Module version from its manifest
    pub version: String,
    /// Verified content digest
    pub content_hash: ContentDigest,
    /// Capabilities granted by the current token
    pub granted: CapabilitySet,
    /// When the current token was issued
    pub admitted_at: TimestampMs,
}

/// The kernel's trust chain for one boot
#[derive(Debug)]
pub struct TrustSubsystem {
    config: TrustConfig,
    vault: Arc<Vault>,
    verifier: ManifestVerifier,
    registry: Arc<TokenRegistry>,
    issuer: TokenIssuer,
    gate: SyscallGate,
    modules: RwLock<HashMap<ModuleId, ModuleRecord>>,
    halted: AtomicBool,
}

impl TrustSubsystem {
    /// Decode the raw handoff record, then [`bootstrap`](Self::bootstrap)
    pub fn bootstrap_from_bytes(
        config: TrustConfig,
        handoff: &[u8],
        image: &[u8],
        clock: Arc<dyn PhysicalClock>,
    ) -> Result<Self> {
        let handoff = BootHandoff::decode(handoff)?;
        Self::bootstrap(config, handoff, image, clock)
    }

    /// Bring up the trust chain
    ///
    /// The image is measured here, and the measurement must match both the
    /// digest the loader reported and, if configured, the boot trust anchor.
    pub fn bootstrap(
        config: TrustConfig,
        handoff: BootHandoff,
        image: &[u8],
        clock: Arc<dyn PhysicalClock>,
    ) -> Result<Self> {
        config.validate()?;
        Self::check_handoff(&config, &handoff)?;

        let measurement = BootMeasurementUnit.measure(image);
        if !measurement.matches(&handoff.claimed_measurement()) {
            tracing::error!(
                measured = %measurement.image_hash(),
                claimed = %handoff.image_digest,
                "kernel image does not match loader measurement"
            );
            return Err(TrustError::HashMismatch);
        }

        let anchors = config
            .manifest_anchor_bytes()?
            .iter()
            .map(|bytes| {
                VerifyingKey::from_bytes(bytes).map_err(|e| {
                    TrustError::config(format!("manifest trust anchor is not a valid key: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder = Vault::builder(handoff.entropy.clone()).manifest_anchors(anchors);
        if let Some(anchor) = config.expected_kernel_digest()? {
            builder = builder.boot_anchor(anchor);
        }
        let vault = Arc::new(builder.build()?);
        vault.record_measurement(measurement)?;

        let registry = Arc::new(TokenRegistry::new(
            vault.token_verifying_key(),
            Arc::clone(&clock),
        ));
        let issuer = TokenIssuer::new(
            Arc::clone(&vault),
            vault.take_signing_grant()?,
            Arc::clone(&registry),
            Arc::clone(&clock),
            &config.tokens,
        );
        let verifier = ManifestVerifier::new(Arc::clone(&vault), clock, config.manifest.clone());
        let gate = SyscallGate::new(Arc::clone(&registry), config.gate.clone());

        tracing::info!(
            image_size = handoff.image_size,
            usable_memory = handoff.usable_memory(),
            trust_anchors = vault.trust_anchors().len(),
            "trust subsystem online"
        );

        Ok(Self {
            config,
            vault,
            verifier,
            registry,
            issuer,
            gate,
            modules: RwLock::new(HashMap::new()),
            halted: AtomicBool::new(false),
        })
    }

    fn check_handoff(config: &TrustConfig, handoff: &BootHandoff) -> Result<()> {
        if config.boot.require_secure_boot && !handoff.has_flag(BootFlags::SECURE_BOOT) {
            return Err(TrustError::invalid_handoff("secure boot required but not reported"));
        }
        if handoff.usable_memory() == 0 {
            return Err(TrustError::invalid_handoff("memory map has no usable region"));
        }
        Ok(())
    }

    /// Decode, verify and admit a module artifact, issuing a token for `requested`
    pub fn admit(
        &self,
        artifact: &[u8],
        requested: CapabilitySet,
        ttl: Option<Duration>,
    ) -> Result<CapabilityToken> {
        self.ensure_running()?;
        let (verified, _payload) = self
            .verifier
            .verify_artifact(artifact)
            .map_err(|e| self.escalate(e))?;
        self.issue(&verified, requested, ttl)
    }

    /// Verify and admit a module given its manifest and raw bytes
    pub fn admit_manifest(
        &self,
        manifest: ModuleManifest,
        bytes: &[u8],
        requested: CapabilitySet,
        ttl: Option<Duration>,
    ) -> Result<CapabilityToken> {
        self.ensure_running()?;
        let verified = self
            .verifier
            .verify(manifest, bytes)
            .map_err(|e| self.escalate(e))?;
        self.issue(&verified, requested, ttl)
    }

    fn issue(
        &self,
        verified: &VerifiedManifest,
        requested: CapabilitySet,
        ttl: Option<Duration>,
    ) -> Result<CapabilityToken> {
        let token = self
            .issuer
            .issue(verified, requested, ttl)
            .map_err(|e| self.escalate(e))?;
        self.modules.write().insert(
            verified.module_id().clone(),
            ModuleRecord {
                version: verified.version().to_string(),
                content_hash: *verified.content_hash(),
                granted: token.permissions(),
                admitted_at: token.issued_at(),
            },
        );
        tracing::info!(
            module = %verified.module_id(),
            version = verified.version(),
            granted = %token.permissions(),
            "module admitted"
        );
        Ok(token)
    }

    /// Gate a privileged call
    pub fn enforce(&self, module: &ModuleId, capability: Capability) -> Result<Allowance> {
        self.ensure_running()?;
        self.gate
            .enforce(module, capability)
            .map_err(|e| self.escalate(e))
    }

    /// Gate a raw syscall number
    pub fn dispatch(&self, module: &ModuleId, raw: u64) -> Result<Allowance> {
        self.ensure_running()?;
        self.gate.dispatch(module, raw).map_err(|e| self.escalate(e))
    }

    /// Revoke a module's token; returns whether one was held
    pub fn revoke(&self, module: &ModuleId, reason: RevocationReason) -> bool {
        let revoked = self.registry.revoke(module).is_some();
        self.gate.forget(module);
        self.modules.write().remove(module);
        tracing::info!(%module, %reason, revoked, "module revoked");
        revoked
    }

    /// Record a further boot measurement into the vault
    ///
    /// The measurement is recorded once during bootstrap, so any call here is a
    /// repeated initialization: it fails with `DoubleInit` and halts.
    pub fn record_measurement(&self, measurement: BootMeasurement) -> Result<()> {
        self.vault
            .record_measurement(measurement)
            .map_err(|e| self.escalate(e))
    }

    /// Reclaim expired registry entries
    pub fn sweep(&self) -> Result<usize> {
        self.registry.sweep().map_err(|e| self.escalate(e))
    }

    /// Single escalation boundary: fatal errors halt the subsystem
    ///
    /// Returns the error unchanged so callers can propagate it.
    pub fn escalate(&self, error: TrustError) -> TrustError {
        if error.is_fatal() && !self.halted.swap(true, Ordering::AcqRel) {
            tracing::error!(error = %error, "trust subsystem halted");
            self.vault.wipe();
        }
        error
    }

    /// Whether a fatal error has halted the subsystem
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_halted() {
            return Err(TrustError::SubsystemHalted);
        }
        Ok(())
    }

    /// Admitted modules and their current grants
    pub fn modules(&self) -> Vec<(ModuleId, ModuleRecord)> {
        let mut modules: Vec<_> = self
            .modules
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        modules
    }

    /// The boot measurement recorded at bootstrap
    pub fn measurement(&self) -> Option<MeasurementRecord> {
        self.vault.measurement()
    }

    /// Active configuration
    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    /// The vault
    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// The token registry
    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// The syscall gate
    pub fn gate(&self) -> &SyscallGate {
        &self.gate
    }
}
