//! The Vault
//!
//! Sole holder of the kernel's secrets: the token-authority signing key, the
//! master secret behind [`Vault::derive_key`] and the entropy pool. All of it
//! sits behind one `parking_lot::Mutex` with short critical sections; nothing
//! secret is reachable through an accessor and `Debug` output is redacted.
//!
//! Signing is reachable only with the one-shot [`SigningGrant`]. The kernel
//! hands that grant to the token issuer, so the vault signs tokens and nothing
//! else. Third-party manifests are only ever verified here.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use keystone_core::{BootMeasurement, ContentDigest, EntropySeed, Result, TrustError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use zeroize::Zeroizing;

use crate::audit::{AuditEvent, AuditLog, AuditRecord};
use crate::entropy::{EntropyMode, EntropyPool};
use crate::key_derivation::{self, DerivedKey, KeyContext};

/// Strict Ed25519 verification; any failure is reported as `false`
pub fn verify_signature(public_key: &VerifyingKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify_strict(message, signature).is_ok()
}

/// Per-process instance counter binding grants to their vault
static NEXT_VAULT_ID: AtomicU64 = AtomicU64::new(1);

/// One-shot authority to call [`Vault::sign`]
///
/// Issued at most once per vault and bound to the vault that issued it.
pub struct SigningGrant {
    vault_id: u64,
}

impl fmt::Debug for SigningGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningGrant")
            .field("vault_id", &self.vault_id)
            .finish()
    }
}

/// Snapshot of the recorded boot measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementRecord {
    /// Measured image length
    pub image_size: u64,
    /// Measured image digest
    pub image_hash: ContentDigest,
}

/// Builder for [`Vault`]
pub struct VaultBuilder {
    seed: EntropySeed,
    mode: EntropyMode,
    manifest_anchors: Vec<VerifyingKey>,
    boot_anchor: Option<ContentDigest>,
}

impl VaultBuilder {
    /// Seed the entropy pool from the loader seed alone, without OS entropy
    pub fn deterministic(mut self) -> Self {
        self.mode = EntropyMode::Deterministic;
        self
    }

    /// Trust a manifest signer
    pub fn manifest_anchor(mut self, key: VerifyingKey) -> Self {
        self.manifest_anchors.push(key);
        self
    }

    /// Trust several manifest signers
    pub fn manifest_anchors(mut self, keys: impl IntoIterator<Item = VerifyingKey>) -> Self {
        self.manifest_anchors.extend(keys);
        self
    }

    /// Reference digest the boot measurement must match
    pub fn boot_anchor(mut self, digest: ContentDigest) -> Self {
        self.boot_anchor = Some(digest);
        self
    }

    /// Seed the pool and generate the vault's keys
    pub fn build(self) -> Result<Vault> {
        let mut entropy = EntropyPool::seed(&self.seed, self.mode)?;

        let signing_seed = Zeroizing::new(entropy.bytes32());
        let signing_key = SigningKey::from_bytes(&signing_seed);
        let master_secret = Zeroizing::new(entropy.bytes32());
        let id = NEXT_VAULT_ID.fetch_add(1, Ordering::Relaxed);

        let mut anchors: Vec<VerifyingKey> = Vec::with_capacity(self.manifest_anchors.len());
        for key in self.manifest_anchors {
            if !anchors.contains(&key) {
                anchors.push(key);
            }
        }

        let token_key = signing_key.verifying_key();
        tracing::debug!(
            token_key = %hex::encode(token_key.as_bytes()),
            manifest_anchors = anchors.len(),
            boot_anchor = self.boot_anchor.is_some(),
            "vault initialized"
        );

        Ok(Vault {
            id,
            token_key,
            grant_issued: AtomicBool::new(false),
            state: Mutex::new(VaultState {
                signing_key: Some(signing_key),
                master_secret: Some(master_secret),
                entropy,
                manifest_anchors: anchors,
                boot_anchor: self.boot_anchor,
                measurement: None,
                audit: AuditLog::default(),
            }),
        })
    }
}

struct VaultState {
    signing_key: Option<SigningKey>,
    master_secret: Option<Zeroizing<[u8; 32]>>,
    entropy: EntropyPool,
    manifest_anchors: Vec<VerifyingKey>,
    boot_anchor: Option<ContentDigest>,
    measurement: Option<MeasurementRecord>,
    audit: AuditLog,
}

impl VaultState {
    fn wipe(&mut self) {
        // SigningKey and Zeroizing both clear their bytes on drop
        self.signing_key = None;
        self.master_secret = None;
        self.entropy.wipe();
    }
}

impl Drop for VaultState {
    fn drop(&mut self) {
        self.wipe();
    }
}

/// Key custody for the trust chain
pub struct Vault {
    id: u64,
    token_key: VerifyingKey,
    grant_issued: AtomicBool,
    state: Mutex<VaultState>,
}

impl Vault {
    /// Start building a vault from the loader's entropy seed
    pub fn builder(seed: EntropySeed) -> VaultBuilder {
        VaultBuilder {
            seed,
            mode: EntropyMode::Mixed,
            manifest_anchors: Vec::new(),
            boot_anchor: None,
        }
    }

    /// Public half of the token-authority key
    pub fn token_verifying_key(&self) -> VerifyingKey {
        self.token_key
    }

    /// Hand out the signing grant; fails with `DoubleInit` after the first call
    pub fn take_signing_grant(&self) -> Result<SigningGrant> {
        if self.grant_issued.swap(true, Ordering::AcqRel) {
            tracing::warn!("signing grant requested twice");
            return Err(TrustError::double_init("signing grant"));
        }
        self.state.lock().audit.push(AuditEvent::SigningGrantIssued);
        Ok(SigningGrant { vault_id: self.id })
    }

    /// Sign with the token-authority key
    ///
    /// A grant issued by a different vault is refused with `SignatureInvalid`;
    /// a wiped vault refuses with `SubsystemHalted`.
    pub fn sign(&self, grant: &SigningGrant, message: &[u8]) -> Result<Signature> {
        if grant.vault_id != self.id {
            return Err(TrustError::SignatureInvalid);
        }
        let state = self.state.lock();
        let key = state.signing_key.as_ref().ok_or(TrustError::SubsystemHalted)?;
        Ok(key.sign(message))
    }

    /// Verify `signature` over `message` under `public_key`
    pub fn verify(&self, message: &[u8], signature: &Signature, public_key: &VerifyingKey) -> bool {
        verify_signature(public_key, message, signature)
    }

    /// Verify a manifest signature, accepting only approved signers
    pub fn verify_manifest_signature(
        &self,
        signer: &VerifyingKey,
        message: &[u8],
        signature: &Signature,
    ) -> bool {
        let trusted = self.state.lock().manifest_anchors.contains(signer);
        trusted && verify_signature(signer, message, signature)
    }

    /// Add a manifest signer to the trust anchors; returns `false` if already present
    pub fn approve_signer(&self, signer: VerifyingKey) -> bool {
        let mut state = self.state.lock();
        if state.manifest_anchors.contains(&signer) {
            return false;
        }
        state.manifest_anchors.push(signer);
        let signer = hex::encode(signer.as_bytes());
        tracing::info!(%signer, "manifest signer approved");
        state.audit.push(AuditEvent::SignerApproved { signer });
        true
    }

    /// Currently trusted manifest signers
    pub fn trust_anchors(&self) -> Vec<VerifyingKey> {
        self.state.lock().manifest_anchors.clone()
    }

    /// Derive a context-bound key from the master secret
    pub fn derive_key(&self, context: &KeyContext) -> Result<DerivedKey> {
        let mut state = self.state.lock();
        let master = state.master_secret.as_ref().ok_or(TrustError::SubsystemHalted)?;
        let key = key_derivation::derive(master, context)?;
        state.audit.push(AuditEvent::KeyDerived {
            context: String::from_utf8_lossy(&context.to_info_string()).into_owned(),
        });
        Ok(key)
    }

    /// Record the boot measurement, once
    ///
    /// A second call fails with `DoubleInit`. If a boot anchor is configured the
    /// measurement must match it, otherwise `HashMismatch` and nothing is recorded.
    pub fn record_measurement(&self, measurement: BootMeasurement) -> Result<()> {
        let mut state = self.state.lock();
        if state.measurement.is_some() {
            tracing::error!("boot measurement recorded twice");
            return Err(TrustError::double_init("boot measurement"));
        }
        if let Some(anchor) = &state.boot_anchor {
            if !measurement.image_hash().ct_eq(anchor) {
                tracing::warn!("boot measurement does not match boot anchor");
                return Err(TrustError::HashMismatch);
            }
        }

        let record = MeasurementRecord {
            image_size: measurement.image_size(),
            image_hash: *measurement.image_hash(),
        };
        tracing::info!(
            image_size = record.image_size,
            image_hash = %record.image_hash,
            "boot measurement recorded"
        );
        state.audit.push(AuditEvent::MeasurementRecorded {
            image_size: record.image_size,
            image_hash: record.image_hash,
        });
        state.measurement = Some(record);
        Ok(())
    }

    /// The recorded boot measurement, if any
    pub fn measurement(&self) -> Option<MeasurementRecord> {
        self.state.lock().measurement.clone()
    }

    /// Fill `out` from the entropy pool
    pub fn fill_random(&self, out: &mut [u8]) {
        self.state.lock().entropy.fill(out);
    }

    /// Snapshot of the audit trail, oldest first
    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.state.lock().audit.snapshot()
    }

    /// Destroy all secrets; signing and derivation fail afterwards
    pub fn wipe(&self) {
        let mut state = self.state.lock();
        if state.signing_key.is_none() {
            return;
        }
        state.wipe();
        state.audit.push(AuditEvent::SecretsWiped);
        tracing::warn!("vault secrets wiped");
    }

    /// Whether [`Vault::wipe`] has run
    pub fn is_wiped(&self) -> bool {
        self.state.lock().signing_key.is_none()
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("token_key", &hex::encode(self.token_key.as_bytes()))
            .field("secrets", &"<redacted>")
            .finish()
    }
}
