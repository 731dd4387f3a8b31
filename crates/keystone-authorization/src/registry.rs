//! Token registry
//!
//! The authoritative map from module id to its live token. One
//! `parking_lot::Mutex` guards the map; clock reads and signature checks
//! happen before the lock is taken so the critical sections stay short.
//!
//! Expiry is evaluated at lookup time. [`TokenRegistry::sweep`] only reclaims
//! memory.
//!
//! The registry remembers the highest generation it accepted for every module,
//! across revocation and sweeps. A token whose generation is not above that
//! mark is refused, so a revoked or superseded token cannot be put back.

use ed25519_dalek::VerifyingKey;
use keystone_core::{ModuleId, PhysicalClock, Result, TrustError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::token::CapabilityToken;

#[derive(Debug, Default)]
struct RegistryState {
    tokens: HashMap<ModuleId, Arc<CapabilityToken>>,
    generations: HashMap<ModuleId, u64>,
}

/// Store of live capability tokens, at most one per module
#[derive(Debug)]
pub struct TokenRegistry {
    authority: VerifyingKey,
    clock: Arc<dyn PhysicalClock>,
    state: Mutex<RegistryState>,
}

impl TokenRegistry {
    /// Registry accepting tokens signed by `authority`
    pub fn new(authority: VerifyingKey, clock: Arc<dyn PhysicalClock>) -> Self {
        Self {
            authority,
            clock,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Public key tokens must verify against
    pub fn authority(&self) -> &VerifyingKey {
        &self.authority
    }

    /// Insert a token, replacing and returning any previous token for its owner
    ///
    /// Fails with `TokenReplayed` unless the token's generation is above every
    /// generation previously accepted for the same owner.
    pub fn insert(&self, token: CapabilityToken) -> Result<Option<Arc<CapabilityToken>>> {
        token.verify_signature(&self.authority)?;
        let owner = token.owner().clone();
        let generation = token.generation();

        let mut state = self.state.lock();
        if let Some(&seen) = state.generations.get(&owner) {
            if generation <= seen {
                drop(state);
                tracing::warn!(module = %owner, generation, seen, "stale token refused");
                return Err(TrustError::TokenReplayed {
                    module: owner,
                    generation,
                });
            }
        }
        state.generations.insert(owner.clone(), generation);
        Ok(state.tokens.insert(owner, Arc::new(token)))
    }

    /// Live token for `module`
    ///
    /// Expired tokens read as `None` even before a sweep. Clock failures and
    /// inconsistent entries are errors, never a token.
    pub fn lookup(&self, module: &ModuleId) -> Result<Option<Arc<CapabilityToken>>> {
        let now = self.clock.now_ms()?;
        let state = self.state.lock();
        let Some(token) = state.tokens.get(module) else {
            return Ok(None);
        };
        if token.owner() != module {
            return Err(TrustError::registry_corrupt(format!(
                "entry for {module} holds a token owned by {}",
                token.owner()
            )));
        }
        if token.is_expired_at(now) {
            return Ok(None);
        }
        Ok(Some(Arc::clone(token)))
    }

    /// Remove the token for `module`; the next lookup observes the removal
    pub fn revoke(&self, module: &ModuleId) -> Option<Arc<CapabilityToken>> {
        self.state.lock().tokens.remove(module)
    }

    /// Drop expired entries, returning how many were removed
    pub fn sweep(&self) -> Result<usize> {
        let now = self.clock.now_ms()?;
        let mut state = self.state.lock();
        let before = state.tokens.len();
        state.tokens.retain(|_, token| !token.is_expired_at(now));
        let removed = before - state.tokens.len();
        drop(state);
        if removed > 0 {
            tracing::debug!(removed, "expired tokens swept");
        }
        Ok(removed)
    }

    /// Check a token obtained out of band: signature first, then expiry
    pub fn verify_token(&self, token: &CapabilityToken) -> Result<()> {
        token.verify_signature(&self.authority)?;
        if token.is_expired_at(self.clock.now_ms()?) {
            return Err(TrustError::TokenExpired {
                module: token.owner().clone(),
            });
        }
        Ok(())
    }

    /// Entries currently held, including expired ones awaiting a sweep
    pub fn len(&self) -> usize {
        self.state.lock().tokens.len()
    }

    /// Whether the registry holds no entries
    pub fn is_empty(&self) -> bool {
        self.state.lock().tokens.is_empty()
    }

    /// Highest generation ever accepted for `module`
    pub fn last_generation(&self, module: &ModuleId) -> Option<u64> {
        self.state.lock().generations.get(module).copied()
    }

    /// Modules holding an unexpired token, sorted
    pub fn live_modules(&self) -> Result<Vec<ModuleId>> {
        let now = self.clock.now_ms()?;
        let mut modules: Vec<ModuleId> = self
            .state
            .lock()
            .tokens
            .values()
            .filter(|token| !token.is_expired_at(now))
            .map(|token| token.owner().clone())
            .collect();
        modules.sort();
        Ok(modules)
    }

    /// Store `token` under `key` with no signature, generation or owner check
    #[cfg(any(test, feature = "testing"))]
    pub fn insert_unchecked(&self, key: ModuleId, token: CapabilityToken) {
        self.state.lock().tokens.insert(key, Arc::new(token));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::token::tests::signed_token;
    use assert_matches::assert_matches;
    use keystone_core::{Capability, CapabilitySet, EntropySeed, TimestampMs};
    use keystone_vault::{SigningGrant, Vault};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    pub(crate) struct TestClock(pub(crate) AtomicU64);

    impl TestClock {
        pub(crate) fn set(&self, now: TimestampMs) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl PhysicalClock for TestClock {
        fn now_ms(&self) -> Result<TimestampMs> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[derive(Debug)]
    struct BrokenClock;

    impl PhysicalClock for BrokenClock {
        fn now_ms(&self) -> Result<TimestampMs> {
            Err(TrustError::clock_unavailable("rtc offline"))
        }
    }

    fn setup() -> (Vault, SigningGrant, Arc<TestClock>, TokenRegistry) {
        let vault = Vault::builder(EntropySeed::new([4u8; 32]))
            .deterministic()
            .build()
            .unwrap();
        let grant = vault.take_signing_grant().unwrap();
        let clock = Arc::new(TestClock::default());
        clock.set(1_000);
        let registry = TokenRegistry::new(vault.token_verifying_key(), clock.clone());
        (vault, grant, clock, registry)
    }

    #[test]
    fn test_insert_replaces_previous() {
        let (vault, grant, _, registry) = setup();
        let first = signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, Some(5_000), 1);
        let second = signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, Some(5_000), 2);
        assert!(registry.insert(first).unwrap().is_none());
        let replaced = registry.insert(second).unwrap().unwrap();
        assert_eq!(replaced.generation(), 1);
        assert_eq!(registry.len(), 1);
        let live = registry.lookup(&"m1".into()).unwrap().unwrap();
        assert_eq!(live.generation(), 2);
    }

    #[test]
    fn test_revoked_token_cannot_be_reinserted() {
        let (vault, grant, _, registry) = setup();
        let token = signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, None, 1);
        registry.insert(token.clone()).unwrap();
        registry.revoke(&"m1".into()).unwrap();

        assert_matches!(
            registry.insert(token),
            Err(TrustError::TokenReplayed { generation: 1, .. })
        );
        assert!(registry.lookup(&"m1".into()).unwrap().is_none());
        assert_eq!(registry.last_generation(&"m1".into()), Some(1));
    }

    #[test]
    fn test_superseded_token_cannot_roll_back() {
        let (vault, grant, _, registry) = setup();
        let wide = CapabilitySet::from_capabilities(&[Capability::IO, Capability::Network]);
        let old = signed_token(&vault, &grant, "m1", wide, 1_000, None, 1);
        let new = signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, None, 2);
        registry.insert(old.clone()).unwrap();
        registry.insert(new.clone()).unwrap();

        assert_matches!(registry.insert(old), Err(TrustError::TokenReplayed { .. }));
        assert_matches!(registry.insert(new), Err(TrustError::TokenReplayed { .. }));
        let live = registry.lookup(&"m1".into()).unwrap().unwrap();
        assert_eq!(live.generation(), 2);
        assert!(!live.allows(Capability::Network));
    }

    #[test]
    fn test_insert_rejects_foreign_signature() {
        let (_, _, _, registry) = setup();
        let other = Vault::builder(EntropySeed::new([5u8; 32]))
            .deterministic()
            .build()
            .unwrap();
        let other_grant = other.take_signing_grant().unwrap();
        let forged = signed_token(&other, &other_grant, "m1", Capability::IO.into(), 0, None, 1);
        assert_matches!(registry.insert(forged), Err(TrustError::SignatureInvalid));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_hides_expired_before_sweep() {
        let (vault, grant, clock, registry) = setup();
        let token = signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, Some(2_000), 1);
        registry.insert(token).unwrap();

        clock.set(1_999);
        assert!(registry.lookup(&"m1".into()).unwrap().is_some());
        clock.set(2_000);
        assert!(registry.lookup(&"m1".into()).unwrap().is_none());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.sweep().unwrap(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.sweep().unwrap(), 0);
    }

    #[test]
    fn test_revoke_is_immediate() {
        let (vault, grant, _, registry) = setup();
        registry
            .insert(signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, None, 1))
            .unwrap();
        assert!(registry.revoke(&"m1".into()).is_some());
        assert!(registry.lookup(&"m1".into()).unwrap().is_none());
        assert!(registry.revoke(&"m1".into()).is_none());
    }

    #[test]
    fn test_corrupt_entry_surfaces_as_error() {
        let (vault, grant, _, registry) = setup();
        let token = signed_token(&vault, &grant, "m2", Capability::IO.into(), 1_000, None, 1);
        registry.insert_unchecked("m1".into(), token);
        assert_matches!(
            registry.lookup(&"m1".into()),
            Err(TrustError::RegistryCorrupt { .. })
        );
    }

    #[test]
    fn test_clock_failure_is_error() {
        let vault = Vault::builder(EntropySeed::new([4u8; 32]))
            .deterministic()
            .build()
            .unwrap();
        let registry = TokenRegistry::new(vault.token_verifying_key(), Arc::new(BrokenClock));
        assert_matches!(
            registry.lookup(&"m1".into()),
            Err(TrustError::ClockUnavailable { .. })
        );
        assert_matches!(registry.sweep(), Err(TrustError::ClockUnavailable { .. }));
    }

    #[test]
    fn test_verify_token_out_of_band() {
        let (vault, grant, clock, registry) = setup();
        let token = signed_token(&vault, &grant, "m1", Capability::IO.into(), 1_000, Some(1_500), 1);
        assert!(registry.verify_token(&token).is_ok());

        let mut tampered = token.clone();
        tampered.tamper(|t| t.expires_at = Some(u64::MAX));
        assert_matches!(registry.verify_token(&tampered), Err(TrustError::SignatureInvalid));

        clock.set(1_500);
        assert_matches!(registry.verify_token(&token), Err(TrustError::TokenExpired { .. }));
    }

    #[test]
    fn test_live_modules_skips_expired() {
        let (vault, grant, clock, registry) = setup();
        registry
            .insert(signed_token(&vault, &grant, "b", Capability::IO.into(), 1_000, None, 1))
            .unwrap();
        registry
            .insert(signed_token(&vault, &grant, "a", Capability::IO.into(), 1_000, Some(1_100), 2))
            .unwrap();
        assert_eq!(registry.live_modules().unwrap(), vec![ModuleId::new("a"), ModuleId::new("b")]);
        clock.set(1_100);
        assert_eq!(registry.live_modules().unwrap(), vec![ModuleId::new("b")]);
    }
}
