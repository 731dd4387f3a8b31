//! Token issuance and registry behavior across the assembled chain

use assert_matches::assert_matches;
use keystone_core::{Capability, CapabilitySet, ModuleId, TrustError};
use keystone_testkit::{init_test_tracing, ModuleFixture, TrustChainFixture};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn overreach_never_inserts() {
    init_test_tracing();
    let chain = TrustChainFixture::new();
    let module = ModuleFixture::new("m1", &[Capability::IO]);
    let verified = chain.verify(&module);
    let requested = CapabilitySet::from_capabilities(&[Capability::IO, Capability::Network]);

    let err = chain
        .issuer
        .issue(&verified, requested, Some(Duration::from_secs(1)))
        .unwrap_err();
    assert_matches!(err, TrustError::CapabilityOverreach { requested: r, declared: d }
        if r == requested && d == module.capabilities());
    assert!(chain.registry.is_empty());
    assert!(chain.registry.lookup(&"m1".into()).unwrap().is_none());
}

#[test]
fn zero_ttl_token_is_never_returned() {
    let chain = TrustChainFixture::new();
    let module = ModuleFixture::new("m1", &[Capability::IO]);
    let token = chain.admit(&module, Some(Duration::ZERO));
    assert_eq!(token.expires_at(), Some(token.issued_at()));
    assert!(chain.registry.lookup(&"m1".into()).unwrap().is_none());
    assert_matches!(
        chain.registry.verify_token(&token),
        Err(TrustError::TokenExpired { .. })
    );
}

#[test]
fn persistent_token_survives_any_clock() {
    let chain = TrustChainFixture::new();
    let module = ModuleFixture::new("init", &[Capability::CoreExec]).persistent();
    chain.admit(&module, None);
    chain.clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
    assert!(chain.registry.lookup(&"init".into()).unwrap().is_some());
    assert_eq!(chain.registry.sweep().unwrap(), 0);
}

#[test]
fn tokens_verify_with_public_key_only() {
    let chain = TrustChainFixture::new();
    let token = chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_secs(5)),
    );
    assert!(token.verify_signature(chain.registry.authority()).is_ok());
    assert!(token
        .verify_signature(&keystone_testkit::rogue_signer().public_key())
        .is_err());
}

#[test]
fn concurrent_reissue_never_exposes_two_tokens() {
    let chain = Arc::new(TrustChainFixture::new());
    let module = ModuleFixture::new("m1", &[Capability::IO, Capability::IPC]);
    let verified = Arc::new(chain.verify(&module));
    let module_id = ModuleId::new("m1");
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let chain = Arc::clone(&chain);
            let verified = Arc::clone(&verified);
            thread::spawn(move || {
                let caps = if i % 2 == 0 { Capability::IO } else { Capability::IPC };
                for _ in 0..50 {
                    chain
                        .issuer
                        .issue(&verified, caps.into(), Some(Duration::from_secs(60)))
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let chain = Arc::clone(&chain);
            let done = Arc::clone(&done);
            let module_id = module_id.clone();
            thread::spawn(move || {
                let mut last_generation = 0;
                while !done.load(Ordering::Acquire) {
                    if let Some(token) = chain.registry.lookup(&module_id).unwrap() {
                        assert!(token.generation() >= last_generation);
                        last_generation = token.generation();
                        assert_eq!(token.owner(), &module_id);
                    }
                    assert!(chain.registry.len() <= 1);
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(chain.registry.len(), 1);
    let live = chain.registry.lookup(&module_id).unwrap().unwrap();
    assert_eq!(live.generation(), 200);
    assert_eq!(chain.issuer.last_generation(), 200);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn issued_permissions_stay_within_manifest(declared_bits in 1u16..0x200, requested_bits in 1u16..0x200) {
        let declared = CapabilitySet::from_bits(declared_bits).unwrap();
        let requested = CapabilitySet::from_bits(requested_bits).unwrap();
        let caps: Vec<Capability> = declared.iter().collect();

        let chain = TrustChainFixture::new();
        let module = ModuleFixture::new("prop", &caps);
        let verified = chain.verify(&module);
        match chain.issuer.issue(&verified, requested, Some(Duration::from_secs(1))) {
            Ok(token) => {
                prop_assert!(requested.is_subset_of(declared));
                prop_assert!(token.permissions().is_subset_of(declared));
                prop_assert_eq!(chain.registry.len(), 1);
            }
            Err(TrustError::CapabilityOverreach { .. }) => {
                prop_assert!(!requested.is_subset_of(declared));
                prop_assert!(chain.registry.is_empty());
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
