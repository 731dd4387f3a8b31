//! Syscall gate behavior against a live registry

use assert_matches::assert_matches;
use keystone_core::{Capability, ModuleId, TrustConfig, TrustError};
use keystone_guards::Syscall;
use keystone_testkit::{init_test_tracing, ModuleFixture, TrustChainFixture};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn m1() -> ModuleId {
    ModuleId::new("m1")
}

#[test]
fn denials_are_distinct() {
    init_test_tracing();
    let chain = TrustChainFixture::new();

    assert_matches!(
        chain.gate.enforce(&m1(), Capability::IO),
        Err(TrustError::NoValidToken { module }) if module == m1()
    );

    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_millis(1_000)),
    );
    let allowance = chain.gate.enforce(&m1(), Capability::IO).unwrap();
    assert_eq!(allowance.module, m1());
    assert_eq!(allowance.capability, Capability::IO);
    assert_eq!(allowance.sequence, 1);

    assert_matches!(
        chain.gate.enforce(&m1(), Capability::Network),
        Err(TrustError::CapabilityDenied { capability: Capability::Network, .. })
    );

    chain.clock.advance(Duration::from_millis(1_000));
    assert_matches!(
        chain.gate.enforce(&m1(), Capability::IO),
        Err(TrustError::NoValidToken { .. })
    );
}

#[test]
fn sequence_counts_only_allowed_calls() {
    let chain = TrustChainFixture::new();
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_secs(60)),
    );
    for expected in 1..=5 {
        assert_eq!(chain.gate.enforce(&m1(), Capability::IO).unwrap().sequence, expected);
        assert!(chain.gate.enforce(&m1(), Capability::Crypto).is_err());
    }
    assert_eq!(chain.gate.sequence(&m1()), 5);
    assert_eq!(chain.gate.sequence(&"other".into()), 0);
    assert_eq!(chain.gate.total_calls(), 10);

    chain.gate.forget(&m1());
    assert_eq!(chain.gate.sequence(&m1()), 0);
}

#[test]
fn revocation_is_observed_by_next_call() {
    let chain = TrustChainFixture::new();
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_secs(60)),
    );
    assert!(chain.gate.enforce(&m1(), Capability::IO).is_ok());
    chain.registry.revoke(&m1());
    assert_matches!(
        chain.gate.enforce(&m1(), Capability::IO),
        Err(TrustError::NoValidToken { .. })
    );
}

#[test]
fn clock_failure_denies() {
    let chain = TrustChainFixture::new();
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_secs(60)),
    );
    chain.clock.set_failing(true);
    assert_matches!(
        chain.gate.enforce(&m1(), Capability::IO),
        Err(TrustError::ClockUnavailable { .. })
    );
    chain.clock.set_failing(false);
    assert!(chain.gate.enforce(&m1(), Capability::IO).is_ok());
}

#[test]
fn dispatch_maps_syscalls_to_capabilities() {
    let chain = TrustChainFixture::new();
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO, Capability::IPC]),
        Some(Duration::from_secs(60)),
    );

    let log = chain.gate.dispatch(&m1(), Syscall::Log.raw()).unwrap();
    assert_eq!(log.capability, Capability::IO);
    assert!(chain.gate.dispatch(&m1(), Syscall::IpcSend.raw()).is_ok());
    assert!(chain.gate.dispatch(&m1(), Syscall::IpcReceive.raw()).is_ok());
    assert_matches!(
        chain.gate.dispatch(&m1(), Syscall::ReadEntropy.raw()),
        Err(TrustError::CapabilityDenied { capability: Capability::Crypto, .. })
    );
    assert_matches!(
        chain.gate.dispatch(&m1(), 0xDEAD),
        Err(TrustError::UnknownSyscall { raw: 0xDEAD })
    );
}

#[test]
fn periodic_sweep_reclaims_expired_entries() {
    let mut config = TrustConfig::default();
    config.gate.sweep_interval = 4;
    let chain = TrustChainFixture::with_config(config);

    chain.admit(
        &ModuleFixture::new("short", &[Capability::IO]),
        Some(Duration::from_millis(10)),
    );
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_secs(60)),
    );
    chain.clock.advance(Duration::from_millis(10));
    assert_eq!(chain.registry.len(), 2);

    for _ in 0..3 {
        chain.gate.enforce(&m1(), Capability::IO).unwrap();
    }
    assert_eq!(chain.registry.len(), 2);
    chain.gate.enforce(&m1(), Capability::IO).unwrap();
    assert_eq!(chain.registry.len(), 1);
}

#[test]
fn signature_recheck_accepts_genuine_tokens() {
    let mut config = TrustConfig::default();
    config.gate.verify_signatures = true;
    let chain = TrustChainFixture::with_config(config);
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_millis(500)),
    );
    assert!(chain.gate.enforce(&m1(), Capability::IO).is_ok());
    chain.clock.advance(Duration::from_millis(500));
    assert_matches!(
        chain.gate.enforce(&m1(), Capability::IO),
        Err(TrustError::NoValidToken { .. })
    );
}

#[test]
fn concurrent_enforcement_counts_every_allow() {
    let chain = Arc::new(TrustChainFixture::new());
    chain.admit(
        &ModuleFixture::new("m1", &[Capability::IO]),
        Some(Duration::from_secs(60)),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let chain = Arc::clone(&chain);
            thread::spawn(move || {
                let mut seen = Vec::with_capacity(100);
                for _ in 0..100 {
                    seen.push(chain.gate.enforce(&m1(), Capability::IO).unwrap().sequence);
                }
                seen
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (1..=800).collect::<Vec<_>>());
    assert_eq!(chain.gate.sequence(&m1()), 800);
}
