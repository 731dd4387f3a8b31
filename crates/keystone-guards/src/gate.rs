//! Syscall enforcement gate
//!
//! Every privileged call passes through [`SyscallGate::enforce`]. The gate
//! resolves the caller's live token, checks the requested capability and, on
//! success, bumps a lock-free per-module sequence counter. Anything other than
//! a clean allow is an `Err`: missing token, missing capability, clock failure
//! and registry corruption all deny.

use keystone_authorization::TokenRegistry;
use keystone_core::config::GateConfig;
use keystone_core::{Capability, ModuleId, Result, TrustError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::syscall::Syscall;

/// Proof that a call was allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    /// Calling module
    pub module: ModuleId,
    /// Capability that was checked
    pub capability: Capability,
    /// Per-module count of allowed calls, including this one
    pub sequence: u64,
}

/// The single choke point for privileged operations
#[derive(Debug)]
pub struct SyscallGate {
    registry: Arc<TokenRegistry>,
    config: GateConfig,
    calls: AtomicU64,
    sequences: RwLock<HashMap<ModuleId, Arc<AtomicU64>>>,
}

impl SyscallGate {
    /// Gate resolving tokens from `registry`
    pub fn new(registry: Arc<TokenRegistry>, config: GateConfig) -> Self {
        Self {
            registry,
            config,
            calls: AtomicU64::new(0),
            sequences: RwLock::new(HashMap::new()),
        }
    }

    /// Allow or deny `capability` for `module`
    pub fn enforce(&self, module: &ModuleId, capability: Capability) -> Result<Allowance> {
        self.maybe_sweep();

        if let Err(e) = self.check(module, capability) {
            tracing::debug!(%module, %capability, error = %e, "syscall denied");
            return Err(e);
        }

        let sequence = self.next_sequence(module);
        tracing::trace!(%module, %capability, sequence, "syscall allowed");
        Ok(Allowance {
            module: module.clone(),
            capability,
            sequence,
        })
    }

    /// Decode a raw syscall number and enforce the capability it requires
    pub fn dispatch(&self, module: &ModuleId, raw: u64) -> Result<Allowance> {
        let Some(syscall) = Syscall::from_raw(raw) else {
            tracing::debug!(%module, raw, "unknown syscall");
            return Err(TrustError::UnknownSyscall { raw });
        };
        self.enforce(module, syscall.required_capability())
    }

    /// Number of calls allowed for `module` so far
    pub fn sequence(&self, module: &ModuleId) -> u64 {
        self.sequences
            .read()
            .get(module)
            .map_or(0, |counter| counter.load(Ordering::Acquire))
    }

    /// Drop the sequence counter of a module that left the system
    pub fn forget(&self, module: &ModuleId) {
        self.sequences.write().remove(module);
    }

    /// Total enforcement calls seen
    pub fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self, module: &ModuleId, capability: Capability) -> Result<()> {
        let token = self
            .registry
            .lookup(module)?
            .ok_or_else(|| TrustError::NoValidToken {
                module: module.clone(),
            })?;

        if self.config.verify_signatures {
            match self.registry.verify_token(&token) {
                Ok(()) => {}
                // Expired between lookup and re-check
                Err(TrustError::TokenExpired { .. }) => {
                    return Err(TrustError::NoValidToken {
                        module: module.clone(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if !token.allows(capability) {
            return Err(TrustError::CapabilityDenied {
                module: module.clone(),
                capability,
            });
        }
        Ok(())
    }

    fn next_sequence(&self, module: &ModuleId) -> u64 {
        if let Some(counter) = self.sequences.read().get(module) {
            return counter.fetch_add(1, Ordering::AcqRel) + 1;
        }
        let counter = Arc::clone(
            self.sequences
                .write()
                .entry(module.clone())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        );
        counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn maybe_sweep(&self) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % self.config.sweep_interval.max(1) != 0 {
            return;
        }
        match self.registry.sweep() {
            Ok(removed) => tracing::trace!(removed, calls, "periodic sweep"),
            Err(e) => tracing::warn!(error = %e, "periodic sweep failed"),
        }
    }
}
