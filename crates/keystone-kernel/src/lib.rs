//! Keystone Kernel - trust subsystem
//!
//! Wires the vault, manifest verifier, token issuer, registry and syscall gate
//! into one [`TrustSubsystem`] at boot, and owns the boundary where fatal
//! errors halt the chain.
//!
//! ```rust,no_run
//! use keystone_core::{BootHandoff, Capability, CapabilitySet, SystemClock, TrustConfig};
//! use keystone_kernel::TrustSubsystem;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn boot(handoff: BootHandoff, image: &[u8], artifact: &[u8]) -> keystone_core::Result<()> {
//! let config = TrustConfig::load_from_file("/etc/keystone/trust.toml".as_ref())?;
//! let trust = TrustSubsystem::bootstrap(config, handoff, image, Arc::new(SystemClock))?;
//! trust.admit(artifact, CapabilitySet::from(Capability::IO), Some(Duration::from_secs(60)))?;
//! trust.enforce(&"echo".into(), Capability::IO)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

/// Revocation reasons
pub mod revocation;

/// Trust subsystem context
pub mod subsystem;

pub use revocation::RevocationReason;
pub use subsystem::{ModuleRecord, TrustSubsystem};
