//! Keystone testing infrastructure
//!
//! Deterministic fixtures shared by the workspace's tests: seeded manifest
//! signers, a manual clock, signed module and boot handoff builders, a fully
//! wired trust chain and one-time tracing setup.
//!
//! ```rust,no_run
//! use keystone_testkit::*;
//! use keystone_core::Capability;
//! use std::time::Duration;
//!
//! let chain = TrustChainFixture::new();
//! let echo = ModuleFixture::new("echo", &[Capability::IO]);
//! chain.admit(&echo, Some(Duration::from_secs(1)));
//! assert!(chain.gate.enforce(&"echo".into(), Capability::IO).is_ok());
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod builders;
pub mod fixtures;
pub mod keys;
pub mod logging;
pub mod time;

pub use builders::{handoff_for, kernel_image, test_entropy_seed, ModuleFixture};
pub use fixtures::TrustChainFixture;
pub use keys::{rogue_signer, trusted_signer, KeyTestFixture};
pub use logging::init_test_tracing;
pub use time::{ManualClock, TEST_EPOCH_MS};
