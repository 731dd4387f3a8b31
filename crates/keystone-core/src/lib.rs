//! Keystone Core - shared types for the kernel trust chain
//!
//! This crate holds the vocabulary every other layer speaks: the unified
//! [`TrustError`], the closed [`Capability`] enumeration and its bit-set
//! [`CapabilitySet`], module identifiers, content hashing, the clock
//! abstraction, the boot handoff record and the subsystem configuration.
//!
//! It performs no signing and holds no secrets; key material lives in
//! `keystone-vault`.

#![forbid(unsafe_code)]

/// Capability tags and bit sets
pub mod capability;

/// Boot handoff record and boot measurement
pub mod boot;

/// Configuration loading and validation
pub mod config;

/// Unified error handling
pub mod errors;

/// Content hashing
pub mod hash;

/// Module identifiers
pub mod identifiers;

/// Physical clock abstraction
pub mod time;

pub use boot::{BootFlags, BootHandoff, BootMeasurement, BootMeasurementUnit, EntropySeed, MemoryRegion, MemoryRegionKind};
pub use capability::{Capability, CapabilitySet};
pub use config::TrustConfig;
pub use errors::{Result, TrustError};
pub use hash::ContentDigest;
pub use identifiers::ModuleId;
pub use time::{PhysicalClock, SystemClock, TimestampMs};
