//! Keystone Authorization - capability tokens
//!
//! [`TokenIssuer`] mints signed [`CapabilityToken`]s from verified manifests
//! and installs them in the [`TokenRegistry`], the single authoritative store
//! the syscall gate consults.

#![forbid(unsafe_code)]

/// Token issuance
pub mod issuer;

/// Live token registry
pub mod registry;

/// Capability token type
pub mod token;

pub use issuer::TokenIssuer;
pub use registry::TokenRegistry;
pub use token::{CapabilityToken, TOKEN_SIGNING_DOMAIN};
