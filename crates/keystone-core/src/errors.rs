//! Unified error type for the trust chain
//!
//! Every verification, issuance and enforcement path reports failures through
//! [`TrustError`]. Variants carry just enough context to log the decision;
//! signature failures deliberately carry none.

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilitySet};
use crate::identifiers::ModuleId;

/// Unified error type for all Keystone operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TrustError {
    /// Module bytes do not hash to the declared content digest
    #[error("Content hash mismatch")]
    HashMismatch,

    /// Signature did not verify against the selected trust anchor
    #[error("Signature invalid")]
    SignatureInvalid,

    /// Manifest or request declared no capabilities
    #[error("Empty capability set")]
    EmptyCapabilitySet,

    /// Requested capabilities exceed those declared by the manifest
    #[error("Capability overreach: requested {requested}, declared {declared}")]
    CapabilityOverreach {
        /// Capabilities the caller asked for
        requested: CapabilitySet,
        /// Capabilities the verified manifest declares
        declared: CapabilitySet,
    },

    /// A one-shot initialization step ran twice
    #[error("Double initialization: {what}")]
    DoubleInit {
        /// Which step was repeated
        what: String,
    },

    /// No live, unexpired token exists for the module
    #[error("No valid token for module {module}")]
    NoValidToken {
        /// Module that made the call
        module: ModuleId,
    },

    /// The module's token does not grant the requested capability
    #[error("Capability {capability} denied for module {module}")]
    CapabilityDenied {
        /// Module that made the call
        module: ModuleId,
        /// Capability that was requested
        capability: Capability,
    },

    /// A presented token is past its expiry
    #[error("Token for module {module} expired")]
    TokenExpired {
        /// Owner of the expired token
        module: ModuleId,
    },

    /// Registry state violates its own invariants
    #[error("Registry corrupt: {message}")]
    RegistryCorrupt {
        /// Description of the inconsistency
        message: String,
    },

    /// Token is not newer than one the registry already accepted for its owner
    #[error("Token generation {generation} for module {module} replayed")]
    TokenReplayed {
        /// Owner of the token
        module: ModuleId,
        /// Generation carried by the rejected token
        generation: u64,
    },

    /// A non-expiring token was requested for a module that did not declare eligibility
    #[error("Persistent token not permitted for module {module}")]
    PersistentTokenDenied {
        /// Module named by the manifest
        module: ModuleId,
    },

    /// Manifest violates admission policy bounds
    #[error("Manifest rejected: {reason}")]
    ManifestRejected {
        /// Policy that was violated
        reason: String,
    },

    /// Boot handoff record is malformed
    #[error("Invalid boot handoff: {reason}")]
    InvalidHandoff {
        /// What failed to parse or validate
        reason: String,
    },

    /// The clock could not be read
    #[error("Clock unavailable: {reason}")]
    ClockUnavailable {
        /// Underlying failure
        reason: String,
    },

    /// Raw syscall number is not part of the ABI
    #[error("Unknown syscall {raw:#x}")]
    UnknownSyscall {
        /// Number passed by the caller
        raw: u64,
    },

    /// The trust subsystem halted after a fatal error
    #[error("Trust subsystem halted")]
    SubsystemHalted,

    /// Key derivation failed
    #[error("Key derivation failed: {message}")]
    KeyDerivation {
        /// Underlying failure
        message: String,
    },

    /// Encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Underlying failure
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Config error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl TrustError {
    /// Create a double-init error
    pub fn double_init(what: impl Into<String>) -> Self {
        Self::DoubleInit { what: what.into() }
    }

    /// Create a registry corruption error
    pub fn registry_corrupt(message: impl Into<String>) -> Self {
        Self::RegistryCorrupt {
            message: message.into(),
        }
    }

    /// Create a manifest policy rejection
    pub fn manifest_rejected(reason: impl Into<String>) -> Self {
        Self::ManifestRejected {
            reason: reason.into(),
        }
    }

    /// Create an invalid handoff error
    pub fn invalid_handoff(reason: impl Into<String>) -> Self {
        Self::InvalidHandoff {
            reason: reason.into(),
        }
    }

    /// Create a clock failure error
    pub fn clock_unavailable(reason: impl Into<String>) -> Self {
        Self::ClockUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a key derivation error
    pub fn key_derivation(message: impl Into<String>) -> Self {
        Self::KeyDerivation {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Errors after which module admission must stop.
    ///
    /// Only `DoubleInit` and `RegistryCorrupt` qualify; everything else is a
    /// terminal outcome for one attempt and is reported to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DoubleInit { .. } | Self::RegistryCorrupt { .. })
    }

    /// Whether this error is a denial produced at the syscall boundary
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::NoValidToken { .. } | Self::CapabilityDenied { .. } | Self::UnknownSyscall { .. }
        )
    }
}

/// Standard Result type for Keystone operations
pub type Result<T> = std::result::Result<T, TrustError>;

impl From<toml::de::Error> for TrustError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for TrustError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TrustError::double_init("vault").is_fatal());
        assert!(TrustError::registry_corrupt("owner mismatch").is_fatal());
        assert!(!TrustError::HashMismatch.is_fatal());
        assert!(!TrustError::SignatureInvalid.is_fatal());
        assert!(!TrustError::SubsystemHalted.is_fatal());
    }

    #[test]
    fn test_denial_classification() {
        let module = ModuleId::new("m1");
        assert!(TrustError::NoValidToken {
            module: module.clone()
        }
        .is_denial());
        assert!(TrustError::CapabilityDenied {
            module,
            capability: Capability::Network
        }
        .is_denial());
        assert!(!TrustError::HashMismatch.is_denial());
    }

    #[test]
    fn test_signature_error_carries_no_detail() {
        assert_eq!(TrustError::SignatureInvalid.to_string(), "Signature invalid");
    }
}
