//! Revocation triggers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a module's token was revoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    /// The module faulted
    Crashed,
    /// The module was unloaded
    Unloaded,
    /// The module exited
    Terminated,
    /// The module violated policy
    PolicyViolation(String),
    /// An operator requested it
    Operator,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crashed => f.write_str("crashed"),
            Self::Unloaded => f.write_str("unloaded"),
            Self::Terminated => f.write_str("terminated"),
            Self::PolicyViolation(detail) => write!(f, "policy violation: {detail}"),
            Self::Operator => f.write_str("operator request"),
        }
    }
}
