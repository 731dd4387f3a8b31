//! Module artifact envelope
//!
//! The packaging tool ships a module as one CBOR document carrying the
//! signed manifest next to the raw module bytes.

use keystone_core::{Result, TrustError};
use serde::{Deserialize, Serialize};

use crate::manifest::ModuleManifest;

/// Envelope format understood by this kernel
pub const ARTIFACT_FORMAT_VERSION: u16 = 1;

/// Signed manifest plus module bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleArtifact {
    /// Envelope format version
    pub format_version: u16,
    /// Signed manifest
    pub manifest: ModuleManifest,
    /// Raw module bytes
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl ModuleArtifact {
    /// Wrap a manifest and its payload in the current envelope format
    pub fn new(manifest: ModuleManifest, payload: Vec<u8>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            manifest,
            payload,
        }
    }

    /// Encode as CBOR
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_cbor::to_vec(self)
            .map_err(|e| TrustError::serialization(format!("artifact encoding failed: {e}")))
    }

    /// Decode from CBOR, rejecting unknown envelope versions
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let artifact: Self = serde_cbor::from_slice(bytes)
            .map_err(|e| TrustError::serialization(format!("artifact decoding failed: {e}")))?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(TrustError::serialization(format!(
                "unsupported artifact format version {}",
                artifact.format_version
            )));
        }
        Ok(artifact)
    }
}
