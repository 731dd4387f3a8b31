//! Trust subsystem configuration
//!
//! Loaded from TOML, overridable through `KEYSTONE_*` environment variables
//! and validated before the subsystem boots. Key material appears here only
//! as hex-encoded public keys and reference digests.
//!
//! ```toml
//! [boot]
//! expected_kernel_digest = "ba7816bf..."
//! require_secure_boot = true
//!
//! [manifest]
//! trust_anchors = ["3b6a27bc..."]
//! max_name_len = 32
//! max_memory_bytes = 67108864
//!
//! [tokens]
//! max_ttl_ms = 86400000
//!
//! [gate]
//! sweep_interval = 1024
//! verify_signatures = false
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::errors::{Result, TrustError};
use crate::hash::ContentDigest;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "KEYSTONE_";

/// Boot measurement policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Reference digest for the kernel image (boot trust anchor), hex encoded
    pub expected_kernel_digest: Option<String>,
    /// Refuse to boot unless the loader reports secure boot
    pub require_secure_boot: bool,
}

/// Manifest admission policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestPolicy {
    /// Hex-encoded Ed25519 public keys trusted to sign manifests
    pub trust_anchors: Vec<String>,
    /// Maximum module name length in bytes
    pub max_name_len: usize,
    /// Maximum declared memory budget
    pub max_memory_bytes: u64,
}

impl Default for ManifestPolicy {
    fn default() -> Self {
        Self {
            trust_anchors: Vec::new(),
            max_name_len: 32,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Token issuance policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Upper bound applied to requested TTLs; `None` leaves TTLs unclamped
    pub max_ttl_ms: Option<u64>,
}

/// Syscall gate tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Number of enforcement calls between registry sweeps
    pub sweep_interval: u64,
    /// Re-verify the token signature on every enforcement call
    pub verify_signatures: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sweep_interval: 1024,
            verify_signatures: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Boot measurement policy
    pub boot: BootConfig,
    /// Manifest admission policy
    pub manifest: ManifestPolicy,
    /// Token issuance policy
    pub tokens: TokenConfig,
    /// Syscall gate tuning
    pub gate: GateConfig,
}

impl TrustConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrustError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `KEYSTONE_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; unrelated names are ignored
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "BOOT_EXPECTED_KERNEL_DIGEST" => {
                    self.boot.expected_kernel_digest = Some(value.to_string());
                }
                "BOOT_REQUIRE_SECURE_BOOT" => {
                    self.boot.require_secure_boot = parse_value(name, value)?;
                }
                "MANIFEST_TRUST_ANCHORS" => {
                    self.manifest.trust_anchors = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "MANIFEST_MAX_NAME_LEN" => {
                    self.manifest.max_name_len = parse_value(name, value)?;
                }
                "MANIFEST_MAX_MEMORY_BYTES" => {
                    self.manifest.max_memory_bytes = parse_value(name, value)?;
                }
                "TOKENS_MAX_TTL_MS" => {
                    self.tokens.max_ttl_ms = Some(parse_value(name, value)?);
                }
                "GATE_SWEEP_INTERVAL" => {
                    self.gate.sweep_interval = parse_value(name, value)?;
                }
                "GATE_VERIFY_SIGNATURES" => {
                    self.gate.verify_signatures = parse_value(name, value)?;
                }
                _ => {
                    tracing::debug!(variable = %key.as_ref(), "ignoring unknown override");
                }
            }
        }
        Ok(())
    }

    /// Parsed boot trust anchor, if configured
    pub fn expected_kernel_digest(&self) -> Result<Option<ContentDigest>> {
        self.boot
            .expected_kernel_digest
            .as_deref()
            .map(|hex| {
                ContentDigest::from_hex(hex)
                    .ok_or_else(|| TrustError::config("boot.expected_kernel_digest is not a 32-byte hex digest"))
            })
            .transpose()
    }

    /// Decoded manifest trust anchors as raw 32-byte keys
    pub fn manifest_anchor_bytes(&self) -> Result<Vec<[u8; 32]>> {
        self.manifest
            .trust_anchors
            .iter()
            .enumerate()
            .map(|(i, anchor)| {
                hex::decode(anchor)
                    .ok()
                    .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
                    .ok_or_else(|| {
                        TrustError::config(format!(
                            "manifest.trust_anchors[{i}] is not a 32-byte hex key"
                        ))
                    })
            })
            .collect()
    }

    /// Validate every section, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.expected_kernel_digest() {
            errors.push(ValidationError::new("boot.expected_kernel_digest", e.to_string()));
        }
        if let Err(e) = self.manifest_anchor_bytes() {
            errors.push(ValidationError::new("manifest.trust_anchors", e.to_string()));
        }
        if self.manifest.max_name_len == 0 {
            errors.push(ValidationError::new("manifest.max_name_len", "must be at least 1"));
        }
        if self.manifest.max_memory_bytes == 0 {
            errors.push(ValidationError::new("manifest.max_memory_bytes", "must be at least 1"));
        }
        if self.tokens.max_ttl_ms == Some(0) {
            errors.push(ValidationError::new("tokens.max_ttl_ms", "must be at least 1"));
        }
        if self.gate.sweep_interval == 0 {
            errors.push(ValidationError::new("gate.sweep_interval", "must be at least 1"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(TrustError::config(joined))
        }
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TrustError::config(format!("{ENV_PREFIX}{name}: cannot parse {value:?}")))
}

/// A single failed validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    field: String,
    message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
