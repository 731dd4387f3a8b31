//! Context-separated key derivation
//!
//! Keys are derived with HKDF-SHA256 from the vault's master secret. The HKDF
//! info string names the context and a version, so keys for different
//! purposes or different modules never coincide, and rotating a version
//! yields an unrelated key.
//!
//! Info format: `keystone:v1:<usage>[:<scope>]:v<version>`

use hkdf::Hkdf;
use keystone_core::{ModuleId, Result, TrustError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const HKDF_SALT: &[u8] = b"keystone:vault:v1";

/// Declared purpose of a derived key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    /// Integrity tags over kernel state
    KernelIntegrity,
    /// Per-module isolation secrets
    ModuleIsolation {
        /// Module the key is bound to
        module: ModuleId,
    },
    /// IPC stream keys between two modules
    IpcStream {
        /// Sending module
        from: ModuleId,
        /// Receiving module
        to: ModuleId,
    },
    /// Network authentication
    NetworkAuth,
}

/// Key derivation context: usage plus rotation version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyContext {
    /// What the key is for
    pub usage: KeyUsage,
    /// Rotation counter
    pub version: u32,
}

impl KeyContext {
    /// Context at version 0
    pub fn new(usage: KeyUsage) -> Self {
        Self { usage, version: 0 }
    }

    /// Set the rotation version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// HKDF info string for this context
    pub fn to_info_string(&self) -> Vec<u8> {
        let mut info = String::from("keystone:v1:");
        match &self.usage {
            KeyUsage::KernelIntegrity => info.push_str("kernel-integrity"),
            KeyUsage::ModuleIsolation { module } => {
                info.push_str("module-isolation:");
                info.push_str(&hex::encode(module.as_str()));
            }
            KeyUsage::IpcStream { from, to } => {
                info.push_str("ipc:");
                info.push_str(&hex::encode(from.as_str()));
                info.push(':');
                info.push_str(&hex::encode(to.as_str()));
            }
            KeyUsage::NetworkAuth => info.push_str("network-auth"),
        }
        info.push_str(":v");
        info.push_str(&self.version.to_string());
        info.into_bytes()
    }
}

/// 256-bit key derived from the vault's master secret, wiped on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; 32],
    #[zeroize(skip)]
    context: KeyContext,
}

impl DerivedKey {
    /// Key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Context the key was derived for
    pub fn context(&self) -> &KeyContext {
        &self.context
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("context", &self.context)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// HKDF-SHA256 expansion of `master` for `context`
pub(crate) fn derive(master: &[u8; 32], context: &KeyContext) -> Result<DerivedKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), master);
    let mut bytes = [0u8; 32];
    hkdf.expand(&context.to_info_string(), &mut bytes)
        .map_err(|e| TrustError::key_derivation(format!("HKDF expansion failed: {e}")))?;
    Ok(DerivedKey {
        bytes,
        context: context.clone(),
    })
}
