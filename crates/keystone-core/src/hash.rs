//! Content hashing for images and module payloads
//!
//! One algorithm is used everywhere a digest is produced or compared: boot
//! image measurement, manifest content hashes and the signing tool. It is
//! declared once by [`ALGORITHM`]; changing it there changes it system-wide.
//!
//! Current algorithm: **SHA-256** (32-byte output)
//!
//! Digest comparison goes through [`ContentDigest::ct_eq`], which does not
//! short-circuit on the first differing byte.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Synchronous hashing interface
pub trait HashAlgorithm: Send + Sync + fmt::Debug {
    /// Hash arbitrary bytes to a 32-byte digest
    fn hash(&self, data: &[u8]) -> [u8; 32];

    /// Create an incremental hasher for multi-part input
    fn hasher(&self) -> Box<dyn Hasher>;
}

/// Incremental hashing of multi-part data
pub trait Hasher: Send {
    /// Feed more data
    fn update(&mut self, data: &[u8]);

    /// Consume the hasher and return the digest
    fn finalize(self: Box<Self>) -> [u8; 32];
}

/// SHA-256 implementation
#[derive(Debug, Clone, Copy)]
pub struct Sha256Algorithm;

impl HashAlgorithm for Sha256Algorithm {
    fn hash(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn hasher(&self) -> Box<dyn Hasher> {
        Box::new(Sha256Hasher(Sha256::new()))
    }
}

struct Sha256Hasher(Sha256);

impl Hasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// The hash algorithm used throughout the trust chain.
pub const ALGORITHM: Sha256Algorithm = Sha256Algorithm;

/// Hash bytes with the system algorithm
pub fn hash(data: &[u8]) -> ContentDigest {
    ContentDigest(ALGORITHM.hash(data))
}

/// Incremental hasher using the system algorithm
pub fn hasher() -> Box<dyn Hasher> {
    ALGORITHM.hasher()
}

/// 32-byte content digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time equality
    pub fn ct_eq(&self, other: &ContentDigest) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    /// Parse a 64-character hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", &self.to_hex()[..16])
    }
}
