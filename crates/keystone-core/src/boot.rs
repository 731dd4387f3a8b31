//! Boot handoff record and boot-time measurement
//!
//! The loader hands the kernel a fixed-layout, little-endian record:
//!
//! ```text
//! offset  size  field
//!      0     8  magic ("KEYSTBOO")
//!      8     4  format version
//!     12     4  boot flags
//!     16     8  image size
//!     24    32  image digest
//!     56    32  entropy seed
//!     88     4  memory region count
//!     92     4  reserved
//!     96  24*n  memory regions { start u64, len u64, kind u32, reserved u32 }
//! ```
//!
//! The kernel's only obligation is to turn the image digest into a
//! [`BootMeasurement`] and record it in the vault before admitting any module.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{Result, TrustError};
use crate::hash::{self, ContentDigest};

/// Boot mode flags carried in the handoff header
pub struct BootFlags;

impl BootFlags {
    /// Debug build of the loader
    pub const DEBUG: u32 = 0x01;
    /// Recovery boot
    pub const RECOVERY: u32 = 0x02;
    /// Loader fell back to a secondary image
    pub const FALLBACK: u32 = 0x04;
    /// Cold start
    pub const COLD_START: u32 = 0x08;
    /// Firmware secure boot was active
    pub const SECURE_BOOT: u32 = 0x10;
}

/// Kind of a physical memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum MemoryRegionKind {
    /// Free for the kernel to use
    Usable = 1,
    /// Reserved by firmware
    Reserved = 2,
    /// ACPI tables, reclaimable after parsing
    AcpiReclaimable = 3,
    /// ACPI non-volatile storage
    AcpiNvs = 4,
    /// Memory-mapped I/O
    Mmio = 5,
    /// Faulty memory
    BadMemory = 0xFFFF_FFFF,
}

impl MemoryRegionKind {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Usable),
            2 => Some(Self::Reserved),
            3 => Some(Self::AcpiReclaimable),
            4 => Some(Self::AcpiNvs),
            5 => Some(Self::Mmio),
            0xFFFF_FFFF => Some(Self::BadMemory),
            _ => None,
        }
    }
}

/// One entry of the platform memory map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    /// Physical start address
    pub start: u64,
    /// Length in bytes
    pub len: u64,
    /// Region kind
    pub kind: MemoryRegionKind,
}

/// Entropy seed passed by the loader
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EntropySeed([u8; 32]);

impl EntropySeed {
    /// Wrap raw seed bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the seed bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EntropySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntropySeed(<redacted>)")
    }
}

/// Boot handoff record, consumed once by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootHandoff {
    /// Boot mode flags
    pub flags: u32,
    /// Length of the loaded image in bytes
    pub image_size: u64,
    /// Digest the loader computed over the image
    pub image_digest: ContentDigest,
    /// Entropy seed for the vault's pool
    pub entropy: EntropySeed,
    /// Platform memory map
    pub memory_map: Vec<MemoryRegion>,
}

impl BootHandoff {
    /// Magic tag at offset 0
    pub const MAGIC: u64 = u64::from_be_bytes(*b"KEYSTBOO");
    /// Layout version understood by this kernel
    pub const FORMAT_VERSION: u32 = 1;
    /// Size of the fixed header
    pub const HEADER_LEN: usize = 96;
    /// Size of one memory region entry
    pub const REGION_LEN: usize = 24;
    /// Upper bound on memory map entries
    pub const MAX_REGIONS: usize = 512;

    /// Encode into the fixed layout
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.memory_map.len() > Self::MAX_REGIONS {
            return Err(TrustError::invalid_handoff("too many memory regions"));
        }
        let mut out =
            Vec::with_capacity(Self::HEADER_LEN + self.memory_map.len() * Self::REGION_LEN);
        out.extend_from_slice(&Self::MAGIC.to_le_bytes());
        out.extend_from_slice(&Self::FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.image_size.to_le_bytes());
        out.extend_from_slice(self.image_digest.as_bytes());
        out.extend_from_slice(self.entropy.as_bytes());
        let count = u32::try_from(self.memory_map.len())
            .map_err(|_| TrustError::invalid_handoff("region count overflow"))?;
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for region in &self.memory_map {
            out.extend_from_slice(&region.start.to_le_bytes());
            out.extend_from_slice(&region.len.to_le_bytes());
            out.extend_from_slice(&(region.kind as u32).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        Ok(out)
    }

    /// Decode and validate the fixed layout
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let reader = LeReader(bytes);
        if bytes.len() < Self::HEADER_LEN {
            return Err(TrustError::invalid_handoff(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }
        if reader.u64(0)? != Self::MAGIC {
            return Err(TrustError::invalid_handoff("bad magic"));
        }
        let version = reader.u32(8)?;
        if version != Self::FORMAT_VERSION {
            return Err(TrustError::invalid_handoff(format!(
                "unsupported format version {version}"
            )));
        }
        let flags = reader.u32(12)?;
        let image_size = reader.u64(16)?;
        let image_digest = ContentDigest::from_bytes(reader.array32(24)?);
        let entropy = EntropySeed::new(reader.array32(56)?);
        let count = reader.u32(88)? as usize;
        if count > Self::MAX_REGIONS {
            return Err(TrustError::invalid_handoff(format!(
                "region count {count} exceeds limit"
            )));
        }
        let expected_len = Self::HEADER_LEN + count * Self::REGION_LEN;
        if bytes.len() != expected_len {
            return Err(TrustError::invalid_handoff(format!(
                "length {} does not match {count} regions",
                bytes.len()
            )));
        }

        let mut memory_map = Vec::with_capacity(count);
        for i in 0..count {
            let base = Self::HEADER_LEN + i * Self::REGION_LEN;
            let raw_kind = reader.u32(base + 16)?;
            let kind = MemoryRegionKind::from_raw(raw_kind).ok_or_else(|| {
                TrustError::invalid_handoff(format!("unknown region kind {raw_kind}"))
            })?;
            memory_map.push(MemoryRegion {
                start: reader.u64(base)?,
                len: reader.u64(base + 8)?,
                kind,
            });
        }

        Ok(Self {
            flags,
            image_size,
            image_digest,
            entropy,
            memory_map,
        })
    }

    /// Whether a flag is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Total bytes of usable memory
    pub fn usable_memory(&self) -> u64 {
        self.memory_map
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .fold(0u64, |acc, r| acc.saturating_add(r.len))
    }

    /// The measurement the loader claims for the image
    pub fn claimed_measurement(&self) -> BootMeasurement {
        BootMeasurement {
            image_size: self.image_size,
            image_hash: self.image_digest,
        }
    }
}

struct LeReader<'a>(&'a [u8]);

impl LeReader<'_> {
    fn slice<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        self.0
            .get(offset..offset + N)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| TrustError::invalid_handoff(format!("read past end at {offset}")))
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        self.slice::<4>(offset).map(u32::from_le_bytes)
    }

    fn u64(&self, offset: usize) -> Result<u64> {
        self.slice::<8>(offset).map(u64::from_le_bytes)
    }

    fn array32(&self, offset: usize) -> Result<[u8; 32]> {
        self.slice::<32>(offset)
    }
}

/// Content hash of the loaded kernel/module image.
///
/// Produced once before control transfers to the image and consumed by the
/// vault when it is recorded. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct BootMeasurement {
    image_size: u64,
    image_hash: ContentDigest,
}

impl BootMeasurement {
    /// Length of the measured image
    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    /// Digest of the measured image
    pub fn image_hash(&self) -> &ContentDigest {
        &self.image_hash
    }

    /// Constant-time comparison of size and digest
    pub fn matches(&self, other: &BootMeasurement) -> bool {
        // Evaluate both sides before combining so the digest comparison always runs.
        let size_eq = self.image_size == other.image_size;
        let hash_eq = self.image_hash.ct_eq(&other.image_hash);
        size_eq & hash_eq
    }
}

/// Computes boot measurements over loaded images
#[derive(Debug, Clone, Copy, Default)]
pub struct BootMeasurementUnit;

impl BootMeasurementUnit {
    /// Measure an image with the system hash algorithm
    pub fn measure(&self, image: &[u8]) -> BootMeasurement {
        BootMeasurement {
            image_size: image.len() as u64,
            image_hash: hash::hash(image),
        }
    }
}
