//! Builders for signed modules and boot handoffs

use keystone_core::{
    hash, BootFlags, BootHandoff, Capability, CapabilitySet, EntropySeed, MemoryRegion,
    MemoryRegionKind, TimestampMs,
};
use keystone_manifest::{ManifestBuilder, ModuleArtifact, ModuleManifest};

use crate::keys::KeyTestFixture;

/// A module as the packaging tool would produce it
#[derive(Debug, Clone)]
pub struct ModuleFixture {
    name: String,
    version: String,
    capabilities: CapabilitySet,
    allow_persistent_token: bool,
    memory_bytes: u64,
    validity: Option<(TimestampMs, u64)>,
    payload: Vec<u8>,
}

impl ModuleFixture {
    /// Module `name` declaring `capabilities`, with a generated payload
    pub fn new(name: &str, capabilities: &[Capability]) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            capabilities: CapabilitySet::from_capabilities(capabilities),
            allow_persistent_token: false,
            memory_bytes: 4 * 1024 * 1024,
            validity: None,
            payload: format!("\x7fKMOD {name} module image").into_bytes(),
        }
    }

    /// Override the version string
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Override the payload bytes
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Declare eligibility for non-expiring tokens
    pub fn persistent(mut self) -> Self {
        self.allow_persistent_token = true;
        self
    }

    /// Override the declared memory budget
    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// Stamp the manifest as issued at `issued_at`, lapsing `secs` later
    pub fn valid_for(mut self, issued_at: TimestampMs, secs: u64) -> Self {
        self.validity = Some((issued_at, secs));
        self
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capabilities
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Payload bytes
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Manifest signed by `key`
    pub fn manifest(&self, key: &KeyTestFixture) -> ModuleManifest {
        let mut builder = ManifestBuilder::new(self.name.as_str(), self.version.as_str())
            .capabilities(self.capabilities)
            .allow_persistent_token(self.allow_persistent_token)
            .memory_bytes(self.memory_bytes);
        if let Some((issued_at, secs)) = self.validity {
            builder = builder.issued_at(issued_at).expiry_secs(secs);
        }
        builder
            .sign_for(&self.payload, key.signer())
            .expect("fixture manifest signs")
    }

    /// Artifact envelope signed by `key`
    pub fn artifact(&self, key: &KeyTestFixture) -> ModuleArtifact {
        ModuleArtifact::new(self.manifest(key), self.payload.clone())
    }

    /// Encoded artifact signed by `key`
    pub fn artifact_bytes(&self, key: &KeyTestFixture) -> Vec<u8> {
        self.artifact(key).encode().expect("fixture artifact encodes")
    }
}

/// Stand-in kernel image
pub fn kernel_image() -> Vec<u8> {
    let mut image = b"\x7fELF keystone test kernel".to_vec();
    image.resize(4096, 0xCC);
    image
}

/// Fixed entropy seed for reproducible vaults
pub fn test_entropy_seed() -> EntropySeed {
    EntropySeed::new([0x5A; 32])
}

/// Handoff describing `image` as the loader would, with secure boot set
pub fn handoff_for(image: &[u8]) -> BootHandoff {
    BootHandoff {
        flags: BootFlags::SECURE_BOOT | BootFlags::COLD_START,
        image_size: image.len() as u64,
        image_digest: hash::hash(image),
        entropy: test_entropy_seed(),
        memory_map: vec![
            MemoryRegion {
                start: 0,
                len: 0x9_F000,
                kind: MemoryRegionKind::Usable,
            },
            MemoryRegion {
                start: 0xF_0000,
                len: 0x1_0000,
                kind: MemoryRegionKind::Reserved,
            },
            MemoryRegion {
                start: 0x10_0000,
                len: 0x3FF0_0000,
                kind: MemoryRegionKind::Usable,
            },
        ],
    }
}
