//! Keystone Manifest - module manifests and admission
//!
//! Defines the signed [`ModuleManifest`], the CBOR [`ModuleArtifact`]
//! envelope the packaging tool ships, and the [`ManifestVerifier`] that turns
//! a manifest plus module bytes into a [`VerifiedManifest`].

#![forbid(unsafe_code)]

/// Artifact envelope codec
pub mod artifact;

/// Manifest types and signing
pub mod manifest;

/// Manifest verification
pub mod verifier;

pub use artifact::{ModuleArtifact, ARTIFACT_FORMAT_VERSION};
pub use manifest::{ManifestBuilder, ModuleManifest, UnsignedManifest, MANIFEST_SIGNING_DOMAIN};
pub use verifier::{ManifestVerifier, VerifiedManifest};
