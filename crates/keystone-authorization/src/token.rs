//! Capability tokens
//!
//! A token is a signed, time-bounded grant of a subset of one module's
//! declared capabilities. The signature covers every other field, so any
//! holder of the issuer's public key can re-check a token without consulting
//! the registry.

use ed25519_dalek::{Signature, VerifyingKey};
use keystone_core::{Capability, CapabilitySet, ModuleId, Result, TimestampMs, TrustError};
use keystone_vault::verify_signature;
use serde::{Deserialize, Serialize};

/// Domain separation prefix for token signatures
pub const TOKEN_SIGNING_DOMAIN: &[u8] = b"keystone.token.v1";

/// Signed capability grant for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    owner: ModuleId,
    permissions: CapabilitySet,
    issued_at: TimestampMs,
    expires_at: Option<TimestampMs>,
    generation: u64,
    signature: Signature,
}

impl CapabilityToken {
    /// Module the token belongs to
    pub fn owner(&self) -> &ModuleId {
        &self.owner
    }

    /// Granted capabilities
    pub fn permissions(&self) -> CapabilitySet {
        self.permissions
    }

    /// Issue time
    pub fn issued_at(&self) -> TimestampMs {
        self.issued_at
    }

    /// Expiry time; `None` never expires
    pub fn expires_at(&self) -> Option<TimestampMs> {
        self.expires_at
    }

    /// Issuer-wide serial number
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Issuer signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether the token grants `capability`
    pub fn allows(&self, capability: Capability) -> bool {
        self.permissions.contains(capability)
    }

    /// Expired once `now` reaches `expires_at`
    pub fn is_expired_at(&self, now: TimestampMs) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Check the signature against the issuer's public key
    pub fn verify_signature(&self, authority: &VerifyingKey) -> Result<()> {
        let bytes = self
            .unsigned()
            .signing_bytes()
            .map_err(|_| TrustError::SignatureInvalid)?;
        if verify_signature(authority, &bytes, &self.signature) {
            Ok(())
        } else {
            Err(TrustError::SignatureInvalid)
        }
    }

    fn unsigned(&self) -> UnsignedCapabilityToken {
        UnsignedCapabilityToken {
            owner: self.owner.clone(),
            permissions: self.permissions,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            generation: self.generation,
        }
    }

    #[cfg(test)]
    pub(crate) fn tamper(&mut self, f: impl FnOnce(&mut UnsignedCapabilityToken)) {
        let mut unsigned = self.unsigned();
        f(&mut unsigned);
        self.owner = unsigned.owner;
        self.permissions = unsigned.permissions;
        self.issued_at = unsigned.issued_at;
        self.expires_at = unsigned.expires_at;
        self.generation = unsigned.generation;
    }
}

/// Token fields covered by the signature
#[derive(Debug, Clone, Serialize)]
pub(crate) struct UnsignedCapabilityToken {
    pub(crate) owner: ModuleId,
    pub(crate) permissions: CapabilitySet,
    pub(crate) issued_at: TimestampMs,
    pub(crate) expires_at: Option<TimestampMs>,
    pub(crate) generation: u64,
}

impl UnsignedCapabilityToken {
    pub(crate) fn signing_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| TrustError::serialization(format!("token encoding failed: {e}")))?;
        let mut bytes = Vec::with_capacity(TOKEN_SIGNING_DOMAIN.len() + body.len());
        bytes.extend_from_slice(TOKEN_SIGNING_DOMAIN);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub(crate) fn into_signed(self, signature: Signature) -> CapabilityToken {
        CapabilityToken {
            owner: self.owner,
            permissions: self.permissions,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            generation: self.generation,
            signature,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use keystone_core::EntropySeed;
    use keystone_vault::Vault;

    pub(crate) fn signed_token(
        vault: &Vault,
        grant: &keystone_vault::SigningGrant,
        owner: &str,
        permissions: CapabilitySet,
        issued_at: TimestampMs,
        expires_at: Option<TimestampMs>,
        generation: u64,
    ) -> CapabilityToken {
        let unsigned = UnsignedCapabilityToken {
            owner: ModuleId::new(owner),
            permissions,
            issued_at,
            expires_at,
            generation,
        };
        let signature = vault.sign(grant, &unsigned.signing_bytes().unwrap()).unwrap();
        unsigned.into_signed(signature)
    }

    fn vault() -> Vault {
        Vault::builder(EntropySeed::new([8u8; 32]))
            .deterministic()
            .build()
            .unwrap()
    }

    #[test]
    fn test_signature_roundtrip_and_tamper() {
        let vault = vault();
        let grant = vault.take_signing_grant().unwrap();
        let authority = vault.token_verifying_key();
        let token = signed_token(&vault, &grant, "m1", Capability::IO.into(), 100, Some(200), 1);
        assert!(token.verify_signature(&authority).is_ok());

        let mut widened = token.clone();
        widened.tamper(|t| t.permissions.insert(Capability::Network));
        assert_matches!(widened.verify_signature(&authority), Err(TrustError::SignatureInvalid));

        let mut extended = token.clone();
        extended.tamper(|t| t.expires_at = None);
        assert_matches!(extended.verify_signature(&authority), Err(TrustError::SignatureInvalid));

        let mut stolen = token;
        stolen.tamper(|t| t.owner = ModuleId::new("m2"));
        assert_matches!(stolen.verify_signature(&authority), Err(TrustError::SignatureInvalid));
    }

    #[test]
    fn test_expiry_boundary() {
        let vault = vault();
        let grant = vault.take_signing_grant().unwrap();
        let token = signed_token(&vault, &grant, "m1", Capability::IO.into(), 100, Some(200), 1);
        assert!(!token.is_expired_at(199));
        assert!(token.is_expired_at(200));

        let persistent = signed_token(&vault, &grant, "m1", Capability::IO.into(), 100, None, 2);
        assert!(!persistent.is_expired_at(u64::MAX));
    }
}
