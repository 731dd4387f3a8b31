//! Capability token issuance
//!
//! Tokens are minted only from a [`VerifiedManifest`] and only for a subset of
//! what it declares. Issuance holds the issuer's own lock from generation
//! allocation through registry insertion, so reissues for one module land in
//! generation order. Signing happens under that lock and the vault's, never
//! under the registry's.

use keystone_core::config::TokenConfig;
use keystone_core::time::add_duration;
use keystone_core::{CapabilitySet, PhysicalClock, Result, TrustError};
use keystone_manifest::VerifiedManifest;
use keystone_vault::{SigningGrant, Vault};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::TokenRegistry;
use crate::token::{CapabilityToken, UnsignedCapabilityToken};

/// Mints capability tokens and installs them in the registry
pub struct TokenIssuer {
    vault: Arc<Vault>,
    grant: SigningGrant,
    registry: Arc<TokenRegistry>,
    clock: Arc<dyn PhysicalClock>,
    max_ttl: Option<Duration>,
    last_generation: Mutex<u64>,
}

impl TokenIssuer {
    /// Issuer signing through `grant` and inserting into `registry`
    pub fn new(
        vault: Arc<Vault>,
        grant: SigningGrant,
        registry: Arc<TokenRegistry>,
        clock: Arc<dyn PhysicalClock>,
        config: &TokenConfig,
    ) -> Self {
        Self {
            vault,
            grant,
            registry,
            clock,
            max_ttl: config.max_ttl_ms.map(Duration::from_millis),
            last_generation: Mutex::new(0),
        }
    }

    /// Issue a token for `requested` capabilities
    ///
    /// `ttl = None` asks for a non-expiring token, which the manifest must
    /// allow. Requested TTLs are clamped to the configured maximum; a zero TTL
    /// yields a token that is already expired. Any previous token for the
    /// module is replaced.
    pub fn issue(
        &self,
        manifest: &VerifiedManifest,
        requested: CapabilitySet,
        ttl: Option<Duration>,
    ) -> Result<CapabilityToken> {
        let module = manifest.module_id();
        let declared = manifest.declared_capabilities();

        if requested.is_empty() {
            tracing::warn!(%module, "token requested with no capabilities");
            return Err(TrustError::EmptyCapabilitySet);
        }
        if !requested.is_subset_of(declared) {
            tracing::warn!(%module, %requested, %declared, "capability overreach");
            return Err(TrustError::CapabilityOverreach {
                requested,
                declared,
            });
        }
        if ttl.is_none() && !manifest.allow_persistent_token() {
            tracing::warn!(%module, "persistent token not permitted by manifest");
            return Err(TrustError::PersistentTokenDenied {
                module: module.clone(),
            });
        }

        let mut last_generation = self.last_generation.lock();
        let issued_at = self.clock.now_ms()?;
        let expires_at = ttl.map(|ttl| {
            let ttl = self.max_ttl.map_or(ttl, |max| ttl.min(max));
            add_duration(issued_at, ttl)
        });
        let generation = *last_generation + 1;

        let unsigned = UnsignedCapabilityToken {
            owner: module.clone(),
            permissions: requested,
            issued_at,
            expires_at,
            generation,
        };
        let signature = self.vault.sign(&self.grant, &unsigned.signing_bytes()?)?;
        let token = unsigned.into_signed(signature);

        let replaced = self.registry.insert(token.clone())?;
        *last_generation = generation;
        drop(last_generation);

        tracing::debug!(
            %module,
            permissions = %requested,
            generation,
            issued_at,
            expires_at = ?expires_at,
            replaced = ?replaced.as_ref().map(|t| t.generation()),
            "token issued"
        );
        Ok(token)
    }

    /// Generation of the most recently issued token
    pub fn last_generation(&self) -> u64 {
        *self.last_generation.lock()
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("max_ttl", &self.max_ttl)
            .field("last_generation", &self.last_generation())
            .finish_non_exhaustive()
    }
}
