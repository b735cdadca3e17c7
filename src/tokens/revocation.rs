//! Access-token denylist
//!
//! Revoked access tokens are recorded in the coordination store under the
//! SHA-256 of their compact form, with a TTL equal to the token's remaining
//! validity. Keying by hash keeps stored values bounded regardless of claim
//! bloat, and the probe stays O(1). No token is ever valid past its `exp`,
//! so markers never need to outlive it.

use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::store::FlowStore;
use crate::{Error, Result};

/// Writes and probes denylist markers.
#[derive(Clone)]
pub struct RevocationService {
    store: FlowStore,
}

impl RevocationService {
    /// Wrap the coordination store.
    #[must_use]
    pub fn new(store: FlowStore) -> Self {
        Self { store }
    }

    /// Denylist `token` until `exp` (Unix seconds). A token at or past its
    /// expiry is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when the store is unavailable.
    pub async fn revoke(&self, token: &str, exp: i64) -> Result<()> {
        let remaining = exp - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }
        #[allow(clippy::cast_sign_loss)]
        let ttl = Duration::from_secs(remaining as u64);
        self.store
            .put_revocation(&token_digest(token), ttl)
            .await
            .map_err(|e| Error::CoordinationUnavailable(e.to_string()))
    }

    /// O(1) probe: has `token` been revoked?
    ///
    /// # Errors
    ///
    /// Fails when the store is unavailable.
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        self.store
            .is_revoked(&token_digest(token))
            .await
            .map_err(|e| Error::CoordinationUnavailable(e.to_string()))
    }
}

/// SHA-256 hex digest of the compact token; the single canonical denylist key.
fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
