//! Ephemeral coordination store
//!
//! TTL-bounded key/value state shared by the OAuth flow, token lifecycle, and
//! deletion challenges: CSRF state, PKCE bindings, refresh tokens, revocation
//! markers. Two interchangeable backends with identical semantics: an
//! in-process map ([`memory::MemoryStore`]) and a shared Redis-style service
//! ([`redis::RedisStore`]).
//!
//! Contract highlights:
//! - reads of expired entries fail with [`StoreError::NotFound`], never stale data
//! - `take` is an atomic read-and-delete; it is the primitive behind one-shot
//!   PKCE bindings and single-use refresh rotation
//! - deletes are idempotent
//! - per-key operations serialize; there is no cross-key ordering

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// TTL for OAuth state, PKCE bindings, code bindings, and SAML relay state.
pub const FLOW_TTL: Duration = Duration::from_secs(600);

/// TTL for account/group deletion challenges.
pub const DELETION_CHALLENGE_TTL: Duration = Duration::from_secs(180);

/// Errors surfaced by coordination store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Key absent or entry expired.
    #[error("key not found")]
    NotFound,

    /// Backend unreachable or misbehaving; callers answer 503 + Retry-After.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored value failed to round-trip through serde.
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => crate::Error::InvalidGrant("entry not found".to_string()),
            StoreError::Unavailable(msg) => crate::Error::CoordinationUnavailable(msg),
            StoreError::Corrupt(msg) => crate::Error::Internal(msg),
        }
    }
}

/// Backend-agnostic TTL key/value operations.
///
/// Implementations must be `Send + Sync`: the store is shared across request
/// tasks.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Write `value` under `key`, overwriting atomically, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read the live value under `key`.
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Atomically read and delete the live value under `key`.
    async fn take(&self, key: &str) -> Result<String, StoreError>;

    /// Delete `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// OAuth state entry, written at `/authorize`, consumed exactly once at `/callback`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthStateEntry {
    /// Upstream provider id chosen at `/authorize`
    pub provider_id: String,
    /// Per-client callback URL to redirect to after the upstream round-trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_callback: Option<String>,
    /// Login hint forwarded to the upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
}

/// PKCE binding, keyed first by `state`, re-bound to the authorization code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PkceEntry {
    /// The client's code challenge
    pub code_challenge: String,
    /// `S256` or `plain`
    pub challenge_method: String,
}

/// Binding written when an authorization code is handed to the client.
///
/// Carries everything the token endpoint needs to finish the flow after the
/// state entry has already been consumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeBindingEntry {
    /// Upstream provider id
    pub provider_id: String,
    /// The client's code challenge
    pub code_challenge: String,
    /// `S256` or `plain`
    pub challenge_method: String,
}

/// Refresh token record: who owns it and when it was minted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshEntry {
    /// Owning user's internal id
    pub user_id: String,
    /// Unix timestamp of issuance
    pub issued_at: i64,
}

/// SAML relay-state entry, the SAML analogue of [`OAuthStateEntry`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayEntry {
    /// SAML provider id
    pub provider_id: String,
    /// Per-client callback URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_callback: Option<String>,
    /// AuthnRequest id, matched against `InResponseTo`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Typed façade over a [`CoordinationStore`]: owns key prefixes and the serde
/// round-trips for each entry kind.
#[derive(Clone)]
pub struct FlowStore {
    inner: Arc<dyn CoordinationStore>,
    refresh_ttl: Duration,
}

impl FlowStore {
    /// Wrap a backend with the configured refresh-token lifetime.
    #[must_use]
    pub fn new(inner: Arc<dyn CoordinationStore>, refresh_ttl: Duration) -> Self {
        Self { inner, refresh_ttl }
    }

    /// Direct access to the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CoordinationStore> {
        &self.inner
    }

    async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)
            .map_err(|e| StoreError::Corrupt(format!("serialize {key}: {e}")))?;
        self.inner.put(key, &json, ttl).await
    }

    async fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let json = self.inner.take(key).await?;
        serde_json::from_str(&json)
            .map_err(|e| StoreError::Corrupt(format!("deserialize {key}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let json = self.inner.get(key).await?;
        serde_json::from_str(&json)
            .map_err(|e| StoreError::Corrupt(format!("deserialize {key}: {e}")))
    }

    // --- OAuth state ---

    /// Persist the `/authorize` state entry.
    pub async fn put_state(&self, state: &str, entry: &OAuthStateEntry) -> Result<(), StoreError> {
        self.put_json(&format!("oauth_state:{state}"), entry, FLOW_TTL)
            .await
    }

    /// Consume the state entry exactly once.
    pub async fn take_state(&self, state: &str) -> Result<OAuthStateEntry, StoreError> {
        self.take_json(&format!("oauth_state:{state}")).await
    }

    /// Best-effort rollback of a state entry after a partial write.
    pub async fn delete_state(&self, state: &str) -> Result<(), StoreError> {
        self.inner.delete(&format!("oauth_state:{state}")).await
    }

    // --- PKCE bindings ---

    /// Persist the PKCE challenge keyed by `state`.
    pub async fn put_pkce(&self, state: &str, entry: &PkceEntry) -> Result<(), StoreError> {
        self.put_json(&format!("pkce:{state}"), entry, FLOW_TTL).await
    }

    /// Consume the state-keyed PKCE challenge (one-shot).
    pub async fn take_pkce(&self, state: &str) -> Result<PkceEntry, StoreError> {
        self.take_json(&format!("pkce:{state}")).await
    }

    /// Bind flow context to the authorization code handed to the client.
    pub async fn put_code_binding(
        &self,
        code: &str,
        entry: &CodeBindingEntry,
    ) -> Result<(), StoreError> {
        self.put_json(&format!("authcode:{code}"), entry, FLOW_TTL)
            .await
    }

    /// Consume the code binding (one-shot; deletion happens before the
    /// upstream exchange so a replayed code finds nothing).
    pub async fn take_code_binding(&self, code: &str) -> Result<CodeBindingEntry, StoreError> {
        self.take_json(&format!("authcode:{code}")).await
    }

    // --- Refresh tokens ---

    /// Record a freshly minted refresh token.
    pub async fn put_refresh(&self, token: &str, entry: &RefreshEntry) -> Result<(), StoreError> {
        self.put_json(&format!("refresh:{token}"), entry, self.refresh_ttl)
            .await
    }

    /// Atomically consume a refresh token. At most one concurrent caller wins.
    pub async fn take_refresh(&self, token: &str) -> Result<RefreshEntry, StoreError> {
        self.take_json(&format!("refresh:{token}")).await
    }

    /// Best-effort refresh revocation; absence is not an error.
    pub async fn delete_refresh(&self, token: &str) -> Result<(), StoreError> {
        self.inner.delete(&format!("refresh:{token}")).await
    }

    /// Remove every refresh entry owned by `user_id`. Returns how many fell.
    pub async fn purge_refresh_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let keys = self.inner.keys_with_prefix("refresh:").await?;
        let mut removed = 0;
        for key in keys {
            match self.get_json::<RefreshEntry>(&key).await {
                Ok(entry) if entry.user_id == user_id => {
                    self.inner.delete(&key).await?;
                    removed += 1;
                }
                Ok(_) => {}
                // Raced with expiry between scan and read
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    // --- Revocation markers ---

    /// Denylist an access token (by hash) for the remainder of its validity.
    pub async fn put_revocation(&self, token_hash: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner
            .put(&format!("revoked:{token_hash}"), "1", ttl)
            .await
    }

    /// O(1) denylist probe.
    pub async fn is_revoked(&self, token_hash: &str) -> Result<bool, StoreError> {
        match self.inner.get(&format!("revoked:{token_hash}")).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // --- Deletion challenges ---

    /// Store a deletion-challenge token for `email`.
    pub async fn put_deletion_challenge(
        &self,
        kind: &str,
        subject: &str,
        token: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .put(
                &format!("{kind}_deletion_challenge:{subject}"),
                token,
                DELETION_CHALLENGE_TTL,
            )
            .await
    }

    /// Consume a deletion-challenge token (single use).
    pub async fn take_deletion_challenge(
        &self,
        kind: &str,
        subject: &str,
    ) -> Result<String, StoreError> {
        self.inner
            .take(&format!("{kind}_deletion_challenge:{subject}"))
            .await
    }

    // --- SAML relay state ---

    /// Persist a SAML relay-state entry.
    pub async fn put_relay(&self, relay: &str, entry: &RelayEntry) -> Result<(), StoreError> {
        self.put_json(&format!("saml_relay:{relay}"), entry, FLOW_TTL)
            .await
    }

    /// Consume a SAML relay-state entry exactly once.
    pub async fn take_relay(&self, relay: &str) -> Result<RelayEntry, StoreError> {
        self.take_json(&format!("saml_relay:{relay}")).await
    }
}
