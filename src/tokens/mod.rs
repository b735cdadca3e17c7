//! Token lifecycle
//!
//! Mints access+refresh pairs, rotates refresh tokens with single-use
//! semantics, revokes access tokens onto the denylist, and validates bearer
//! tokens. Refresh rotation leans on the coordination store's atomic `take`:
//! concurrent refresh attempts with the same token serialize per key, exactly
//! one caller wins, and the losers fail closed with `invalid_grant`.

pub mod introspect;
pub mod revocation;

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::identity::{User, UserRepository};
use crate::keys::KeyManager;
use crate::store::{FlowStore, RefreshEntry, StoreError};
use crate::{Error, Result};

pub use revocation::RevocationService;

/// Claims minted into session access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Internal user id (or client id for machine tokens)
    pub sub: String,
    /// Email
    pub email: String,
    /// Display name
    pub name: String,
    /// Provider the session was established through
    pub provider: String,
    /// Group memberships carried from userinfo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    /// Issued-at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// Issuer (server base URL)
    pub iss: String,
    /// Audience
    pub aud: String,
}

/// Response body for successful token grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Compact session JWT
    pub access_token: String,
    /// Opaque single-use refresh token; absent for machine tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Mints, rotates, revokes, and validates session tokens.
pub struct TokenService {
    keys: Arc<KeyManager>,
    store: FlowStore,
    users: Arc<dyn UserRepository>,
    revocation: RevocationService,
    access_ttl: Duration,
}

impl TokenService {
    /// Assemble the service.
    #[must_use]
    pub fn new(
        keys: Arc<KeyManager>,
        store: FlowStore,
        users: Arc<dyn UserRepository>,
        access_ttl: Duration,
    ) -> Self {
        let revocation = RevocationService::new(store.clone());
        Self {
            keys,
            store,
            users,
            revocation,
            access_ttl,
        }
    }

    /// The denylist service, shared with middleware and introspection.
    #[must_use]
    pub fn revocation(&self) -> &RevocationService {
        &self.revocation
    }

    /// Access-token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Mint an access+refresh pair for an authenticated user.
    ///
    /// # Errors
    ///
    /// Fails when signing fails or the refresh entry cannot be stored.
    pub async fn issue_pair(&self, user: &User, groups: &[String]) -> Result<TokenPair> {
        let now = Utc::now().timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let exp = now + self.access_ttl.as_secs() as i64;

        let claims = SessionClaims {
            sub: user.internal_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            provider: user.provider.clone().unwrap_or_default(),
            groups: if groups.is_empty() {
                None
            } else {
                Some(groups.to_vec())
            },
            iat: now,
            exp,
            iss: self.keys.issuer().to_string(),
            aud: self.keys.audience().to_string(),
        };

        let access_token = self.keys.mint(&claims)?;
        let refresh_token = generate_refresh_token();
        self.store
            .put_refresh(
                &refresh_token,
                &RefreshEntry {
                    user_id: user.internal_id.clone(),
                    issued_at: now,
                },
            )
            .await
            .map_err(store_write_error)?;

        debug!(user = %user.internal_id, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token: Some(refresh_token),
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Mint an access-only token for a machine client (client_credentials).
    ///
    /// # Errors
    ///
    /// Fails when signing fails.
    pub fn issue_client_token(&self, client_id: &str, client_name: &str) -> Result<TokenPair> {
        let now = Utc::now().timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let exp = now + self.access_ttl.as_secs() as i64;

        let claims = SessionClaims {
            sub: client_id.to_string(),
            email: String::new(),
            name: client_name.to_string(),
            provider: "client_credentials".to_string(),
            groups: None,
            iat: now,
            exp,
            iss: self.keys.issuer().to_string(),
            aud: self.keys.audience().to_string(),
        };

        Ok(TokenPair {
            access_token: self.keys.mint(&claims)?,
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Exchange a refresh token for a new pair, invalidating the old token.
    ///
    /// The delete happens before the new pair is minted, so a lost race finds
    /// `NotFound` and fails closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGrant`] when the token is unknown, expired, or
    /// already spent.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let entry = match self.store.take_refresh(refresh_token).await {
            Ok(entry) => entry,
            Err(StoreError::NotFound) => {
                return Err(Error::InvalidGrant(
                    "refresh token is invalid or already used".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let user = self
            .users
            .find_by_id(&entry.user_id)
            .await?
            .ok_or_else(|| Error::InvalidGrant("refresh token owner no longer exists".to_string()))?;

        self.issue_pair(&user, &[]).await
    }

    /// Best-effort refresh revocation; absence is not an error (RFC 7009).
    ///
    /// # Errors
    ///
    /// Fails only when the store is unavailable.
    pub async fn revoke_refresh(&self, refresh_token: &str) -> Result<()> {
        self.store
            .delete_refresh(refresh_token)
            .await
            .map_err(store_write_error)
    }

    /// Denylist an access token until its natural expiry.
    ///
    /// An already-expired token is a no-op success per RFC 7009 §2.2; a token
    /// that fails signature verification is also swallowed so the endpoint
    /// never leaks validity.
    ///
    /// # Errors
    ///
    /// Fails only when the store is unavailable.
    pub async fn revoke_access(&self, access_token: &str) -> Result<()> {
        let (claims, expired) = match self.keys.verify_allow_expired::<SessionClaims>(access_token)
        {
            Ok(result) => result,
            Err(_) => return Ok(()),
        };
        if expired {
            return Ok(());
        }
        self.revocation.revoke(access_token, claims.exp).await?;
        info!(sub = %claims.sub, "Access token revoked");
        Ok(())
    }

    /// Remove every refresh token owned by `user_id`.
    ///
    /// Outstanding access tokens expire naturally or can be revoked
    /// individually; this does not denylist them wholesale.
    ///
    /// # Errors
    ///
    /// Fails when the store is unavailable.
    pub async fn invalidate_all_sessions(&self, user_id: &str) -> Result<usize> {
        let removed = self
            .store
            .purge_refresh_for_user(user_id)
            .await
            .map_err(store_write_error)?;
        info!(user = %user_id, removed, "Invalidated all sessions");
        Ok(removed)
    }

    /// Validate a bearer token: signature, claims, then the denylist probe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any failure.
    pub async fn validate(&self, access_token: &str) -> Result<SessionClaims> {
        let claims: SessionClaims = self.keys.verify(access_token)?;
        if self.revocation.is_revoked(access_token).await? {
            return Err(Error::InvalidToken("token has been revoked".to_string()));
        }
        Ok(claims)
    }
}

/// 256-bit opaque refresh token. The `tmi_` prefix makes leaked tokens
/// greppable and detectable by secret scanners.
fn generate_refresh_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    format!("tmi_{}", URL_SAFE_NO_PAD.encode(random_bytes))
}

/// Storage failures during token writes surface as 503s, not 500s.
fn store_write_error(err: StoreError) -> Error {
    match err {
        StoreError::NotFound => Error::InvalidGrant("entry not found".to_string()),
        StoreError::Unavailable(msg) => Error::CoordinationUnavailable(msg),
        StoreError::Corrupt(msg) => Error::Internal(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::identity::MemoryUserRepository;
    use crate::store::MemoryStore;

    fn service() -> (TokenService, Arc<MemoryUserRepository>) {
        let jwt = JwtConfig {
            secret: Some("unit-test-secret".to_string()),
            ..JwtConfig::default()
        };
        let keys = Arc::new(KeyManager::from_config(&jwt, "https://auth.test").unwrap());
        let store = FlowStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        let users = Arc::new(MemoryUserRepository::new());
        (
            TokenService::new(keys, store, users.clone(), Duration::from_secs(3600)),
            users,
        )
    }

    fn alice() -> User {
        crate::identity::new_user(
            Some("google".into()),
            Some("g-1".into()),
            "alice@example.com".into(),
            true,
            "Alice".into(),
        )
    }

    #[tokio::test]
    async fn issue_and_validate_round_trip() {
        let (service, users) = service();
        let user = alice();
        users.seed(user.clone());

        let pair = service.issue_pair(&user, &["engineers".into()]).await.unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);
        assert!(pair.refresh_token.as_deref().unwrap().starts_with("tmi_"));

        let claims = service.validate(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, user.internal_id);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.provider, "google");
        assert_eq!(claims.groups.as_deref(), Some(&["engineers".to_string()][..]));
    }

    #[tokio::test]
    async fn refresh_rotates_and_spends_old_token() {
        let (service, users) = service();
        let user = alice();
        users.seed(user.clone());

        let pair = service.issue_pair(&user, &[]).await.unwrap();
        let old_refresh = pair.refresh_token.unwrap();

        let rotated = service.refresh(&old_refresh).await.unwrap();
        let new_refresh = rotated.refresh_token.unwrap();
        assert_ne!(new_refresh, old_refresh);

        // The spent token is dead; the new one works
        assert!(matches!(
            service.refresh(&old_refresh).await,
            Err(Error::InvalidGrant(_))
        ));
        assert!(service.refresh(&new_refresh).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_refresh_has_exactly_one_winner() {
        let (service, users) = service();
        let user = alice();
        users.seed(user.clone());

        let pair = service.issue_pair(&user, &[]).await.unwrap();
        let refresh = pair.refresh_token.unwrap();
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            let refresh = refresh.clone();
            handles.push(tokio::spawn(
                async move { service.refresh(&refresh).await.is_ok() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn revoked_access_token_fails_validation_until_exp() {
        let (service, users) = service();
        let user = alice();
        users.seed(user.clone());

        let pair = service.issue_pair(&user, &[]).await.unwrap();
        assert!(service.validate(&pair.access_token).await.is_ok());

        service.revoke_access(&pair.access_token).await.unwrap();
        assert!(matches!(
            service.validate(&pair.access_token).await,
            Err(Error::InvalidToken(_))
        ));

        // Revocation is idempotent
        service.revoke_access(&pair.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn revoking_garbage_is_a_silent_success() {
        let (service, _) = service();
        service.revoke_access("not-a-jwt-at-all").await.unwrap();
    }

    #[tokio::test]
    async fn revoke_refresh_absent_token_is_ok() {
        let (service, _) = service();
        service.revoke_refresh("tmi_never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn invalidate_all_sessions_spends_every_refresh() {
        let (service, users) = service();
        let user = alice();
        users.seed(user.clone());

        let r1 = service.issue_pair(&user, &[]).await.unwrap().refresh_token.unwrap();
        let r2 = service.issue_pair(&user, &[]).await.unwrap().refresh_token.unwrap();

        let removed = service.invalidate_all_sessions(&user.internal_id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(service.refresh(&r1).await.is_err());
        assert!(service.refresh(&r2).await.is_err());
    }

    #[tokio::test]
    async fn client_token_has_no_refresh() {
        let (service, _) = service();
        let pair = service.issue_client_token("svc-1", "CI runner").unwrap();
        assert!(pair.refresh_token.is_none());

        let claims = service.validate(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "svc-1");
        assert_eq!(claims.provider, "client_credentials");
    }

    #[test]
    fn refresh_tokens_are_unique_and_prefixed() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert!(a.starts_with("tmi_"));
        // 32 bytes base64url without padding is 43 chars
        assert_eq!(a.len(), "tmi_".len() + 43);
    }
}
