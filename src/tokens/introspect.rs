//! RFC 7662 token introspection
//!
//! Invalid, revoked, and expired tokens all collapse to `{"active": false}`
//! with no further detail, so the endpoint cannot be used as an oracle.

use serde::{Deserialize, Serialize};

use super::TokenService;

/// RFC 7662 introspection response. Only safe claims are echoed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently usable
    pub active: bool,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Token type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued-at, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl IntrospectionResponse {
    /// The uniform negative answer.
    #[must_use]
    pub fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            email: None,
            token_type: None,
            exp: None,
            iat: None,
            iss: None,
            aud: None,
        }
    }
}

/// Introspect `token`, honoring the denylist.
pub async fn introspect(tokens: &TokenService, token: &str) -> IntrospectionResponse {
    match tokens.validate(token).await {
        Ok(claims) => IntrospectionResponse {
            active: true,
            sub: Some(claims.sub),
            email: Some(claims.email),
            token_type: Some("Bearer".to_string()),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            iss: Some(claims.iss),
            aud: Some(claims.aud),
        },
        Err(_) => IntrospectionResponse::inactive(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::identity::MemoryUserRepository;
    use crate::keys::KeyManager;
    use crate::store::{FlowStore, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

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

    #[tokio::test]
    async fn valid_token_echoes_safe_claims() {
        let (service, users) = service();
        let user = crate::identity::new_user(
            Some("google".into()),
            Some("g-1".into()),
            "alice@example.com".into(),
            true,
            "Alice".into(),
        );
        users.seed(user.clone());
        let pair = service.issue_pair(&user, &[]).await.unwrap();

        let response = introspect(&service, &pair.access_token).await;
        assert!(response.active);
        assert_eq!(response.sub.as_deref(), Some(user.internal_id.as_str()));
        assert_eq!(response.email.as_deref(), Some("alice@example.com"));
        assert_eq!(response.token_type.as_deref(), Some("Bearer"));
    }

    #[tokio::test]
    async fn garbage_token_is_inactive_with_no_detail() {
        let (service, _) = service();
        let response = introspect(&service, "garbage").await;
        assert!(!response.active);
        assert!(response.sub.is_none());
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"active":false}"#);
    }

    #[tokio::test]
    async fn revoked_token_is_inactive() {
        let (service, users) = service();
        let user = crate::identity::new_user(
            Some("google".into()),
            Some("g-2".into()),
            "bob@example.com".into(),
            true,
            "Bob".into(),
        );
        users.seed(user.clone());
        let pair = service.issue_pair(&user, &[]).await.unwrap();

        service.revoke_access(&pair.access_token).await.unwrap();
        let response = introspect(&service, &pair.access_token).await;
        assert!(!response.active);
    }
}
