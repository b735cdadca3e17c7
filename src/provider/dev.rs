//! In-process development provider
//!
//! Short-circuits the upstream round-trip: the authorization URL points
//! straight back at this server's callback with a synthetic code, and every
//! code exchange yields the same fixed test identity. Compiled only with the
//! `dev-provider` feature so production builds cannot enable it.

use url::Url;

use super::{Provider, ProviderError, UserProfile, UpstreamTokens};

/// Provider id reserved for the dev identity.
pub const DEV_PROVIDER_ID: &str = "tmi";

/// Dev-only identity provider.
pub struct DevProvider {
    callback_url: String,
}

impl DevProvider {
    /// Create the dev provider pointing at this server's own callback.
    #[must_use]
    pub fn new(callback_url: &str) -> Self {
        Self {
            callback_url: callback_url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for DevProvider {
    fn id(&self) -> &str {
        DEV_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "TMI (development)"
    }

    fn authorization_url(
        &self,
        state: &str,
        _login_hint: Option<&str>,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.callback_url)
            .map_err(|e| ProviderError::Unavailable(format!("callback_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("code", "dev-local-code")
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, _code: &str) -> Result<UpstreamTokens, ProviderError> {
        Ok(UpstreamTokens {
            access_token: "dev-access-token".to_string(),
            refresh_token: None,
            id_token: None,
            expires_in: 3600,
        })
    }

    async fn fetch_user_info(
        &self,
        _tokens: &UpstreamTokens,
    ) -> Result<UserProfile, ProviderError> {
        Ok(UserProfile {
            subject: "dev-user-1".to_string(),
            email: Some("dev@tmi.local".to_string()),
            email_verified: true,
            name: Some("Dev User".to_string()),
            ..UserProfile::default()
        })
    }

    async fn verify_id_token(&self, _id_token: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_loops_back_to_callback() {
        let provider = DevProvider::new("http://127.0.0.1:8080/oauth2/callback");
        let url = provider.authorization_url("s-1", None).unwrap();
        assert_eq!(url.path(), "/oauth2/callback");
        assert!(url.query().unwrap().contains("state=s-1"));
    }

    #[tokio::test]
    async fn identity_is_stable() {
        let provider = DevProvider::new("http://127.0.0.1:8080/oauth2/callback");
        let tokens = provider.exchange_code("anything").await.unwrap();
        let profile = provider.fetch_user_info(&tokens).await.unwrap();
        assert_eq!(profile.subject, "dev-user-1");
        assert_eq!(profile.email.as_deref(), Some("dev@tmi.local"));
    }
}
