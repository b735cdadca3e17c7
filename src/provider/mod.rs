//! Upstream identity providers
//!
//! A [`Provider`] brokers one upstream IdP: it builds the authorization URL,
//! exchanges the authorization code, fetches userinfo (possibly across
//! several endpoints), and verifies ID tokens when the provider is OIDC.
//! The [`ProviderRegistry`] constructs providers from configuration and hands
//! them out by id.

pub mod extract;
pub mod oauth2;
pub mod oidc;

#[cfg(feature = "dev-provider")]
pub mod dev;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::Config;

/// Per-call timeout for upstream HTTP (token exchange, userinfo, JWKS).
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The upstream refused the authorization code.
    #[error("authorization code rejected: {0}")]
    InvalidCode(String),

    /// Network failure or timeout talking to the upstream.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// Userinfo yielded no subject.
    #[error("userinfo missing required claims: {0}")]
    ClaimsMissing(String),

    /// The ID token failed OIDC verification.
    #[error("id token invalid: {0}")]
    IdTokenInvalid(String),
}

impl From<ProviderError> for crate::Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCode(msg) => crate::Error::InvalidGrant(msg),
            ProviderError::Unavailable(msg)
            | ProviderError::ClaimsMissing(msg)
            | ProviderError::IdTokenInvalid(msg) => crate::Error::UpstreamUnavailable(msg),
        }
    }
}

/// Tokens returned by the upstream token endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamTokens {
    /// Upstream access token, used against userinfo endpoints
    pub access_token: String,
    /// Upstream refresh token, unused but carried for completeness
    pub refresh_token: Option<String>,
    /// Upstream ID token, verified when issuer + JWKS are configured
    pub id_token: Option<String>,
    /// Seconds until the upstream access token expires
    pub expires_in: u64,
}

/// Identity claims merged from a provider's userinfo endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    /// Stable upstream subject
    pub subject: String,
    /// Email; may be absent for providers that hide it
    pub email: Option<String>,
    /// Whether the upstream asserts the email as verified
    pub email_verified: bool,
    /// Display name
    pub name: Option<String>,
    /// Given name
    pub given_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Locale
    pub locale: Option<String>,
    /// Group memberships at the upstream
    pub groups: Vec<String>,
}

/// One upstream identity provider.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id (`google`, `github`, ...).
    fn id(&self) -> &str;

    /// Human-readable name for login surfaces.
    fn display_name(&self) -> &str;

    /// Build the upstream authorization URL for this flow.
    fn authorization_url(
        &self,
        state: &str,
        login_hint: Option<&str>,
    ) -> Result<url::Url, ProviderError>;

    /// Exchange an authorization code for upstream tokens.
    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens, ProviderError>;

    /// Fetch and merge userinfo claims.
    async fn fetch_user_info(&self, tokens: &UpstreamTokens)
    -> Result<UserProfile, ProviderError>;

    /// Verify the ID token when this provider is configured for OIDC.
    ///
    /// Providers without issuer/JWKS configuration return `Ok(())`.
    async fn verify_id_token(&self, id_token: &str) -> Result<(), ProviderError>;
}

/// Listing entry for login surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    /// Provider id, used as the `idp` query parameter
    pub id: String,
    /// Display name
    pub name: String,
    /// Authorization entry point on this server
    pub auth_url: String,
}

/// Holds every configured provider, keyed by id.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// An empty registry; providers are added with [`Self::register`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider, replacing any existing one with the same id.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Build the registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] when an enabled provider is unusable.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        let callback_url = config.oauth_callback_url();

        for (id, provider_config) in config.enabled_providers() {
            let provider =
                oauth2::OAuth2Provider::from_config(id, provider_config, &callback_url)?;
            providers.insert(id.clone(), Arc::new(provider));
            tracing::info!(provider = %id, "Registered upstream provider");
        }

        #[cfg(feature = "dev-provider")]
        {
            providers.insert(
                dev::DEV_PROVIDER_ID.to_string(),
                Arc::new(dev::DevProvider::new(&callback_url)),
            );
            tracing::warn!("Dev identity provider enabled; never run this build in production");
        }

        Ok(Self { providers })
    }

    /// Look up a provider by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// Registered providers, sorted by id, for the login surface.
    #[must_use]
    pub fn list(&self, base_url: &str) -> Vec<ProviderSummary> {
        let mut summaries: Vec<ProviderSummary> = self
            .providers
            .values()
            .map(|p| ProviderSummary {
                id: p.id().to_string(),
                name: p.display_name().to_string(),
                auth_url: format!("{base_url}/oauth2/authorize?idp={}", p.id()),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
