//! SAML 2.0 Web SSO
//!
//! Mirror of the OAuth flow with a relay-state token standing in for `state`.
//! XML parsing and signature verification are delegated to the library-backed
//! [`SamlProvider`] capability; the controller, relay-state handling, identity
//! reconciliation, and session invalidation are shared with the OAuth side.

pub mod provider;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::{Error, Result};

/// Identity extracted from a verified SAML assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlIdentity {
    /// NameID from the assertion subject
    pub name_id: String,
    /// Email, from attributes or the NameID itself
    pub email: String,
    /// Display name attribute, when present
    pub name: Option<String>,
    /// Group attributes
    pub groups: Vec<String>,
}

/// One SAML identity provider.
///
/// Implementations own assertion parsing and signature verification; callers
/// only ever see verified identities.
#[async_trait::async_trait]
pub trait SamlProvider: Send + Sync {
    /// Stable provider id.
    fn id(&self) -> &str;

    /// Human-readable name for login surfaces.
    fn display_name(&self) -> &str;

    /// Build the IdP redirect for a login, returning the URL and the
    /// AuthnRequest id to match against `InResponseTo`.
    fn login_redirect(&self, relay_state: &str) -> Result<(url::Url, String)>;

    /// Verify a base64 `SAMLResponse` and extract the asserted identity.
    async fn consume_response(
        &self,
        saml_response: &str,
        request_id: Option<&str>,
    ) -> Result<SamlIdentity>;

    /// SP metadata document for this provider.
    fn sp_metadata(&self) -> Result<String>;

    /// Extract the NameID from a logout request body.
    fn logout_name_id(&self, saml_request: &str) -> Result<String>;
}

/// Listing entry for login surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SamlProviderSummary {
    /// Provider id, used in `/saml/{idp}/...` paths
    pub id: String,
    /// Display name
    pub name: String,
    /// Login entry point on this server
    pub login_url: String,
}

/// Holds every configured SAML provider, keyed by id.
pub struct SamlRegistry {
    providers: HashMap<String, Arc<dyn SamlProvider>>,
}

impl SamlRegistry {
    /// Build the registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when an enabled provider is unusable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn SamlProvider>> = HashMap::new();
        let base_url = config.server.resolved_base_url();

        for (id, saml_config) in &config.saml {
            if !saml_config.enabled {
                continue;
            }
            let provider = provider::SamaelProvider::from_config(id, saml_config, &base_url)
                .map_err(|e| Error::Config(format!("saml.{id}: {e}")))?;
            providers.insert(id.clone(), Arc::new(provider));
            tracing::info!(provider = %id, "Registered SAML provider");
        }

        Ok(Self { providers })
    }

    /// An empty registry, for deployments without SAML.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Look up a provider by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn SamlProvider>> {
        self.providers.get(id).cloned()
    }

    /// Registered providers, sorted by id.
    #[must_use]
    pub fn list(&self, base_url: &str) -> Vec<SamlProviderSummary> {
        let mut summaries: Vec<SamlProviderSummary> = self
            .providers
            .values()
            .map(|p| SamlProviderSummary {
                id: p.id().to_string(),
                name: p.display_name().to_string(),
                login_url: format!("{base_url}/saml/{}/login", p.id()),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}
