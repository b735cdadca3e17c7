//! Generic OAuth 2.0 / OIDC upstream provider
//!
//! One implementation covers Google, GitHub, Microsoft, and custom OIDC
//! upstreams; the differences live in configuration: endpoint URLs, scopes,
//! extra authorization parameters, the token-endpoint `Accept` header
//! (GitHub answers with form-encoding unless asked for JSON), the userinfo
//! authorization header format, and the ordered userinfo endpoints with their
//! claim mappings.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{Provider, ProviderError, UPSTREAM_TIMEOUT, UserProfile, UpstreamTokens, extract};
use crate::config::{ProviderConfig, UserInfoEndpointConfig};
use crate::{Error, Result};

/// Default `expires_in` when the upstream omits it (RFC 6749 leaves it optional).
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Upstream token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// A userinfo endpoint plus its claim mapping.
#[derive(Debug, Clone)]
struct UserInfoEndpoint {
    url: String,
    claims: HashMap<String, String>,
}

/// Config-driven OAuth 2.0 provider.
pub struct OAuth2Provider {
    id: String,
    display_name: String,
    client_id: String,
    client_secret: String,
    authorization_url: String,
    token_url: String,
    redirect_uri: String,
    scopes: Vec<String>,
    additional_params: Vec<(String, String)>,
    accept_header: Option<String>,
    auth_header_format: String,
    userinfo: Vec<UserInfoEndpoint>,
    id_token_verifier: Option<super::oidc::IdTokenVerifier>,
    http: Client,
}

impl OAuth2Provider {
    /// Build a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when endpoints are missing or the HTTP
    /// client cannot be constructed.
    pub fn from_config(id: &str, config: &ProviderConfig, callback_url: &str) -> Result<Self> {
        if config.authorization_url.is_empty() || config.token_url.is_empty() {
            return Err(Error::Config(format!(
                "providers.{id}: authorization_url and token_url are required"
            )));
        }

        let http = Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("providers.{id}: http client: {e}")))?;

        let id_token_verifier = match (&config.issuer, &config.jwks_url) {
            (Some(issuer), Some(jwks_url)) => Some(super::oidc::IdTokenVerifier::new(
                issuer.clone(),
                jwks_url.clone(),
                config.resolved_client_id(),
                config.skip_issuer_check,
            )),
            _ => None,
        };

        let mut additional_params: Vec<(String, String)> = config
            .additional_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        additional_params.sort();

        let display_name = if config.display_name.is_empty() {
            id.to_string()
        } else {
            config.display_name.clone()
        };

        Ok(Self {
            id: id.to_string(),
            display_name,
            client_id: config.resolved_client_id(),
            client_secret: config.resolved_client_secret(),
            authorization_url: config.authorization_url.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: callback_url.to_string(),
            scopes: config.scopes.clone(),
            additional_params,
            accept_header: config.accept_header.clone(),
            auth_header_format: config
                .auth_header_format
                .clone()
                .unwrap_or_else(|| "Bearer {token}".to_string()),
            userinfo: config
                .userinfo
                .iter()
                .map(|e: &UserInfoEndpointConfig| UserInfoEndpoint {
                    url: e.url.clone(),
                    claims: e.claims.clone(),
                })
                .collect(),
            id_token_verifier,
            http,
        })
    }
}

#[async_trait::async_trait]
impl Provider for OAuth2Provider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn authorization_url(
        &self,
        state: &str,
        login_hint: Option<&str>,
    ) -> std::result::Result<Url, ProviderError> {
        let mut url = Url::parse(&self.authorization_url)
            .map_err(|e| ProviderError::Unavailable(format!("authorization_url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", &self.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &self.scopes.join(" "));
            query.append_pair("state", state);
            if let Some(hint) = login_hint {
                query.append_pair("login_hint", hint);
            }
            for (key, value) in &self.additional_params {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
    ) -> std::result::Result<UpstreamTokens, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let accept = self.accept_header.as_deref().unwrap_or("application/json");
        let response = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, accept)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("token endpoint: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidCode(format!(
                "upstream answered {status}: {body}"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "token endpoint answered {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("token response: {e}")))?;

        debug!(provider = %self.id, has_id_token = token.id_token.is_some(), "Exchanged authorization code");

        Ok(UpstreamTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: token.id_token,
            expires_in: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
        })
    }

    async fn fetch_user_info(
        &self,
        tokens: &UpstreamTokens,
    ) -> std::result::Result<UserProfile, ProviderError> {
        if self.userinfo.is_empty() {
            return Err(ProviderError::ClaimsMissing(format!(
                "provider {} has no userinfo endpoints",
                self.id
            )));
        }

        let authorization = self.auth_header_format.replace("{token}", &tokens.access_token);
        let mut profile = UserProfile::default();

        for (index, endpoint) in self.userinfo.iter().enumerate() {
            let response = self
                .http
                .get(&endpoint.url)
                .header(reqwest::header::AUTHORIZATION, &authorization)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| ProviderError::Unavailable(format!("userinfo: {e}")))?;

            if !response.status().is_success() {
                // Secondary endpoints (e.g. group lookups) failing should not
                // sink a login that already has its essential claims
                if index > 0 {
                    warn!(provider = %self.id, url = %endpoint.url, status = %response.status(),
                        "Secondary userinfo endpoint failed, continuing");
                    continue;
                }
                return Err(ProviderError::Unavailable(format!(
                    "userinfo {} answered {}",
                    endpoint.url,
                    response.status()
                )));
            }

            let document: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Unavailable(format!("userinfo body: {e}")))?;

            apply_claims(&mut profile, &document, &endpoint.claims, index == 0);
        }

        if profile.subject.is_empty() {
            return Err(ProviderError::ClaimsMissing(format!(
                "provider {} userinfo produced no subject",
                self.id
            )));
        }

        Ok(profile)
    }

    async fn verify_id_token(&self, id_token: &str) -> std::result::Result<(), ProviderError> {
        match &self.id_token_verifier {
            Some(verifier) => verifier.verify(&self.http, id_token).await,
            None => Ok(()),
        }
    }
}

/// Well-known claim locations applied when the first endpoint's mapping is
/// silent about an essential claim.
const WELL_KNOWN_DEFAULTS: &[(&str, &str)] = &[
    ("subject", "sub"),
    ("email", "email"),
    ("email_verified", "email_verified"),
    ("name", "name"),
    ("given_name", "given_name"),
    ("family_name", "family_name"),
    ("picture", "picture"),
    ("locale", "locale"),
];

/// Merge one endpoint's claims into `profile`. Earlier endpoints win; later
/// ones only fill gaps.
fn apply_claims(
    profile: &mut UserProfile,
    document: &Value,
    mapping: &HashMap<String, String>,
    apply_defaults: bool,
) {
    let path_for = |claim: &str| -> Option<String> {
        if let Some(path) = mapping.get(claim) {
            return Some(path.clone());
        }
        if apply_defaults {
            return WELL_KNOWN_DEFAULTS
                .iter()
                .find(|(name, _)| *name == claim)
                .map(|(_, path)| (*path).to_string());
        }
        None
    };

    let fill = |slot: &mut Option<String>, claim: &str| {
        if slot.is_none() {
            if let Some(path) = path_for(claim) {
                *slot = extract::extract_string(document, &path);
            }
        }
    };

    if profile.subject.is_empty() {
        if let Some(path) = path_for("subject") {
            if let Some(subject) = extract::extract_string(document, &path) {
                profile.subject = subject;
            }
        }
    }

    fill(&mut profile.email, "email");
    fill(&mut profile.name, "name");
    fill(&mut profile.given_name, "given_name");
    fill(&mut profile.family_name, "family_name");
    fill(&mut profile.picture, "picture");
    fill(&mut profile.locale, "locale");

    if !profile.email_verified {
        if let Some(path) = path_for("email_verified") {
            profile.email_verified = extract::extract_bool(document, &path).unwrap_or(false);
        }
    }

    if profile.groups.is_empty() {
        if let Some(path) = mapping.get("groups") {
            if let Some(groups) = extract::extract_string_list(document, path) {
                profile.groups = groups;
            }
        }
    }
}
