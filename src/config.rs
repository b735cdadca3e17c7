//! Configuration management
//!
//! Layered configuration: YAML file, then `TMI_AUTH_*` environment variables.
//! Secret-bearing fields accept `env:VAR_NAME` indirection so YAML files can
//! stay free of credentials.

use std::{collections::HashMap, env, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Session token signing configuration
    pub jwt: JwtConfig,
    /// Coordination store configuration
    pub store: StoreConfig,
    /// OAuth flow configuration
    pub oauth: OauthConfig,
    /// Upstream OAuth/OIDC providers, keyed by provider id (`google`, `github`, ...)
    pub providers: HashMap<String, ProviderConfig>,
    /// SAML identity providers, keyed by provider id
    pub saml: HashMap<String, SamlProviderConfig>,
    /// Machine clients for client_credentials and revocation-endpoint auth
    pub clients: Vec<ClientConfig>,
    /// Durable user store connection string (consumed by the repository layer)
    pub database_url: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Externally visible base URL (issuer). Defaults to `http://{host}:{port}`.
    pub base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_url: None,
        }
    }
}

impl ServerConfig {
    /// The issuer/base URL advertised in discovery documents and token claims.
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

/// Session token signing family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SigningMethod {
    /// HMAC-SHA256 with a shared secret
    #[default]
    HS256,
    /// RSA-SHA256 keypair
    RS256,
    /// ECDSA P-256 keypair
    ES256,
}

/// Session token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Signing family for minted session tokens
    pub signing_method: SigningMethod,
    /// Symmetric secret (HS256). Supports `env:VAR_NAME`.
    pub secret: Option<String>,
    /// Key id emitted in the JWT header and JWKS
    pub key_id: String,
    /// Access token lifetime in seconds
    pub expiration_seconds: u64,
    /// Refresh token lifetime in seconds
    pub refresh_expiration_seconds: u64,
    /// Audience claim for minted tokens
    pub audience: String,
    /// RSA private key PEM, inline
    pub rsa_private_key: Option<String>,
    /// RSA private key PEM, filesystem path
    pub rsa_private_key_path: Option<String>,
    /// ECDSA P-256 private key PEM, inline
    pub ecdsa_private_key: Option<String>,
    /// ECDSA P-256 private key PEM, filesystem path
    pub ecdsa_private_key_path: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            signing_method: SigningMethod::HS256,
            secret: None,
            key_id: "tmi-auth-1".to_string(),
            expiration_seconds: 3600,
            refresh_expiration_seconds: 30 * 24 * 3600,
            audience: "tmi".to_string(),
            rsa_private_key: None,
            rsa_private_key_path: None,
            ecdsa_private_key: None,
            ecdsa_private_key_path: None,
        }
    }
}

impl JwtConfig {
    /// Resolve the symmetric secret (expand `env:VAR_NAME`).
    #[must_use]
    pub fn resolved_secret(&self) -> Option<String> {
        self.secret.as_deref().map(resolve_secret)
    }
}

/// Coordination store backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory` (in-process) or `redis` (shared)
    pub backend: StoreBackend,
    /// Redis connection parameters (when `backend: redis`)
    pub redis: RedisConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis: RedisConfig::default(),
        }
    }
}

/// Which coordination backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map with background sweeper
    #[default]
    Memory,
    /// Shared Redis-style service
    Redis,
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Password. Supports `env:VAR_NAME`.
    pub password: Option<String>,
    /// Database index
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Build the `redis://` connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        match self.password.as_deref().map(resolve_secret) {
            Some(pw) if !pw.is_empty() => {
                format!("redis://:{pw}@{}:{}/{}", self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OauthConfig {
    /// Redirect URI registered with upstream providers
    /// (defaults to `{base_url}/oauth2/callback`)
    pub callback_url: Option<String>,
    /// Default client callback when `/authorize` omits `client_callback`
    pub default_client_callback: Option<String>,
}

/// Per-provider upstream OAuth/OIDC configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// Whether this provider is offered on the login surface
    pub enabled: bool,
    /// Display name for login buttons
    pub display_name: String,
    /// OAuth client id. Supports `env:VAR_NAME`.
    pub client_id: String,
    /// OAuth client secret. Supports `env:VAR_NAME`.
    pub client_secret: String,
    /// Upstream authorization endpoint
    pub authorization_url: String,
    /// Upstream token endpoint
    pub token_url: String,
    /// Ordered userinfo endpoints with claim mappings
    pub userinfo: Vec<UserInfoEndpointConfig>,
    /// OIDC issuer (enables ID-token verification together with `jwks_url`)
    pub issuer: Option<String>,
    /// JWKS URL for ID-token verification
    pub jwks_url: Option<String>,
    /// Skip the `iss` check during ID-token verification.
    /// Only legitimate for known non-compliant issuers (Microsoft multitenant).
    pub skip_issuer_check: bool,
    /// Scopes requested from the upstream
    pub scopes: Vec<String>,
    /// Extra query parameters for the authorization URL
    pub additional_params: HashMap<String, String>,
    /// Authorization header template for userinfo calls, `{token}` substituted.
    /// Defaults to `Bearer {token}`.
    pub auth_header_format: Option<String>,
    /// `Accept` header for the token endpoint (GitHub wants `application/json`)
    pub accept_header: Option<String>,
}

impl ProviderConfig {
    /// Resolve the client id (expand `env:VAR_NAME`).
    #[must_use]
    pub fn resolved_client_id(&self) -> String {
        resolve_secret(&self.client_id)
    }

    /// Resolve the client secret (expand `env:VAR_NAME`).
    #[must_use]
    pub fn resolved_client_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// A single userinfo endpoint with its claim mapping
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserInfoEndpointConfig {
    /// Endpoint URL
    pub url: String,
    /// Logical claim → extraction path (`email`, `[0].email`, `value.[*].displayName`, ...)
    pub claims: HashMap<String, String>,
}

/// Per-provider SAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SamlProviderConfig {
    /// Whether this IdP is offered on the login surface
    pub enabled: bool,
    /// Display name for login buttons
    pub display_name: String,
    /// SP entity id (defaults to `{base_url}/saml/{id}/metadata`)
    pub entity_id: Option<String>,
    /// IdP metadata XML, inline
    pub idp_metadata_xml: Option<String>,
    /// IdP metadata XML, filesystem path
    pub idp_metadata_path: Option<String>,
    /// IdP SSO endpoint (redirect binding)
    pub idp_sso_url: String,
    /// Attribute carrying group memberships
    pub groups_attribute: Option<String>,
}

/// Machine client credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,
    /// Client secret. Supports `env:VAR_NAME`.
    pub client_secret: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
}

impl ClientConfig {
    /// Resolve the client secret (expand `env:VAR_NAME`).
    #[must_use]
    pub fn resolved_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// Expand `env:VAR_NAME` values; anything else passes through unchanged.
fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus `TMI_AUTH_*` env vars.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed("TMI_AUTH_").split("__"))
            .extract()
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        for env_file in &config.env_files {
            if let Err(e) = dotenvy::from_path(env_file) {
                tracing::warn!(file = %env_file, error = %e, "Failed to load env file");
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints the serde layer cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.signing_method == SigningMethod::HS256 {
            match self.jwt.resolved_secret() {
                None => {
                    return Err(Error::Config(
                        "jwt.secret is required for HS256 signing".to_string(),
                    ));
                }
                Some(secret) if secret.is_empty() => {
                    return Err(Error::Config("jwt.secret must not be empty".to_string()));
                }
                Some(secret) if secret == "your-secret-key" => {
                    return Err(Error::Config(
                        "jwt.secret must not be the placeholder 'your-secret-key'".to_string(),
                    ));
                }
                _ => {}
            }
        }

        for (id, provider) in &self.providers {
            if !provider.enabled {
                continue;
            }
            if provider.authorization_url.is_empty() {
                return Err(Error::Config(format!(
                    "providers.{id}.authorization_url is required"
                )));
            }
            if provider.token_url.is_empty() {
                return Err(Error::Config(format!(
                    "providers.{id}.token_url is required"
                )));
            }
        }

        Ok(())
    }

    /// Providers enabled for the login surface, in a stable order.
    #[must_use]
    pub fn enabled_providers(&self) -> Vec<(&String, &ProviderConfig)> {
        let mut list: Vec<_> = self.providers.iter().filter(|(_, p)| p.enabled).collect();
        list.sort_by(|a, b| a.0.cmp(b.0));
        list
    }

    /// The redirect URI registered with upstream providers.
    #[must_use]
    pub fn oauth_callback_url(&self) -> String {
        self.oauth.callback_url.clone().unwrap_or_else(|| {
            format!("{}/oauth2/callback", self.server.resolved_base_url())
        })
    }
}
