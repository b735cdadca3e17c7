//! Discovery documents and JWKS
//!
//! OIDC Discovery, RFC 8414 authorization-server metadata, RFC 9728
//! protected-resource metadata, and the JWKS with the single active public
//! key. All documents derive from configuration plus the runtime base URL and
//! are served with an hour of public cacheability.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;
use crate::keys::Jwk;

const CACHE_CONTROL: &str = "public, max-age=3600";

/// OIDC Discovery / RFC 8414 document. The two specs overlap enough that one
/// shape serves both endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer URL
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Userinfo endpoint
    pub userinfo_endpoint: String,
    /// JWKS URL
    pub jwks_uri: String,
    /// Introspection endpoint
    pub introspection_endpoint: String,
    /// Revocation endpoint
    pub revocation_endpoint: String,
    /// Supported response types
    pub response_types_supported: Vec<&'static str>,
    /// Supported grant types
    pub grant_types_supported: Vec<&'static str>,
    /// Supported PKCE methods
    pub code_challenge_methods_supported: Vec<&'static str>,
    /// Supported subject types
    pub subject_types_supported: Vec<&'static str>,
    /// ID-token signing algorithms (the configured family)
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Supported scopes
    pub scopes_supported: Vec<&'static str>,
}

impl AuthorizationServerMetadata {
    fn build(app: &AppState) -> Self {
        let base = &app.base_url;
        Self {
            issuer: base.clone(),
            authorization_endpoint: format!("{base}/oauth2/authorize"),
            token_endpoint: format!("{base}/oauth2/token"),
            userinfo_endpoint: format!("{base}/oauth2/userinfo"),
            jwks_uri: format!("{base}/.well-known/jwks.json"),
            introspection_endpoint: format!("{base}/oauth2/introspect"),
            revocation_endpoint: format!("{base}/oauth2/revoke"),
            response_types_supported: vec!["code"],
            grant_types_supported: vec![
                "authorization_code",
                "refresh_token",
                "client_credentials",
            ],
            code_challenge_methods_supported: vec!["S256"],
            subject_types_supported: vec!["public"],
            id_token_signing_alg_values_supported: vec![app.keys.algorithm_name().to_string()],
            scopes_supported: vec!["openid", "profile", "email"],
        }
    }
}

/// RFC 9728 protected-resource metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedResourceMetadata {
    /// Resource identifier
    pub resource: String,
    /// Authorization servers for this resource
    pub authorization_servers: Vec<String>,
    /// Bearer presentation methods
    pub bearer_methods_supported: Vec<&'static str>,
    /// Supported scopes
    pub scopes_supported: Vec<&'static str>,
    /// JWKS URL
    pub jwks_uri: String,
}

/// JWKS document: the single active public key, or no keys for HS256.
#[derive(Debug, Clone, Serialize)]
pub struct JwksDocument {
    /// Published keys
    pub keys: Vec<Jwk>,
}

/// `GET /.well-known/openid-configuration`
pub async fn openid_configuration(State(app): State<AppState>) -> Response {
    cached_json(&AuthorizationServerMetadata::build(&app))
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn authorization_server_metadata(State(app): State<AppState>) -> Response {
    cached_json(&AuthorizationServerMetadata::build(&app))
}

/// `GET /.well-known/oauth-protected-resource`
pub async fn protected_resource_metadata(State(app): State<AppState>) -> Response {
    let base = &app.base_url;
    cached_json(&ProtectedResourceMetadata {
        resource: base.clone(),
        authorization_servers: vec![base.clone()],
        bearer_methods_supported: vec!["header"],
        scopes_supported: vec!["openid", "profile", "email"],
        jwks_uri: format!("{base}/.well-known/jwks.json"),
    })
}

/// `GET /.well-known/jwks.json`
pub async fn jwks(State(app): State<AppState>) -> Response {
    let keys = app.keys.public_jwk().cloned().into_iter().collect();
    cached_json(&JwksDocument { keys })
}

fn cached_json<T: Serialize>(document: &T) -> Response {
    let mut response = Json(serde_json::json!(document)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static(CACHE_CONTROL),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_lists_required_surface() {
        let metadata = AuthorizationServerMetadata {
            issuer: "https://auth.test".to_string(),
            authorization_endpoint: "https://auth.test/oauth2/authorize".to_string(),
            token_endpoint: "https://auth.test/oauth2/token".to_string(),
            userinfo_endpoint: "https://auth.test/oauth2/userinfo".to_string(),
            jwks_uri: "https://auth.test/.well-known/jwks.json".to_string(),
            introspection_endpoint: "https://auth.test/oauth2/introspect".to_string(),
            revocation_endpoint: "https://auth.test/oauth2/revoke".to_string(),
            response_types_supported: vec!["code"],
            grant_types_supported: vec![
                "authorization_code",
                "refresh_token",
                "client_credentials",
            ],
            code_challenge_methods_supported: vec!["S256"],
            subject_types_supported: vec!["public"],
            id_token_signing_alg_values_supported: vec!["HS256".to_string()],
            scopes_supported: vec!["openid"],
        };

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["response_types_supported"], serde_json::json!(["code"]));
        assert_eq!(
            json["grant_types_supported"],
            serde_json::json!(["authorization_code", "refresh_token", "client_credentials"])
        );
        assert_eq!(
            json["code_challenge_methods_supported"],
            serde_json::json!(["S256"])
        );
    }

    #[test]
    fn empty_jwks_serializes_as_empty_list() {
        let doc = JwksDocument { keys: Vec::new() };
        assert_eq!(serde_json::to_string(&doc).unwrap(), r#"{"keys":[]}"#);
    }
}
