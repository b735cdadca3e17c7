//! Authorization-code + PKCE flow handlers
//!
//! The browser flow walks `/oauth2/authorize` → upstream IdP →
//! `/oauth2/callback` → client callback → `/oauth2/token`. CSRF state and the
//! PKCE binding live in the coordination store; the binding migrates from the
//! `state` key to the authorization-code key at the callback, and is consumed
//! one-shot at the token endpoint before the upstream exchange runs, so a
//! replayed code finds nothing.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::Url;

use super::{ApiError, AppState, auth::bearer_token};
use crate::config::Config;
use crate::provider::ProviderSummary;
use crate::store::{CodeBindingEntry, OAuthStateEntry, PkceEntry, StoreError};
use crate::tokens::TokenPair;
use crate::tokens::introspect::{self, IntrospectionResponse};
use crate::{Error, Result};

/// `GET /oauth2/providers`
pub async fn list_providers(State(app): State<AppState>) -> Json<Vec<ProviderSummary>> {
    Json(app.providers.list(&app.base_url))
}

/// Query parameters for `/oauth2/authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    idp: Option<String>,
    scope: Option<String>,
    response_type: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    state: Option<String>,
    client_callback: Option<String>,
    login_hint: Option<String>,
}

/// `GET /oauth2/authorize`: validate, persist state + PKCE, redirect upstream.
pub async fn authorize(
    State(app): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> std::result::Result<Response, ApiError> {
    let idp = resolve_idp(params.idp)?;
    let provider = app
        .providers
        .get(&idp)
        .ok_or_else(|| Error::ProviderNotFound(idp.clone()))?;

    match params.response_type.as_deref() {
        Some("code") => {}
        Some(other) => {
            return Err(Error::UnsupportedResponseType(format!(
                "response_type '{other}' is not supported, use 'code'"
            ))
            .into());
        }
        None => {
            return Err(Error::InvalidRequest("response_type is required".to_string()).into());
        }
    }

    let scope = params
        .scope
        .ok_or_else(|| Error::InvalidScope("scope must include openid".to_string()))?;
    if !scope.split_whitespace().any(|s| s == "openid") {
        return Err(Error::InvalidScope("scope must include openid".to_string()).into());
    }

    let code_challenge = params
        .code_challenge
        .ok_or_else(|| Error::InvalidRequest("code_challenge is required".to_string()))?;
    if !is_valid_code_challenge(&code_challenge) {
        return Err(Error::InvalidRequest(
            "code_challenge must be 43-128 characters from the unreserved set".to_string(),
        )
        .into());
    }

    let method = params
        .code_challenge_method
        .unwrap_or_else(|| "S256".to_string());
    if method != "S256" {
        return Err(Error::InvalidRequest(
            "code_challenge_method must be S256".to_string(),
        )
        .into());
    }

    if let Some(callback) = &params.client_callback {
        validate_client_callback(callback)?;
    }

    let oauth_state = params.state.unwrap_or_else(random_token);

    app.store
        .put_state(
            &oauth_state,
            &OAuthStateEntry {
                provider_id: idp.clone(),
                client_callback: params.client_callback.clone(),
                login_hint: params.login_hint.clone(),
            },
        )
        .await?;

    if let Err(err) = app
        .store
        .put_pkce(
            &oauth_state,
            &PkceEntry {
                code_challenge,
                challenge_method: method,
            },
        )
        .await
    {
        // Roll back the half-written flow; TTL is the safety net if this
        // delete also fails
        let _ = app.store.delete_state(&oauth_state).await;
        return Err(err.into());
    }

    let url = provider
        .authorization_url(&oauth_state, params.login_hint.as_deref())
        .map_err(Error::from)?;

    debug!(provider = %idp, "Redirecting to upstream authorization endpoint");
    Ok(found(url.as_str()))
}

/// Query parameters for `/oauth2/callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `GET /oauth2/callback`: consume state, re-bind PKCE to the code, redirect
/// to the client callback.
pub async fn callback(
    State(app): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> std::result::Result<Response, ApiError> {
    let state_param = params
        .state
        .ok_or_else(|| Error::InvalidRequest("state is required".to_string()))?;

    let entry = match app.store.take_state(&state_param).await {
        Ok(entry) => entry,
        Err(StoreError::NotFound) => {
            return Err(
                Error::InvalidRequest("unknown or expired authorization state".to_string()).into(),
            );
        }
        Err(err) => return Err(err.into()),
    };

    let client_callback = entry
        .client_callback
        .clone()
        .or_else(|| app.config.oauth.default_client_callback.clone());

    // Upstream reported a failure; surface it to the client when we know
    // where to send it, 502 otherwise
    if let Some(upstream_error) = params.error {
        let _ = app.store.take_pkce(&state_param).await;
        warn!(error = %upstream_error, "Upstream authorization failed");
        if let Some(callback) = client_callback {
            let mut url = Url::parse(&callback)
                .map_err(|e| Error::InvalidRequest(format!("client callback: {e}")))?;
            url.query_pairs_mut()
                .append_pair("error", "oauth_error")
                .append_pair(
                    "error_description",
                    params.error_description.as_deref().unwrap_or(&upstream_error),
                );
            return Ok(found(url.as_str()));
        }
        return Err(Error::UpstreamUnavailable(upstream_error).into());
    }

    let code = params
        .code
        .ok_or_else(|| Error::InvalidRequest("code is required".to_string()))?;

    let pkce = match app.store.take_pkce(&state_param).await {
        Ok(pkce) => pkce,
        Err(StoreError::NotFound) => {
            return Err(Error::InvalidRequest(
                "authorization flow has no PKCE binding".to_string(),
            )
            .into());
        }
        Err(err) => return Err(err.into()),
    };

    app.store
        .put_code_binding(
            &code,
            &CodeBindingEntry {
                provider_id: entry.provider_id.clone(),
                code_challenge: pkce.code_challenge,
                challenge_method: pkce.challenge_method,
            },
        )
        .await?;

    let callback = client_callback.ok_or_else(|| {
        Error::InvalidRequest("no client callback registered for this flow".to_string())
    })?;
    let mut url = Url::parse(&callback)
        .map_err(|e| Error::InvalidRequest(format!("client callback: {e}")))?;
    url.query_pairs_mut()
        .append_pair("code", &code)
        .append_pair("state", &state_param);

    Ok(found(url.as_str()))
}

/// Body of `/oauth2/token`, accepted as form encoding (RFC 6749) or JSON.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    code_verifier: Option<String>,
    #[allow(dead_code)]
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// `POST /oauth2/token`
pub async fn token(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<TokenPair>, ApiError> {
    let request: TokenRequest = parse_body(&headers, &body)?;
    let grant_type = request
        .grant_type
        .clone()
        .ok_or_else(|| Error::InvalidRequest("grant_type is required".to_string()))?;

    let pair = match grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&app, request).await?,
        "refresh_token" => {
            let refresh = request
                .refresh_token
                .ok_or_else(|| Error::InvalidRequest("refresh_token is required".to_string()))?;
            app.tokens.refresh(&refresh).await?
        }
        "client_credentials" => client_credentials_grant(&app, &request)?,
        other => {
            return Err(Error::UnsupportedGrantType(format!(
                "grant_type '{other}' is not supported"
            ))
            .into());
        }
    };

    Ok(Json(pair))
}

async fn authorization_code_grant(app: &AppState, request: TokenRequest) -> Result<TokenPair> {
    let code = request
        .code
        .ok_or_else(|| Error::InvalidRequest("code is required".to_string()))?;
    let verifier = request
        .code_verifier
        .ok_or_else(|| Error::InvalidRequest("code_verifier is required".to_string()))?;

    // One-shot: the binding is gone after this regardless of the outcome, so
    // a second exchange with the same code fails closed
    let binding = match app.store.take_code_binding(&code).await {
        Ok(binding) => binding,
        Err(StoreError::NotFound) => {
            return Err(Error::InvalidGrant(
                "authorization code is invalid or already used".to_string(),
            ));
        }
        Err(err) => return Err(err.into()),
    };

    verify_pkce(&binding, &verifier)?;

    let provider = app
        .providers
        .get(&binding.provider_id)
        .ok_or_else(|| Error::ProviderNotFound(binding.provider_id.clone()))?;

    let upstream = provider.exchange_code(&code).await.map_err(Error::from)?;
    let profile = provider
        .fetch_user_info(&upstream)
        .await
        .map_err(Error::from)?;

    if let Some(id_token) = &upstream.id_token {
        // Userinfo already gave us a verified subject; a broken ID token is
        // logged, not fatal
        if let Err(err) = provider.verify_id_token(id_token).await {
            warn!(provider = %binding.provider_id, error = %err, "ID token verification failed");
        }
    }

    let user = app.reconciler.reconcile(&binding.provider_id, &profile).await?;
    app.tokens.issue_pair(&user, &profile.groups).await
}

fn client_credentials_grant(app: &AppState, request: &TokenRequest) -> Result<TokenPair> {
    let client_id = request
        .client_id
        .as_deref()
        .ok_or_else(|| Error::InvalidClient("client_id is required".to_string()))?;
    let client_secret = request
        .client_secret
        .as_deref()
        .ok_or_else(|| Error::InvalidClient("client_secret is required".to_string()))?;

    let client = authenticate_client(&app.config, client_id, client_secret)
        .ok_or_else(|| Error::InvalidClient("unknown client or bad secret".to_string()))?;

    app.tokens.issue_client_token(&client.0, &client.1)
}

/// Body of `/oauth2/revoke`.
#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    token: Option<String>,
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// `POST /oauth2/revoke`: RFC 7009. Always 200 once the caller is
/// authenticated, whether or not the token existed.
pub async fn revoke(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<StatusCode, ApiError> {
    let request: RevokeRequest = parse_body(&headers, &body)?;

    let bearer_ok = match bearer_token(&headers) {
        Some(token) => app.tokens.validate(token).await.is_ok(),
        None => false,
    };
    let client_ok = match (&request.client_id, &request.client_secret) {
        (Some(id), Some(secret)) => authenticate_client(&app.config, id, secret).is_some(),
        _ => false,
    };
    if !bearer_ok && !client_ok {
        return Err(Error::InvalidClient(
            "revocation requires a bearer token or client credentials".to_string(),
        )
        .into());
    }

    let token = request
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidRequest("token parameter is required".to_string()))?;
    if has_forbidden_chars(&token) {
        return Err(Error::InvalidRequest(
            "token parameter contains control characters".to_string(),
        )
        .into());
    }

    let hint = request.token_type_hint.as_deref();
    match hint {
        None | Some("access_token" | "refresh_token") => {}
        Some(other) => {
            return Err(Error::InvalidRequest(format!(
                "token_type_hint '{other}' is not supported"
            ))
            .into());
        }
    }

    // Per RFC 7009 §2.2 the outcome is not disclosed; failures are logged
    // and swallowed
    let results = if hint == Some("refresh_token") {
        [
            app.tokens.revoke_refresh(&token).await,
            app.tokens.revoke_access(&token).await,
        ]
    } else {
        [
            app.tokens.revoke_access(&token).await,
            app.tokens.revoke_refresh(&token).await,
        ]
    };
    for result in results {
        if let Err(err) = result {
            warn!(error = %err, "Revocation write failed");
        }
    }

    Ok(StatusCode::OK)
}

/// Body of `/oauth2/introspect`.
#[derive(Debug, Default, Deserialize)]
pub struct IntrospectRequest {
    token: Option<String>,
}

/// `POST /oauth2/introspect`: RFC 7662.
pub async fn introspect(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<IntrospectionResponse>, ApiError> {
    let request: IntrospectRequest = parse_body(&headers, &body)?;
    let token = request
        .token
        .ok_or_else(|| Error::InvalidRequest("token parameter is required".to_string()))?;
    Ok(Json(introspect::introspect(&app.tokens, &token).await))
}

// --- helpers ---

fn resolve_idp(idp: Option<String>) -> Result<String> {
    match idp {
        Some(idp) if !idp.is_empty() => Ok(idp),
        #[cfg(feature = "dev-provider")]
        _ => Ok(crate::provider::dev::DEV_PROVIDER_ID.to_string()),
        #[cfg(not(feature = "dev-provider"))]
        _ => Err(Error::InvalidRequest("idp is required".to_string())),
    }
}

/// RFC 7636 §4.2: 43-128 characters of `[A-Za-z0-9-._~]`.
fn is_valid_code_challenge(challenge: &str) -> bool {
    (43..=128).contains(&challenge.len())
        && challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// Client callbacks must be absolute http(s) URLs with a host.
fn validate_client_callback(callback: &str) -> Result<()> {
    let url = Url::parse(callback)
        .map_err(|e| Error::InvalidRequest(format!("client_callback: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidRequest(
            "client_callback scheme must be http or https".to_string(),
        ));
    }
    if url.host_str().is_none() {
        return Err(Error::InvalidRequest(
            "client_callback must include a host".to_string(),
        ));
    }
    Ok(())
}

/// Compare the presented verifier against the stored challenge.
fn verify_pkce(binding: &CodeBindingEntry, verifier: &str) -> Result<()> {
    let matches = match binding.challenge_method.as_str() {
        "plain" => binding
            .code_challenge
            .as_bytes()
            .ct_eq(verifier.as_bytes())
            .into(),
        _ => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            binding
                .code_challenge
                .as_bytes()
                .ct_eq(computed.as_bytes())
                .into()
        }
    };

    if matches {
        Ok(())
    } else {
        Err(Error::InvalidGrant("PKCE verification failed".to_string()))
    }
}

/// Look up a configured machine client; secret comparison is constant-time.
fn authenticate_client(config: &Config, client_id: &str, secret: &str) -> Option<(String, String)> {
    config.clients.iter().find_map(|client| {
        if client.client_id != client_id {
            return None;
        }
        let expected = client.resolved_secret();
        let ok: bool = expected.as_bytes().ct_eq(secret.as_bytes()).into();
        ok.then(|| (client.client_id.clone(), client.name.clone()))
    })
}

/// Control and zero-width characters have no business inside a token
/// parameter and usually indicate copy-paste smuggling.
fn has_forbidden_chars(token: &str) -> bool {
    token.chars().any(|c| {
        c.is_control() || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
    })
}

/// 256-bit URL-safe random value for `state` and relay tokens.
pub(crate) fn random_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Decode the request body as JSON or form encoding based on Content-Type.
fn parse_body<T: serde::de::DeserializeOwned + Default>(
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T> {
    if body.is_empty() {
        return Ok(T::default());
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        serde_json::from_slice(body)
            .map_err(|e| Error::InvalidRequest(format!("request body: {e}")))
    } else {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| Error::InvalidRequest(format!("request body: {e}")))
    }
}

/// Plain 302 redirect; axum's `Redirect` helpers pick 303/307.
pub(crate) fn found(location: &str) -> Response {
    match axum::http::HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => ApiError(Error::Internal("redirect location not representable".to_string()))
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B vector
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn s256_binding() -> CodeBindingEntry {
        CodeBindingEntry {
            provider_id: "google".to_string(),
            code_challenge: CHALLENGE.to_string(),
            challenge_method: "S256".to_string(),
        }
    }

    #[test]
    fn pkce_s256_accepts_rfc_vector() {
        assert!(verify_pkce(&s256_binding(), VERIFIER).is_ok());
    }

    #[test]
    fn pkce_s256_rejects_wrong_verifier() {
        let err = verify_pkce(&s256_binding(), "wrong").unwrap_err();
        assert!(matches!(err, Error::InvalidGrant(_)));
        assert_eq!(err.detail(), "PKCE verification failed");
    }

    #[test]
    fn pkce_plain_compares_directly() {
        let binding = CodeBindingEntry {
            provider_id: "google".to_string(),
            code_challenge: VERIFIER.to_string(),
            challenge_method: "plain".to_string(),
        };
        assert!(verify_pkce(&binding, VERIFIER).is_ok());
        assert!(verify_pkce(&binding, CHALLENGE).is_err());
    }

    #[test]
    fn code_challenge_format_bounds() {
        assert!(is_valid_code_challenge(CHALLENGE));
        assert!(!is_valid_code_challenge("too-short"));
        assert!(!is_valid_code_challenge(&"a".repeat(129)));
        assert!(is_valid_code_challenge(&"a".repeat(128)));
        assert!(!is_valid_code_challenge(&format!("{}{}", &"a".repeat(42), "!")));
    }

    #[test]
    fn client_callback_validation_enforces_scheme_and_host() {
        assert!(validate_client_callback("https://app.example.com/cb").is_ok());
        assert!(validate_client_callback("http://localhost:3000/cb").is_ok());
        assert!(validate_client_callback("ftp://app.example.com/cb").is_err());
        assert!(validate_client_callback("app.example.com/cb").is_err());
        assert!(validate_client_callback("https:///cb").is_err());
    }

    #[test]
    fn forbidden_chars_detection() {
        assert!(!has_forbidden_chars("tmi_abc123"));
        assert!(has_forbidden_chars("tok\u{200B}en"));
        assert!(has_forbidden_chars("tok\nen"));
        assert!(has_forbidden_chars("tok\u{0}en"));
    }

    #[test]
    fn random_tokens_are_unique_url_safe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn parse_body_handles_form_and_json() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let form: TokenRequest = parse_body(
            &headers,
            &Bytes::from_static(b"grant_type=refresh_token&refresh_token=tmi_abc"),
        )
        .unwrap();
        assert_eq!(form.grant_type.as_deref(), Some("refresh_token"));
        assert_eq!(form.refresh_token.as_deref(), Some("tmi_abc"));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let json: TokenRequest = parse_body(
            &headers,
            &Bytes::from(r#"{"grant_type":"authorization_code","code":"c1"}"#.as_bytes().to_vec()),
        )
        .unwrap();
        assert_eq!(json.grant_type.as_deref(), Some("authorization_code"));
        assert_eq!(json.code.as_deref(), Some("c1"));
    }

    #[test]
    fn authenticate_client_checks_id_and_secret() {
        let mut config = Config::default();
        config.clients.push(crate::config::ClientConfig {
            client_id: "svc".to_string(),
            client_secret: "s3cret".to_string(),
            name: "CI".to_string(),
        });

        assert!(authenticate_client(&config, "svc", "s3cret").is_some());
        assert!(authenticate_client(&config, "svc", "wrong").is_none());
        assert!(authenticate_client(&config, "other", "s3cret").is_none());
    }

    #[test]
    fn found_is_a_302() {
        let response = found("https://app/cb?code=abc");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://app/cb?code=abc"
        );
    }
}
