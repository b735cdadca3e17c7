//! Bearer authentication middleware
//!
//! Validates the `Authorization: Bearer` token (signature, claims, denylist)
//! and injects the session claims plus the raw token into request extensions.
//! Failures answer 401 with a `WWW-Authenticate` challenge per RFC 6750.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;

use super::{AppState, bearer_challenge};

/// The raw bearer token, kept for self-revocation on logout.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Extract the bearer token from an `Authorization` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware guarding bearer-protected routes.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_string) else {
        return unauthorized(None);
    };

    match state.tokens.validate(&token).await {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            request.extensions_mut().insert(BearerToken(token));
            next.run(request).await
        }
        Err(err) => {
            debug!(error = %err, "Bearer token rejected");
            unauthorized(Some(&err.detail()))
        }
    }
}

/// 401 with the RFC 6750 challenge; no description when no token was sent.
fn unauthorized(error_description: Option<&str>) -> Response {
    let challenge = bearer_challenge(error_description);
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "invalid_token",
            "error_description": error_description.unwrap_or("missing bearer token"),
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}
