//! Error types for the TMI auth service

use std::io;

use thiserror::Error;

/// Result type alias for the TMI auth service
pub type Result<T> = std::result::Result<T, Error>;

/// TMI auth service errors
///
/// Variants map onto the OAuth error taxonomy: each carries enough context
/// for the HTTP layer to emit `{error, error_description}` per RFC 6749 §5.2.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed request parameter
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Bad authorization code, failed PKCE verification, or missing refresh token
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Requested scope is not acceptable
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// `response_type` other than `code`
    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Grant type outside the supported set
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Client authentication failure (revocation, client_credentials)
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// Bearer token rejected (signature, claims, or denylist)
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Unknown or disabled identity provider
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Upstream identity provider unreachable or misbehaving
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Coordination store (state/PKCE/refresh/denylist) unreachable
    #[error("Coordination store unavailable: {0}")]
    CoordinationUnavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The OAuth `error` code for this variant (RFC 6749 §5.2, RFC 6750 §3.1).
    #[must_use]
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidToken(_) => "invalid_token",
            Self::ProviderNotFound(_) => "not_found",
            Self::UpstreamUnavailable(_) => "upstream_error",
            Self::CoordinationUnavailable(_) => "temporarily_unavailable",
            _ => "server_error",
        }
    }

    /// Bare description for OAuth `error_description` fields, without the
    /// variant prefix the `Display` impl adds.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Config(msg)
            | Self::InvalidRequest(msg)
            | Self::InvalidGrant(msg)
            | Self::InvalidScope(msg)
            | Self::UnsupportedResponseType(msg)
            | Self::UnsupportedGrantType(msg)
            | Self::InvalidClient(msg)
            | Self::InvalidToken(msg)
            | Self::UpstreamUnavailable(msg)
            | Self::CoordinationUnavailable(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::ProviderNotFound(id) => format!("unknown or disabled provider: {id}"),
            other => other.to_string(),
        }
    }

    /// HTTP status code this error surfaces as.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidGrant(_)
            | Self::InvalidScope(_)
            | Self::UnsupportedResponseType(_)
            | Self::UnsupportedGrantType(_) => 400,
            Self::InvalidClient(_) | Self::InvalidToken(_) => 401,
            Self::ProviderNotFound(_) => 404,
            Self::UpstreamUnavailable(_) => 502,
            Self::CoordinationUnavailable(_) => 503,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_codes_follow_rfc6749() {
        assert_eq!(
            Error::InvalidGrant("bad code".into()).oauth_code(),
            "invalid_grant"
        );
        assert_eq!(
            Error::InvalidScope("openid required".into()).oauth_code(),
            "invalid_scope"
        );
        assert_eq!(
            Error::UnsupportedResponseType("token".into()).oauth_code(),
            "unsupported_response_type"
        );
        assert_eq!(
            Error::InvalidClient("no credentials".into()).oauth_code(),
            "invalid_client"
        );
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(Error::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(Error::InvalidClient("x".into()).status_code(), 401);
        assert_eq!(Error::ProviderNotFound("x".into()).status_code(), 404);
        assert_eq!(Error::UpstreamUnavailable("x".into()).status_code(), 502);
        assert_eq!(
            Error::CoordinationUnavailable("x".into()).status_code(),
            503
        );
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }
}
