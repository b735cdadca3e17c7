//! TMI Authentication & Authorization Service
//!
//! Brokers user identity between upstream identity providers and TMI clients,
//! minting and revoking its own signed session tokens.
//!
//! # Features
//!
//! - **Authorization code + PKCE** (RFC 6749, RFC 7636) across Google,
//!   GitHub, Microsoft, and custom OIDC upstreams
//! - **Token lifecycle**: HS256/RS256/ES256 session JWTs, single-use refresh
//!   rotation, denylist revocation (RFC 7009), introspection (RFC 7662)
//! - **Identity reconciliation**: deterministic tiered matching with sparse
//!   precreated records
//! - **Discovery**: OIDC Discovery, RFC 8414, RFC 9728, JWKS
//! - **SAML 2.0 Web SSO + SLO** behind the `saml` feature

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod deletion;
pub mod error;
pub mod identity;
pub mod keys;
pub mod provider;
pub mod server;
pub mod store;
pub mod tokens;

#[cfg(feature = "saml")]
pub mod saml;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Filter precedence: `TMI_AUTH_LOG`, then `RUST_LOG`, then the CLI `level`
/// with the HTTP plumbing crates capped at `warn` so request logs stay about
/// auth flows rather than connection churn. `format: Some("json")` emits one
/// flattened JSON object per line for log shippers; anything else is the
/// human-readable form.
///
/// # Errors
///
/// Currently infallible; kept fallible for parity with future sinks.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_env("TMI_AUTH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn,tower=warn")));

    let registry = tracing_subscriber::registry().with(filter);

    if matches!(format, Some("json")) {
        registry
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    Ok(())
}
