//! HTTP server
//!
//! Wires configuration into the running service: coordination store backend,
//! key manager, provider registries, token and deletion services, then the
//! axum router with graceful shutdown.

pub mod auth;
pub mod oauth;
pub mod router;
pub mod userinfo;
pub mod wellknown;

#[cfg(feature = "saml")]
pub mod saml;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::deletion::DeletionService;
use crate::identity::{MemoryUserRepository, UserRepository, reconciler::IdentityReconciler};
use crate::keys::KeyManager;
use crate::provider::ProviderRegistry;
use crate::store::{CoordinationStore, FlowStore, MemoryStore, RedisStore};
use crate::tokens::TokenService;
use crate::{Error, Result};

pub use router::AppState;

/// Realm advertised in `WWW-Authenticate` challenges.
pub const BEARER_REALM: &str = "tmi";

/// Error wrapper that renders the OAuth `{error, error_description}` shape
/// with the status, `Retry-After`, and `WWW-Authenticate` semantics the
/// taxonomy prescribes.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.oauth_code(),
            "error_description": self.0.detail(),
        }));

        let mut response = (status, body).into_response();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("30"));
        }

        if matches!(self.0, Error::InvalidToken(_)) {
            if let Ok(value) = HeaderValue::from_str(&bearer_challenge(Some(&self.0.detail()))) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}

/// Build the `WWW-Authenticate: Bearer ...` value, escaping embedded quotes.
#[must_use]
pub fn bearer_challenge(error_description: Option<&str>) -> String {
    match error_description {
        Some(description) => {
            let escaped = description.replace('\\', "\\\\").replace('"', "\\\"");
            format!(
                "Bearer realm=\"{BEARER_REALM}\", error=\"invalid_token\", error_description=\"{escaped}\""
            )
        }
        None => format!("Bearer realm=\"{BEARER_REALM}\""),
    }
}

/// The assembled auth service.
pub struct AuthServer {
    config: Config,
    state: AppState,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl AuthServer {
    /// Construct every subsystem from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when configuration is invalid or the coordination
    /// backend cannot be reached.
    pub async fn new(config: Config) -> Result<Self> {
        let base_url = config.server.resolved_base_url();

        let mut sweeper = None;
        let backend: Arc<dyn CoordinationStore> = match config.store.backend {
            StoreBackend::Memory => {
                let store = Arc::new(MemoryStore::new());
                sweeper = Some(MemoryStore::start_sweeper(&store));
                info!("Coordination store: in-process");
                store
            }
            StoreBackend::Redis => {
                let url = config.store.redis.url();
                let store = RedisStore::connect(&url)
                    .await
                    .map_err(|e| Error::Config(format!("store.redis: {e}")))?;
                info!(host = %config.store.redis.host, "Coordination store: redis");
                Arc::new(store)
            }
        };
        let store = FlowStore::new(
            backend,
            Duration::from_secs(config.jwt.refresh_expiration_seconds),
        );

        let keys = Arc::new(KeyManager::from_config(&config.jwt, &base_url)?);
        let providers = Arc::new(ProviderRegistry::from_config(&config)?);
        let users: Arc<dyn UserRepository> = Arc::new(MemoryUserRepository::new());
        let reconciler = Arc::new(IdentityReconciler::new(users.clone()));
        let tokens = Arc::new(TokenService::new(
            keys.clone(),
            store.clone(),
            users.clone(),
            Duration::from_secs(config.jwt.expiration_seconds),
        ));
        let deletion = Arc::new(DeletionService::new(store.clone(), users.clone()));

        #[cfg(feature = "saml")]
        let saml = Arc::new(crate::saml::SamlRegistry::from_config(&config)?);

        let state = AppState {
            config: Arc::new(config.clone()),
            base_url,
            providers,
            store,
            tokens,
            reconciler,
            users,
            keys,
            deletion,
            #[cfg(feature = "saml")]
            saml,
        };

        Ok(Self {
            config,
            state,
            sweeper,
        })
    }

    /// Shared application state; exposed for integration tests.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind and serve until ctrl-c / SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error when the listen address is invalid or the listener
    /// cannot bind.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = router::create_router(self.state);
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "tmi-auth listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        info!("Shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
