//! Router assembly and shared application state

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{auth, oauth, userinfo, wellknown};
use crate::config::Config;
use crate::deletion::DeletionService;
use crate::identity::{UserRepository, reconciler::IdentityReconciler};
use crate::keys::KeyManager;
use crate::provider::ProviderRegistry;
use crate::store::FlowStore;
use crate::tokens::TokenService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Full configuration
    pub config: Arc<Config>,
    /// Externally visible base URL (issuer)
    pub base_url: String,
    /// Upstream OAuth/OIDC providers
    pub providers: Arc<ProviderRegistry>,
    /// Ephemeral coordination store
    pub store: FlowStore,
    /// Token lifecycle service
    pub tokens: Arc<TokenService>,
    /// Identity reconciliation
    pub reconciler: Arc<IdentityReconciler>,
    /// Durable user store
    pub users: Arc<dyn UserRepository>,
    /// Signing key manager
    pub keys: Arc<KeyManager>,
    /// Account/group erasure
    pub deletion: Arc<DeletionService>,
    /// SAML providers
    #[cfg(feature = "saml")]
    pub saml: Arc<crate::saml::SamlRegistry>,
}

/// Build the full route table.
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/oauth2/providers", get(oauth::list_providers))
        .route("/oauth2/authorize", get(oauth::authorize))
        .route("/oauth2/callback", get(oauth::callback))
        .route("/oauth2/token", post(oauth::token))
        .route("/oauth2/revoke", post(oauth::revoke))
        .route("/oauth2/introspect", post(oauth::introspect))
        .route(
            "/.well-known/openid-configuration",
            get(wellknown::openid_configuration),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(wellknown::authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(wellknown::protected_resource_metadata),
        )
        .route("/.well-known/jwks.json", get(wellknown::jwks));

    let protected = Router::new()
        .route("/oauth2/userinfo", get(userinfo::oidc_userinfo))
        .route("/me", get(userinfo::me).delete(userinfo::delete_me))
        .route("/me/logout", post(userinfo::logout))
        .route("/me/challenge", post(userinfo::deletion_challenge))
        .route(
            "/groups/{name}/challenge",
            post(userinfo::group_deletion_challenge),
        )
        .route("/groups/{name}", delete(userinfo::delete_group))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let router = Router::new().merge(public).merge(protected);

    #[cfg(feature = "saml")]
    let router = router.merge(
        Router::new()
            .route("/saml/providers", get(super::saml::list_providers))
            .route("/saml/{idp}/metadata", get(super::saml::metadata))
            .route("/saml/{idp}/login", get(super::saml::login))
            .route("/saml/{idp}/acs", post(super::saml::acs))
            .route("/saml/{idp}/slo", post(super::saml::slo)),
    );

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}
