//! Shared test harness: an app wired to a stub upstream provider so flows
//! run end-to-end without network access.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use tmi_auth::config::{Config, JwtConfig};
use tmi_auth::deletion::DeletionService;
use tmi_auth::identity::reconciler::IdentityReconciler;
use tmi_auth::identity::{MemoryUserRepository, UserRepository};
use tmi_auth::keys::KeyManager;
use tmi_auth::provider::{
    Provider, ProviderError, ProviderRegistry, UserProfile, UpstreamTokens,
};
use tmi_auth::server::router::{AppState, create_router};
use tmi_auth::tokens::TokenService;
use tmi_auth::store::{FlowStore, MemoryStore};
use tower::ServiceExt;
use url::Url;

/// RFC 7636 appendix B verifier/challenge pair.
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

pub const BASE_URL: &str = "http://127.0.0.1:8080";

/// The only authorization code the stub upstream accepts.
pub const UPSTREAM_CODE: &str = "UPSTREAM";

/// Upstream provider double: hands out a fixed identity for [`UPSTREAM_CODE`].
pub struct StubProvider;

#[async_trait::async_trait]
impl Provider for StubProvider {
    fn id(&self) -> &str {
        "stub"
    }

    fn display_name(&self) -> &str {
        "Stub IdP"
    }

    fn authorization_url(
        &self,
        state: &str,
        _login_hint: Option<&str>,
    ) -> Result<Url, ProviderError> {
        Url::parse(&format!("https://idp.example.com/auth?state={state}"))
            .map_err(|e| ProviderError::Unavailable(e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens, ProviderError> {
        if code == UPSTREAM_CODE {
            Ok(UpstreamTokens {
                access_token: "upstream-access".to_string(),
                refresh_token: None,
                id_token: None,
                expires_in: 3600,
            })
        } else {
            Err(ProviderError::InvalidCode(format!(
                "code {code} refused by upstream"
            )))
        }
    }

    async fn fetch_user_info(
        &self,
        _tokens: &UpstreamTokens,
    ) -> Result<UserProfile, ProviderError> {
        Ok(UserProfile {
            subject: "stub-42".to_string(),
            email: Some("alice@example.com".to_string()),
            email_verified: true,
            name: Some("Alice".to_string()),
            ..UserProfile::default()
        })
    }

    async fn verify_id_token(&self, _id_token: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Build a router plus handles to the state behind it.
pub fn test_app() -> (Router, AppState) {
    let config = Config {
        jwt: JwtConfig {
            secret: Some("integration-test-secret".to_string()),
            ..JwtConfig::default()
        },
        ..Config::default()
    };

    let keys = Arc::new(KeyManager::from_config(&config.jwt, BASE_URL).unwrap());
    let store = FlowStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
    let users: Arc<dyn UserRepository> = Arc::new(MemoryUserRepository::new());
    let reconciler = Arc::new(IdentityReconciler::new(users.clone()));
    let tokens = Arc::new(TokenService::new(
        keys.clone(),
        store.clone(),
        users.clone(),
        Duration::from_secs(3600),
    ));
    let deletion = Arc::new(DeletionService::new(store.clone(), users.clone()));

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(StubProvider));

    let state = AppState {
        config: Arc::new(config),
        base_url: BASE_URL.to_string(),
        providers: Arc::new(providers),
        store,
        tokens,
        reconciler,
        users,
        keys,
        deletion,
        #[cfg(feature = "saml")]
        saml: Arc::new(tmi_auth::saml::SamlRegistry::empty()),
    };

    (create_router(state.clone()), state)
}

/// Drive one request through the router.
pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

/// GET helper.
pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

/// POST a form body, optionally with a bearer token.
pub async fn post_form(
    app: &Router,
    uri: &str,
    body: &str,
    bearer: Option<&str>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

/// Read a response body as JSON.
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Pull a query parameter out of a Location header.
pub fn location_param(response: &Response<Body>, param: &str) -> Option<String> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let url = Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == param)
        .map(|(_, v)| v.into_owned())
}

/// Walk `/authorize` and `/callback`, returning the code+state the client
/// callback would receive.
pub async fn run_browser_flow(app: &Router) -> (String, String) {
    let authorize = get(
        app,
        &format!(
            "/oauth2/authorize?idp=stub&scope=openid&response_type=code&code_challenge={CHALLENGE}&code_challenge_method=S256&client_callback=https://app.example.com/cb"
        ),
    )
    .await;
    assert_eq!(authorize.status(), 302, "authorize should redirect upstream");
    let state = location_param(&authorize, "state").expect("state forwarded upstream");

    let callback = get(
        app,
        &format!("/oauth2/callback?code={UPSTREAM_CODE}&state={state}"),
    )
    .await;
    assert_eq!(callback.status(), 302, "callback should redirect to client");
    let code = location_param(&callback, "code").expect("code forwarded to client");
    let returned_state = location_param(&callback, "state").expect("state echoed to client");

    (code, returned_state)
}
