//! SAML Web SSO handlers
//!
//! `/saml/{idp}/login` stores a relay-state entry and bounces the browser to
//! the IdP; `/saml/{idp}/acs` consumes the assertion, reconciles the
//! identity, and issues a token pair; `/saml/{idp}/slo` invalidates every
//! session of the logged-out user. The relay-state token plays the role the
//! OAuth `state` plays on the other side of the house.

use axum::Json;
use axum::extract::{Form, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use super::oauth::{found, random_token};
use super::{ApiError, AppState};
use crate::provider::UserProfile;
use crate::saml::SamlProviderSummary;
use crate::store::{RelayEntry, StoreError};
use crate::Error;

/// `GET /saml/providers`
pub async fn list_providers(State(app): State<AppState>) -> Json<Vec<SamlProviderSummary>> {
    Json(app.saml.list(&app.base_url))
}

/// `GET /saml/{idp}/metadata`: SP metadata document.
pub async fn metadata(
    State(app): State<AppState>,
    Path(idp): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let provider = app
        .saml
        .get(&idp)
        .ok_or_else(|| Error::ProviderNotFound(idp.clone()))?;
    let document = provider.sp_metadata()?;
    Ok((
        [(header::CONTENT_TYPE, "application/samlmetadata+xml")],
        document,
    )
        .into_response())
}

/// Query parameters for `/saml/{idp}/login`.
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    client_callback: Option<String>,
}

/// `GET /saml/{idp}/login`: store relay state, redirect to the IdP.
pub async fn login(
    State(app): State<AppState>,
    Path(idp): Path<String>,
    Query(params): Query<LoginParams>,
) -> std::result::Result<Response, ApiError> {
    let provider = app
        .saml
        .get(&idp)
        .ok_or_else(|| Error::ProviderNotFound(idp.clone()))?;

    let relay_state = random_token();
    let (url, request_id) = provider.login_redirect(&relay_state)?;

    app.store
        .put_relay(
            &relay_state,
            &RelayEntry {
                provider_id: idp,
                client_callback: params.client_callback,
                request_id: Some(request_id),
            },
        )
        .await?;

    Ok(found(url.as_str()))
}

/// Assertion consumer form body.
#[derive(Debug, Deserialize)]
pub struct AcsForm {
    /// Base64 SAML response
    #[serde(rename = "SAMLResponse")]
    saml_response: String,
    /// Relay-state token issued at login
    #[serde(rename = "RelayState")]
    relay_state: Option<String>,
}

/// `POST /saml/{idp}/acs`: consume the assertion, reconcile, issue tokens.
pub async fn acs(
    State(app): State<AppState>,
    Path(idp): Path<String>,
    Form(form): Form<AcsForm>,
) -> std::result::Result<Response, ApiError> {
    let provider = app
        .saml
        .get(&idp)
        .ok_or_else(|| Error::ProviderNotFound(idp.clone()))?;

    let relay_state = form
        .relay_state
        .ok_or_else(|| Error::InvalidRequest("RelayState is required".to_string()))?;
    let entry = match app.store.take_relay(&relay_state).await {
        Ok(entry) => entry,
        Err(StoreError::NotFound) => {
            return Err(Error::InvalidRequest("unknown or expired relay state".to_string()).into());
        }
        Err(err) => return Err(err.into()),
    };
    if entry.provider_id != idp {
        return Err(Error::InvalidRequest(
            "relay state belongs to a different provider".to_string(),
        )
        .into());
    }

    let identity = provider
        .consume_response(&form.saml_response, entry.request_id.as_deref())
        .await?;

    // An IdP-signed assertion is as strong an email claim as we ever get
    let profile = UserProfile {
        subject: identity.name_id.clone(),
        email: Some(identity.email),
        email_verified: true,
        name: identity.name,
        groups: identity.groups,
        ..UserProfile::default()
    };

    let user = app.reconciler.reconcile(&idp, &profile).await?;
    let pair = app.tokens.issue_pair(&user, &profile.groups).await?;
    info!(provider = %idp, user = %user.internal_id, "SAML login complete");

    match entry.client_callback {
        Some(callback) => {
            // Tokens ride the fragment so they never hit intermediary logs
            let fragment = serde_urlencoded::to_string([
                ("access_token", pair.access_token.as_str()),
                ("refresh_token", pair.refresh_token.as_deref().unwrap_or("")),
                ("token_type", "Bearer"),
                ("expires_in", &pair.expires_in.to_string()),
            ])
            .map_err(|e| Error::Internal(format!("fragment encoding: {e}")))?;
            Ok(found(&format!("{callback}#{fragment}")))
        }
        None => Ok(Json(pair).into_response()),
    }
}

/// Logout form body.
#[derive(Debug, Deserialize)]
pub struct SloForm {
    /// Base64 (or raw XML) logout request
    #[serde(rename = "SAMLRequest")]
    saml_request: String,
}

/// `POST /saml/{idp}/slo`: single logout: drop every session of the user.
pub async fn slo(
    State(app): State<AppState>,
    Path(idp): Path<String>,
    Form(form): Form<SloForm>,
) -> std::result::Result<StatusCode, ApiError> {
    let provider = app
        .saml
        .get(&idp)
        .ok_or_else(|| Error::ProviderNotFound(idp.clone()))?;

    let name_id = provider.logout_name_id(&form.saml_request)?;

    match app.users.find_by_email(&name_id).await? {
        Some(user) => {
            let removed = app.tokens.invalidate_all_sessions(&user.internal_id).await?;
            info!(provider = %idp, user = %user.internal_id, removed, "SAML single logout");
        }
        None => {
            warn!(provider = %idp, "SLO for unknown NameID");
        }
    }

    Ok(StatusCode::OK)
}
