//! Bearer-protected user endpoints
//!
//! `/oauth2/userinfo` answers with OIDC claims from the validated session
//! token; `/me` returns the TMI user document; `/me/logout` self-revokes the
//! presented bearer. Account and group erasure run the two-step
//! challenge/delete protocol.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::auth::BearerToken;
use super::{ApiError, AppState};
use crate::deletion::DeletionChallenge;
use crate::identity::{DeletionOutcome, User};
use crate::tokens::SessionClaims;
use crate::Error;

/// `GET /oauth2/userinfo`: OIDC claims for the presented bearer.
pub async fn oidc_userinfo(Extension(claims): Extension<SessionClaims>) -> Json<Value> {
    let mut document = json!({
        "sub": claims.sub,
        "email": claims.email,
        "name": claims.name,
        "provider": claims.provider,
    });
    if let Some(groups) = claims.groups {
        document["groups"] = json!(groups);
    }
    Json(document)
}

/// `GET /me`: the TMI user document for the session subject.
pub async fn me(
    State(app): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> std::result::Result<Json<User>, ApiError> {
    let user = app
        .users
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(|| Error::InvalidToken("session user no longer exists".to_string()))?;
    Ok(Json(user))
}

/// `POST /me/logout`: revoke the presented bearer token. 204 on success.
pub async fn logout(
    State(app): State<AppState>,
    Extension(token): Extension<BearerToken>,
) -> std::result::Result<StatusCode, ApiError> {
    app.tokens.revoke_access(&token.0).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /me/challenge`: begin account erasure.
pub async fn deletion_challenge(
    State(app): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> std::result::Result<Json<DeletionChallenge>, ApiError> {
    Ok(Json(app.deletion.challenge_user(&claims.email).await?))
}

/// Body of the erasure confirmation requests.
#[derive(Debug, Deserialize)]
pub struct DeleteConfirmation {
    /// The challenge sentence, echoed verbatim
    pub challenge: String,
}

/// `DELETE /me`: finish account erasure and invalidate all sessions.
pub async fn delete_me(
    State(app): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(confirmation): Json<DeleteConfirmation>,
) -> std::result::Result<Json<DeletionOutcome>, ApiError> {
    let outcome = app
        .deletion
        .delete_user(&claims.email, &confirmation.challenge)
        .await?;
    app.tokens.invalidate_all_sessions(&claims.sub).await?;
    Ok(Json(outcome))
}

/// `POST /groups/{name}/challenge`: begin group erasure.
pub async fn group_deletion_challenge(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> std::result::Result<Json<DeletionChallenge>, ApiError> {
    Ok(Json(app.deletion.challenge_group(&name).await?))
}

/// `DELETE /groups/{name}`: finish group erasure.
pub async fn delete_group(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(confirmation): Json<DeleteConfirmation>,
) -> std::result::Result<Json<DeletionOutcome>, ApiError> {
    Ok(Json(
        app.deletion.delete_group(&name, &confirmation.challenge).await?,
    ))
}
