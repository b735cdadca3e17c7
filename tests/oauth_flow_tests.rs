//! End-to-end authorization-code + PKCE flow
//!
//! Drives the HTTP surface against a stub upstream: the happy path, PKCE
//! mismatch one-shot semantics, input validation on `/authorize`, and the
//! sparse-record completion that first logins perform.

mod common;

use common::{CHALLENGE, UPSTREAM_CODE, VERIFIER, get, json_body, post_form, run_browser_flow, test_app};
use pretty_assertions::assert_eq;
use tmi_auth::identity::UserRepository;

#[tokio::test]
async fn pkce_happy_path_issues_token_pair() {
    let (app, _state) = test_app();
    let (code, state) = run_browser_flow(&app).await;

    assert_eq!(code, UPSTREAM_CODE);
    assert_eq!(state.len(), 43, "generated state is 256-bit base64url");

    let response = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code={code}&code_verifier={VERIFIER}"),
        None,
    )
    .await;
    assert_eq!(response.status(), 200);

    let body = json_body(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert!(body["access_token"].as_str().unwrap().contains('.'));
    assert!(body["refresh_token"].as_str().unwrap().starts_with("tmi_"));
}

#[tokio::test]
async fn authorization_code_is_single_use() {
    let (app, _state) = test_app();
    let (code, _) = run_browser_flow(&app).await;

    let first = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code={code}&code_verifier={VERIFIER}"),
        None,
    )
    .await;
    assert_eq!(first.status(), 200);

    let replay = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code={code}&code_verifier={VERIFIER}"),
        None,
    )
    .await;
    assert_eq!(replay.status(), 400);
    assert_eq!(json_body(replay).await["error"], "invalid_grant");
}

#[tokio::test]
async fn pkce_mismatch_fails_and_burns_the_code() {
    let (app, _state) = test_app();
    let (code, _) = run_browser_flow(&app).await;

    let wrong = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code={code}&code_verifier=wrong"),
        None,
    )
    .await;
    assert_eq!(wrong.status(), 400);
    let body = json_body(wrong).await;
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "PKCE verification failed");

    // One-shot: the genuine verifier can no longer redeem the code
    let retry = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code={code}&code_verifier={VERIFIER}"),
        None,
    )
    .await;
    assert_eq!(retry.status(), 400);
    assert_eq!(json_body(retry).await["error"], "invalid_grant");
}

#[tokio::test]
async fn authorize_requires_openid_scope() {
    let (app, _state) = test_app();
    let response = get(
        &app,
        &format!(
            "/oauth2/authorize?idp=stub&scope=profile%20email&response_type=code&code_challenge={CHALLENGE}"
        ),
    )
    .await;
    assert_eq!(response.status(), 400);
    assert_eq!(json_body(response).await["error"], "invalid_scope");
}

#[tokio::test]
async fn authorize_rejects_non_code_response_type() {
    let (app, _state) = test_app();
    let response = get(
        &app,
        &format!(
            "/oauth2/authorize?idp=stub&scope=openid&response_type=token&code_challenge={CHALLENGE}"
        ),
    )
    .await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        json_body(response).await["error"],
        "unsupported_response_type"
    );
}

#[tokio::test]
async fn authorize_requires_code_challenge() {
    let (app, _state) = test_app();
    let response = get(
        &app,
        "/oauth2/authorize?idp=stub&scope=openid&response_type=code",
    )
    .await;
    assert_eq!(response.status(), 400);
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn authorize_rejects_plain_challenge_method() {
    let (app, _state) = test_app();
    let response = get(
        &app,
        &format!(
            "/oauth2/authorize?idp=stub&scope=openid&response_type=code&code_challenge={CHALLENGE}&code_challenge_method=plain"
        ),
    )
    .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn authorize_unknown_provider_is_404() {
    let (app, _state) = test_app();
    let response = get(
        &app,
        &format!(
            "/oauth2/authorize?idp=nope&scope=openid&response_type=code&code_challenge={CHALLENGE}"
        ),
    )
    .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn authorize_rejects_bad_client_callback() {
    let (app, _state) = test_app();
    for callback in ["ftp://app/cb", "not-a-url", "https://"] {
        let response = get(
            &app,
            &format!(
                "/oauth2/authorize?idp=stub&scope=openid&response_type=code&code_challenge={CHALLENGE}&client_callback={callback}"
            ),
        )
        .await;
        assert_eq!(response.status(), 400, "callback {callback} must be refused");
    }
}

#[tokio::test]
async fn callback_with_unknown_state_is_400() {
    let (app, _state) = test_app();
    let response = get(&app, "/oauth2/callback?code=X&state=never-issued").await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn callback_state_is_single_use() {
    let (app, _state) = test_app();
    let authorize = get(
        &app,
        &format!(
            "/oauth2/authorize?idp=stub&scope=openid&response_type=code&code_challenge={CHALLENGE}&client_callback=https://app.example.com/cb"
        ),
    )
    .await;
    let state = common::location_param(&authorize, "state").unwrap();

    let first = get(
        &app,
        &format!("/oauth2/callback?code={UPSTREAM_CODE}&state={state}"),
    )
    .await;
    assert_eq!(first.status(), 302);

    let replay = get(
        &app,
        &format!("/oauth2/callback?code={UPSTREAM_CODE}&state={state}"),
    )
    .await;
    assert_eq!(replay.status(), 400);
}

#[tokio::test]
async fn upstream_rejection_surfaces_as_invalid_grant() {
    let (app, _state) = test_app();
    let authorize = get(
        &app,
        &format!(
            "/oauth2/authorize?idp=stub&scope=openid&response_type=code&code_challenge={CHALLENGE}&client_callback=https://app.example.com/cb"
        ),
    )
    .await;
    let state = common::location_param(&authorize, "state").unwrap();

    // The stub upstream only accepts UPSTREAM; any other code bounces at
    // exchange time with invalid_grant
    let callback = get(&app, &format!("/oauth2/callback?code=BOGUS&state={state}")).await;
    assert_eq!(callback.status(), 302);

    let response = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code=BOGUS&code_verifier={VERIFIER}"),
        None,
    )
    .await;
    assert_eq!(response.status(), 400);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn sparse_record_is_completed_by_first_login() {
    let (app, state) = test_app();

    // Precreate a sparse user for the email the stub IdP asserts
    let sparse = tmi_auth::identity::new_user(
        None,
        None,
        "alice@example.com".to_string(),
        false,
        String::new(),
    );
    let sparse_id = sparse.internal_id.clone();
    state.users.insert(&sparse).await.unwrap();

    let (code, _) = run_browser_flow(&app).await;
    let response = post_form(
        &app,
        "/oauth2/token",
        &format!("grant_type=authorization_code&code={code}&code_verifier={VERIFIER}"),
        None,
    )
    .await;
    assert_eq!(response.status(), 200);

    let user = state.users.find_by_id(&sparse_id).await.unwrap().unwrap();
    assert_eq!(user.provider.as_deref(), Some("stub"));
    assert_eq!(user.provider_subject.as_deref(), Some("stub-42"));
    assert_eq!(user.name, "Alice");
    assert!(user.last_login.is_some());
}

#[tokio::test]
async fn token_endpoint_accepts_json_bodies() {
    let (app, _state) = test_app();
    let (code, _) = run_browser_flow(&app).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/oauth2/token")
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({
                "grant_type": "authorization_code",
                "code": code,
                "code_verifier": VERIFIER,
            })
            .to_string(),
        ))
        .unwrap();
    let response = common::send(&app, request).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn unknown_grant_type_is_rejected() {
    let (app, _state) = test_app();
    let response = post_form(&app, "/oauth2/token", "grant_type=password", None).await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        json_body(response).await["error"],
        "unsupported_grant_type"
    );
}

#[tokio::test]
async fn providers_listing_names_the_stub() {
    let (app, _state) = test_app();
    let response = get(&app, "/oauth2/providers").await;
    assert_eq!(response.status(), 200);
    let body = json_body(response).await;
    assert_eq!(body[0]["id"], "stub");
    assert_eq!(
        body[0]["auth_url"],
        "http://127.0.0.1:8080/oauth2/authorize?idp=stub"
    );
}
