//! Refresh rotation, replay detection and logout over HTTP.

mod common;

use common::{host, TestApp};
use serde_json::json;
use service_core::axum::http::{Method, StatusCode};

async fn refresh(app: &TestApp, subdomain: &str, refresh_token: &str) -> common::TestResponse {
    app.request(
        Method::POST,
        &host(subdomain),
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh_token })),
    )
    .await
}

#[tokio::test]
async fn refresh_rotates_the_pair() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = refresh(&app, "acme", &acme.tokens.refresh_token).await;

    assert_eq!(response.status, StatusCode::OK);
    let new_refresh = response.body["refresh_token"].as_str().unwrap();
    let new_access = response.body["access_token"].as_str().unwrap();
    assert_ne!(new_refresh, acme.tokens.refresh_token);
    assert_eq!(response.body["token_type"], "Bearer");

    let sessions = app.get("acme", "/auth/sessions", new_access).await;
    assert_eq!(sessions.status, StatusCode::OK);
}

#[tokio::test]
async fn replay_after_two_rotations_kills_the_whole_family() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let first = acme.tokens.refresh_token.clone();

    let second = refresh(&app, "acme", &first).await;
    assert_eq!(second.status, StatusCode::OK);
    let second_refresh = second.body["refresh_token"].as_str().unwrap().to_string();

    let third = refresh(&app, "acme", &second_refresh).await;
    assert_eq!(third.status, StatusCode::OK);
    let third_refresh = third.body["refresh_token"].as_str().unwrap().to_string();
    let third_access = third.body["access_token"].as_str().unwrap().to_string();

    // The attacker replays the very first token.
    let replay = refresh(&app, "acme", &first).await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);

    // The legitimate holder is locked out too.
    let legit = refresh(&app, "acme", &third_refresh).await;
    assert_eq!(legit.status, StatusCode::UNAUTHORIZED);
    let listed = app.get("acme", "/auth/sessions", &third_access).await;
    assert_eq!(listed.status, StatusCode::UNAUTHORIZED);

    assert!(!app.store.open_alerts().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_refresh_body_looks_like_any_other_failure() {
    let app = TestApp::spawn().await;

    let empty = refresh(&app, "acme", "").await;
    assert_eq!(empty.status, StatusCode::UNAUTHORIZED);

    let unknown = refresh(&app, "acme", "definitely-not-a-refresh-token").await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(empty.body, unknown.body);
}

#[tokio::test]
async fn logout_revokes_access_and_refresh_tokens() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = app
        .post("acme", "/auth/logout", &acme.tokens.access_token, json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let after = app
        .get("acme", "/auth/sessions", &acme.tokens.access_token)
        .await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);

    let refreshed = refresh(&app, "acme", &acme.tokens.refresh_token).await;
    assert_eq!(refreshed.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sessions_are_listed_and_revocable_individually() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let (user, laptop) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;
    let phone = app
        .state
        .sessions
        .issue_token_pair(
            user.user_id,
            acme.tenant_id,
            "viewer",
            &identity_service::models::DeviceMeta::default(),
        )
        .await
        .unwrap();

    let listed = app.get("acme", "/auth/sessions", &laptop.access_token).await;
    assert_eq!(listed.status, StatusCode::OK);
    let sessions = listed.body.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(
        sessions.iter().filter(|s| s["is_current"] == true).count(),
        1
    );

    let revoked = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/auth/sessions/{}", phone.session_id),
            Some(&laptop.access_token),
            None,
        )
        .await;
    assert_eq!(revoked.status, StatusCode::NO_CONTENT);

    let phone_call = app.get("acme", "/auth/sessions", &phone.access_token).await;
    assert_eq!(phone_call.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn another_users_session_cannot_be_revoked() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let (_, clerk) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;

    let response = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/auth/sessions/{}", acme.tokens.session_id),
            Some(&clerk.access_token),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let owner = app
        .get("acme", "/auth/sessions", &acme.tokens.access_token)
        .await;
    assert_eq!(owner.status, StatusCode::OK);
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let second = app
        .state
        .sessions
        .issue_token_pair(
            acme.user_id,
            acme.tenant_id,
            "tenant_admin",
            &identity_service::models::DeviceMeta::default(),
        )
        .await
        .unwrap();

    let response = app
        .post("acme", "/auth/logout-all", &acme.tokens.access_token, json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["revoked"], 2);

    let other = app.get("acme", "/auth/sessions", &second.access_token).await;
    assert_eq!(other.status, StatusCode::UNAUTHORIZED);
}
