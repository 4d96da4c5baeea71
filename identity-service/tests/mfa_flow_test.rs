//! Second-factor enrollment and login verification over HTTP.

mod common;

use chrono::Utc;
use common::{host, TestApp};
use identity_service::config::IdentityConfig;
use identity_service::services::mfa::totp::{self, TotpParams};
use identity_service::utils::base32;
use serde_json::json;
use service_core::axum::http::{Method, StatusCode};

fn current_code(secret: &str) -> String {
    let config = IdentityConfig::for_tests();
    let secret = base32::decode(secret).expect("secret is base32");
    totp::code_at(&secret, Utc::now().timestamp(), &TotpParams::from(&config.mfa))
        .expect("code for current step")
}

#[tokio::test]
async fn totp_enroll_confirm_then_login() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", token, json!({ "device_name": "Pixel" }))
        .await;
    assert_eq!(enrolled.status, StatusCode::CREATED);
    let device_id = enrolled.body["device_id"].as_str().unwrap().to_string();
    let secret = enrolled.body["secret"].as_str().unwrap().to_string();
    assert!(enrolled.body["provisioning_uri"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));
    assert_eq!(enrolled.body["backup_codes"].as_array().unwrap().len(), 10);

    // Still pending: its codes are not accepted at login.
    let early = app
        .post("acme", "/mfa/verify", token, json!({ "code": current_code(&secret) }))
        .await;
    assert_eq!(early.status, StatusCode::UNAUTHORIZED);

    let confirmed = app
        .post(
            "acme",
            "/mfa/totp/confirm",
            token,
            json!({ "device_id": device_id, "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(confirmed.status, StatusCode::OK);
    assert_eq!(confirmed.body["verified"], true);

    let login = app
        .post("acme", "/mfa/verify", token, json!({ "code": current_code(&secret) }))
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.body["success"], true);
    assert_eq!(login.body["method"], "totp");

    let devices = app.get("acme", "/mfa/devices", token).await;
    assert_eq!(devices.status, StatusCode::OK);
    let devices = devices.body.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert!(devices[0].get("secret").is_none());
}

#[tokio::test]
async fn wrong_totp_code_does_not_confirm() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", token, json!({}))
        .await;
    assert_eq!(enrolled.status, StatusCode::CREATED);
    let device_id = enrolled.body["device_id"].as_str().unwrap();
    let good = current_code(enrolled.body["secret"].as_str().unwrap());
    let wrong = if good == "000000" { "111111" } else { "000000" };

    let confirmed = app
        .post(
            "acme",
            "/mfa/totp/confirm",
            token,
            json!({ "device_id": device_id, "code": wrong }),
        )
        .await;
    assert_eq!(confirmed.status, StatusCode::OK);
    assert_eq!(confirmed.body["verified"], false);
}

#[tokio::test]
async fn backup_codes_work_exactly_once() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", token, json!({}))
        .await;
    let backup = enrolled.body["backup_codes"][0].as_str().unwrap().to_string();

    let first = app
        .post("acme", "/mfa/verify", token, json!({ "code": backup }))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["method"], "backup_code");

    let again = app
        .post("acme", "/mfa/verify", token, json!({ "code": backup }))
        .await;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regenerating_backup_codes_invalidates_the_old_batch() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", token, json!({}))
        .await;
    let old = enrolled.body["backup_codes"][0].as_str().unwrap().to_string();

    let regenerated = app
        .post("acme", "/mfa/backup-codes/regenerate", token, json!({}))
        .await;
    assert_eq!(regenerated.status, StatusCode::CREATED);
    let fresh = regenerated.body["backup_codes"][0].as_str().unwrap().to_string();

    let stale = app
        .post("acme", "/mfa/verify", token, json!({ "code": old }))
        .await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);

    let ok = app
        .post("acme", "/mfa/verify", token, json!({ "code": fresh }))
        .await;
    assert_eq!(ok.status, StatusCode::OK);
}

#[tokio::test]
async fn email_device_enrolls_and_answers_login_challenge() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();
    let address = "second@acme.test";

    let enrolled = app
        .post("acme", "/mfa/email/enroll", token, json!({ "email": address }))
        .await;
    assert_eq!(enrolled.status, StatusCode::CREATED);
    let device_id = enrolled.body["device_id"].as_str().unwrap().to_string();
    let enrollment_code = app.sender.last_code_for(address).expect("code sent");

    let confirmed = app
        .post(
            "acme",
            "/mfa/code/confirm",
            token,
            json!({ "device_id": device_id, "code": enrollment_code }),
        )
        .await;
    assert_eq!(confirmed.body["verified"], true);

    // An enrollment code is single use.
    let reused = app
        .post(
            "acme",
            "/mfa/code/confirm",
            token,
            json!({ "device_id": device_id, "code": enrollment_code }),
        )
        .await;
    assert_eq!(reused.body["verified"], false);

    let challenge = app
        .post("acme", "/mfa/challenge", token, json!({}))
        .await;
    assert_eq!(challenge.status, StatusCode::OK);
    assert_eq!(challenge.body["sent"], 1);
    let login_code = app.sender.last_code_for(address).expect("login code sent");
    assert_ne!(login_code, enrollment_code);

    let login = app
        .post("acme", "/mfa/verify", token, json!({ "code": login_code }))
        .await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.body["method"], "email");
}

#[tokio::test]
async fn sms_enrollment_rejects_non_e164_numbers() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = app
        .post(
            "acme",
            "/mfa/sms/enroll",
            &acme.tokens.access_token,
            json!({ "phone": "555-1234" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn devices_of_other_users_cannot_be_disabled() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let (_, clerk) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", &acme.tokens.access_token, json!({}))
        .await;
    let device_id = enrolled.body["device_id"].as_str().unwrap();

    let response = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/mfa/devices/{}", device_id),
            Some(&clerk.access_token),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let own = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/mfa/devices/{}", device_id),
            Some(&acme.tokens.access_token),
            None,
        )
        .await;
    assert_eq!(own.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn mfa_verify_is_rate_limited_per_ip() {
    let mut config = IdentityConfig::for_tests();
    config.rate_limit.mfa_verify_attempts = 2;
    let app = TestApp::with_config(config).await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let response = app
            .post("acme", "/mfa/verify", token, json!({ "code": "123456" }))
            .await;
        statuses.push(response.status);
    }
    assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn enrolled_users_must_verify_before_privileged_routes() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", token, json!({}))
        .await;
    let device_id = enrolled.body["device_id"].as_str().unwrap().to_string();
    let secret = enrolled.body["secret"].as_str().unwrap().to_string();
    let confirmed = app
        .post(
            "acme",
            "/mfa/totp/confirm",
            token,
            json!({ "device_id": device_id, "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(confirmed.body["verified"], true);

    let skipped = app.get("acme", "/audit/events", token).await;
    assert_eq!(skipped.status, StatusCode::FORBIDDEN);
    let skipped = app
        .post("acme", "/roles", token, json!({ "name": "auditor", "privilege_level": 10, "permissions": [] }))
        .await;
    assert_eq!(skipped.status, StatusCode::FORBIDDEN);
    let removal = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/mfa/devices/{}", device_id),
            Some(token),
            None,
        )
        .await;
    assert_eq!(removal.status, StatusCode::FORBIDDEN);

    // Non-privileged routes stay open so the user can complete the second factor.
    assert_eq!(app.get("acme", "/auth/sessions", token).await.status, StatusCode::OK);

    let verified = app
        .post("acme", "/mfa/verify", token, json!({ "code": enrolled.body["backup_codes"][0] }))
        .await;
    assert_eq!(verified.status, StatusCode::OK);
    let elevated = verified.body["access_token"].as_str().unwrap().to_string();
    assert_eq!(verified.body["token_type"], "Bearer");

    let events = app.get("acme", "/audit/events", &elevated).await;
    assert_eq!(events.status, StatusCode::OK);
    let refused = events
        .body
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["event_type"] == "step_up_required")
        .count();
    assert_eq!(refused, 3);
}

#[tokio::test]
async fn second_factor_mark_survives_refresh() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let enrolled = app
        .post("acme", "/mfa/totp/enroll", token, json!({}))
        .await;
    let secret = enrolled.body["secret"].as_str().unwrap().to_string();
    app.post(
        "acme",
        "/mfa/totp/confirm",
        token,
        json!({ "device_id": enrolled.body["device_id"], "code": current_code(&secret) }),
    )
    .await;
    let verified = app
        .post("acme", "/mfa/verify", token, json!({ "code": enrolled.body["backup_codes"][0] }))
        .await;
    assert_eq!(verified.status, StatusCode::OK);

    let rotated = app
        .request(
            Method::POST,
            &host("acme"),
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": acme.tokens.refresh_token })),
        )
        .await;
    assert_eq!(rotated.status, StatusCode::OK);
    let fresh = rotated.body["access_token"].as_str().unwrap();

    assert_eq!(app.get("acme", "/audit/events", fresh).await.status, StatusCode::OK);
}
