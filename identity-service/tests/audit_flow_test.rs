//! Audit trail search, reports, alerts, privacy requests and retention.

mod common;

use chrono::{Duration, SecondsFormat, Utc};
use common::{host, TestApp};
use identity_service::models::{AuditCategory, AuditEventType, AuditFilter, RiskLevel};
use identity_service::services::AuditRecord;
use serde_json::json;
use service_core::axum::http::{Method, StatusCode};

#[tokio::test]
async fn search_returns_tenant_events_with_redacted_details() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    app.state
        .audit
        .log(
            AuditRecord::new(
                AuditEventType::RoleCreated,
                AuditCategory::RoleManagement,
                RiskLevel::Medium,
                "create_custom_role",
            )
            .user(acme.user_id)
            .tenant(acme.tenant_id)
            .details(json!({
                "integration": "shopify",
                "credentials": { "api_key": "sk_live_123", "Client-Secret": "shh" },
                "webhooks": [{ "url": "https://hooks.test", "signing_key": "abc" }]
            })),
        )
        .await;

    let response = app
        .get(
            "acme",
            "/audit/events?event_type=role_created",
            &acme.tokens.access_token,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let events = response.body.as_array().unwrap();
    assert_eq!(events.len(), 1);
    let details = &events[0]["details"];
    assert_eq!(details["integration"], "shopify");
    assert_eq!(details["credentials"]["api_key"], "[REDACTED]");
    assert_eq!(details["credentials"]["Client-Secret"], "[REDACTED]");
    assert_eq!(details["webhooks"][0]["url"], "https://hooks.test");
    assert_eq!(details["webhooks"][0]["signing_key"], "[REDACTED]");
    assert!(events[0]["compliance_tags"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "soc2_relevant"));
}

#[tokio::test]
async fn viewing_the_trail_is_itself_audited() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = app
        .get("acme", "/audit/events", &acme.tokens.access_token)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let viewed = app
        .state
        .audit
        .search(&AuditFilter {
            tenant_id: Some(acme.tenant_id),
            event_type: Some(AuditEventType::AuditTrailViewed.as_str().to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(viewed.len(), 1);
    assert_eq!(viewed[0].user_id, Some(acme.user_id));
    assert!(viewed[0].correlation_id.is_some());
}

#[tokio::test]
async fn report_summarizes_the_window() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let from = (Utc::now() - Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let to = (Utc::now() + Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);

    // One failed second factor in the window.
    let failed = app
        .post(
            "acme",
            "/mfa/verify",
            &acme.tokens.access_token,
            json!({ "code": "123456" }),
        )
        .await;
    assert_eq!(failed.status, StatusCode::UNAUTHORIZED);

    let response = app
        .get(
            "acme",
            &format!("/audit/report?from={}&to={}", from, to),
            &acme.tokens.access_token,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let summary = &response.body["summary"];
    assert!(summary["total"].as_u64().unwrap() >= 3);
    assert!(summary["failed_logins"].as_u64().unwrap() >= 1);
    assert!(summary["high_risk"].as_u64().unwrap() >= 1);
    assert!(summary["config_changes"].as_u64().unwrap() >= 1);
    assert_eq!(response.body["tenant_id"], json!(acme.tenant_id));
}

#[tokio::test]
async fn inverted_report_window_is_rejected() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let from = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let to = (Utc::now() - Duration::days(1)).to_rfc3339_opts(SecondsFormat::Secs, true);

    let response = app
        .get(
            "acme",
            &format!("/audit/report?from={}&to={}", from, to),
            &acme.tokens.access_token,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn critical_events_open_alerts_that_admins_resolve() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let globex = app.provision("globex", "owner@globex.test").await;

    app.state
        .audit
        .log(
            AuditRecord::new(
                AuditEventType::TokenReuseDetected,
                AuditCategory::SecurityIncident,
                RiskLevel::Critical,
                "rotate_token_pair",
            )
            .user(acme.user_id)
            .tenant(acme.tenant_id),
        )
        .await;

    let open = app.store.open_alerts().unwrap();
    assert_eq!(open.len(), 1);
    let alert_id = open[0].alert_id;

    // Another tenant's admin cannot see or close it.
    let foreign = app
        .post(
            "globex",
            &format!("/audit/alerts/{}/resolve", alert_id),
            &globex.tokens.access_token,
            json!({}),
        )
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    let resolved = app
        .post(
            "acme",
            &format!("/audit/alerts/{}/resolve", alert_id),
            &acme.tokens.access_token,
            json!({}),
        )
        .await;
    assert_eq!(resolved.status, StatusCode::NO_CONTENT);
    assert!(app.store.open_alerts().unwrap().is_empty());

    let again = app
        .post(
            "acme",
            &format!("/audit/alerts/{}/resolve", alert_id),
            &acme.tokens.access_token,
            json!({}),
        )
        .await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn privacy_request_is_recorded_for_the_caller() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let (clerk, tokens) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;

    let response = app
        .request(
            Method::POST,
            &host("acme"),
            "/privacy/requests",
            Some(&tokens.access_token),
            Some(json!({ "kind": "erasure" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["kind"], "erasure");

    let recorded = app
        .state
        .audit
        .search(&AuditFilter {
            event_type: Some(AuditEventType::PrivacyRequest.as_str().to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].user_id, Some(clerk.user_id));
    assert_eq!(recorded[0].details["subject_user_id"], json!(clerk.user_id));
    assert!(recorded[0].has_tag("gdpr_relevant"));
}

#[tokio::test]
async fn retention_purge_respects_category_windows() {
    let app = TestApp::spawn().await;
    let now = Utc::now();

    let mut logged = Vec::new();
    for (category, age_days) in [
        (AuditCategory::System, 31),
        (AuditCategory::System, 29),
        (AuditCategory::DataAccess, 91),
        (AuditCategory::Authentication, 364),
        (AuditCategory::Compliance, 2000),
    ] {
        let event_id = app
            .state
            .audit
            .log(AuditRecord::new(
                AuditEventType::AlertResolved,
                category,
                RiskLevel::Low,
                "aged",
            ))
            .await;
        logged.push((event_id, age_days));
    }
    app.state.audit.flush().await.unwrap();
    for (event_id, age_days) in &logged {
        assert!(app
            .store
            .backdate_event(*event_id, now - Duration::days(*age_days))
            .unwrap());
    }

    let summary = app.state.audit.purge_expired(now).await;
    assert_eq!(summary.deleted, 2);
    assert!(summary.failed_categories.is_empty());

    let remaining = app
        .state
        .audit
        .search(&AuditFilter {
            event_type: Some(AuditEventType::AlertResolved.as_str().to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    let remaining_ids: Vec<_> = remaining.iter().map(|e| e.event_id).collect();
    assert_eq!(remaining_ids.len(), 3);
    assert!(!remaining_ids.contains(&logged[0].0));
    assert!(!remaining_ids.contains(&logged[2].0));
}
