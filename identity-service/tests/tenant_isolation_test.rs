//! Tenant resolution and tenant binding of access tokens.

mod common;

use common::{host, TestApp};
use identity_service::models::{AuditEventType, AuditFilter, RiskLevel};
use identity_service::services::store::TenantDirectory;
use service_core::axum::http::{Method, StatusCode};

#[tokio::test]
async fn health_check_is_public() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::GET, "anything.example.com", "/health", None, None)
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["checks"]["database"], "in_memory");
}

#[tokio::test]
async fn unknown_subdomain_is_not_found() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = app
        .get("nosuchshop", "/auth/sessions", &acme.tokens.access_token)
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resolution_is_exact_match_only() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    for near_miss in ["acm", "acme2", "xacme"] {
        let response = app
            .get(near_miss, "/auth/sessions", &acme.tokens.access_token)
            .await;
        assert_eq!(
            response.status,
            StatusCode::NOT_FOUND,
            "{} must not resolve to acme",
            near_miss
        );
    }

    let response = app
        .request(
            Method::GET,
            "ACME.Example.com:443",
            "/auth/sessions",
            Some(&acme.tokens.access_token),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn foreign_domain_is_rejected() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = app
        .request(
            Method::GET,
            "acme.evil.test",
            "/auth/sessions",
            Some(&acme.tokens.access_token),
            None,
        )
        .await;

    assert!(response.status.is_client_error());
    assert_ne!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn missing_token_is_unauthenticated() {
    let app = TestApp::spawn().await;
    app.provision("acme", "owner@acme.test").await;

    let response = app
        .request(Method::GET, &host("acme"), "/auth/sessions", None, None)
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "Authentication required");
}

#[tokio::test]
async fn garbage_token_is_unauthenticated() {
    let app = TestApp::spawn().await;
    app.provision("acme", "owner@acme.test").await;

    let response = app.get("acme", "/auth/sessions", "not-a-jwt").await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_from_another_tenant_is_forbidden_and_audited() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let globex = app.provision("globex", "owner@globex.test").await;

    let response = app
        .get("globex", "/auth/sessions", &acme.tokens.access_token)
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["error"], "Access denied");

    let events = app
        .state
        .audit
        .search(&AuditFilter {
            event_type: Some(AuditEventType::CrossTenantAccess.as_str().to_string()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tenant_id, Some(globex.tenant_id));
    assert_eq!(events[0].user_id, Some(acme.user_id));
    assert_eq!(events[0].risk(), Some(RiskLevel::High));
}

#[tokio::test]
async fn tenant_admin_cannot_read_another_tenants_audit_trail() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let globex = app.provision("globex", "owner@globex.test").await;

    // Generate some activity in globex.
    let response = app
        .get("globex", "/auth/sessions", &globex.tokens.access_token)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .get(
            "acme",
            &format!("/audit/events?tenant_id={}", globex.tenant_id),
            &acme.tokens.access_token,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let events = response.body.as_array().cloned().unwrap_or_default();
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|e| e["tenant_id"] == serde_json::json!(acme.tenant_id)));
}

#[tokio::test]
async fn suspended_tenant_is_not_served() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let mut tenant = app
        .store
        .find_tenant_by_id(acme.tenant_id)
        .await
        .unwrap()
        .expect("tenant stored");
    tenant.tenant_status_code = "suspended".to_string();
    app.store.put_tenant(tenant).unwrap();

    let response = app
        .get("acme", "/auth/sessions", &acme.tokens.access_token)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn path_addressed_requests_resolve_the_leading_segment() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let token = acme.tokens.access_token.as_str();

    let response = app
        .request(Method::GET, "www.example.com", "/acme/auth/sessions", Some(token), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .request(Method::GET, "www.example.com", "/acme/roles", Some(token), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .request(
            Method::DELETE,
            "www.example.com",
            &format!("/acme/auth/sessions/{}", acme.tokens.session_id),
            Some(token),
            None,
        )
        .await;
    assert!(response.status.is_success());
}

#[tokio::test]
async fn route_names_never_resolve_as_tenants() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    for path in ["/roles", "/auth/sessions", "/audit/events", "/mfa/devices"] {
        let response = app
            .request(
                Method::GET,
                "www.example.com",
                path,
                Some(&acme.tokens.access_token),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{} without a tenant", path);
    }

    for reserved in ["roles", "audit", "metrics", "health"] {
        let result = app
            .state
            .identity
            .sign_in_federated(
                common::federated(&format!("owner@{}.test", reserved)),
                Some(reserved),
                &identity_service::models::DeviceMeta::default(),
            )
            .await;
        assert!(result.is_err(), "{} must not be provisioned", reserved);
    }
}

#[tokio::test]
async fn path_tenant_must_match_host_tenant() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    app.provision("globex", "owner@globex.test").await;

    let response = app
        .get("acme", "/globex/auth/sessions", &acme.tokens.access_token)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = app
        .get("acme", "/acme/auth/sessions", &acme.tokens.access_token)
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn path_addressing_keeps_tenant_binding() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    app.provision("globex", "owner@globex.test").await;

    let response = app
        .request(
            Method::GET,
            "www.example.com",
            "/globex/auth/sessions",
            Some(&acme.tokens.access_token),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}
