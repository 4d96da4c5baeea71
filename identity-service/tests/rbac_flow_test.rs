//! Provisioning, permission checks, role assignment and revocation over HTTP.

mod common;

use common::{host, TestApp};
use serde_json::{json, Value};
use service_core::axum::http::{Method, StatusCode};

async fn role_id(app: &TestApp, subdomain: &str, token: &str, name: &str) -> String {
    let roles = app.get(subdomain, "/roles", token).await;
    assert_eq!(roles.status, StatusCode::OK);
    roles
        .body
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["role_name"] == name)
        .and_then(|r| r["role_id"].as_str())
        .unwrap_or_else(|| panic!("role {} not listed", name))
        .to_string()
}

async fn check(app: &TestApp, subdomain: &str, token: &str, resource: &str, action: &str) -> Value {
    let response = app
        .post(
            subdomain,
            "/authz/check",
            token,
            json!({ "resource": resource, "action": action, "context": "tenant" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    response.body
}

#[tokio::test]
async fn first_sign_in_provisions_tenant_with_admin() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let decision = check(&app, "acme", &acme.tokens.access_token, "inventory", "read").await;
    assert_eq!(decision["granted"], true);
    assert!(decision["applied_roles"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "tenant_admin"));

    // Tenant admins hold no platform-wide permissions.
    let system = app
        .post(
            "acme",
            "/authz/check",
            &acme.tokens.access_token,
            json!({ "resource": "tenants", "action": "manage", "context": "system" }),
        )
        .await;
    assert_eq!(system.body["granted"], false);
    assert_eq!(system.body["reason"], "denied");
}

#[tokio::test]
async fn returning_user_signs_into_their_own_tenant() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let again = app
        .state
        .identity
        .sign_in_federated(
            common::federated("owner@acme.test"),
            None,
            &identity_service::models::DeviceMeta::default(),
        )
        .await
        .unwrap();

    assert!(!again.created);
    assert_eq!(again.tenant.tenant_id, acme.tenant_id);
    assert_eq!(again.user.user_id, acme.user_id);
}

#[tokio::test]
async fn taken_subdomain_is_a_conflict() {
    let app = TestApp::spawn().await;
    app.provision("acme", "owner@acme.test").await;

    let err = app
        .state
        .identity
        .sign_in_federated(
            common::federated("someone@else.test"),
            Some("acme"),
            &identity_service::models::DeviceMeta::default(),
        )
        .await
        .err()
        .expect("second claim on acme must fail");

    assert!(matches!(
        err,
        identity_service::services::ServiceError::Conflict(_)
    ));
}

#[tokio::test]
async fn revoked_role_stops_granting_immediately() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let (clerk, clerk_tokens) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;
    let clerk_token = clerk_tokens.access_token.as_str();

    let before = check(&app, "acme", clerk_token, "inventory", "read").await;
    assert_eq!(before["granted"], false);

    let viewer = role_id(&app, "acme", admin, "viewer").await;
    let assigned = app
        .post(
            "acme",
            "/roles/assignments",
            admin,
            json!({ "user_id": clerk.user_id, "role_id": viewer }),
        )
        .await;
    assert_eq!(assigned.status, StatusCode::CREATED);

    let granted = check(&app, "acme", clerk_token, "inventory", "read").await;
    assert_eq!(granted["granted"], true);

    let revoked = app
        .request(
            Method::DELETE,
            &host("acme"),
            "/roles/assignments",
            Some(admin),
            Some(json!({ "user_id": clerk.user_id, "role_id": viewer })),
        )
        .await;
    assert_eq!(revoked.status, StatusCode::NO_CONTENT);

    // No waiting for the cache TTL.
    let after = check(&app, "acme", clerk_token, "inventory", "read").await;
    assert_eq!(after["granted"], false);
}

#[tokio::test]
async fn revoking_an_unassigned_role_is_a_conflict() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let (clerk, _) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;
    let viewer = role_id(&app, "acme", admin, "viewer").await;

    let response = app
        .request(
            Method::DELETE,
            &host("acme"),
            "/roles/assignments",
            Some(admin),
            Some(json!({ "user_id": clerk.user_id, "role_id": viewer })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn role_management_requires_permission() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let (clerk, clerk_tokens) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;
    let viewer = role_id(&app, "acme", admin, "viewer").await;

    let response = app
        .post(
            "acme",
            "/roles/assignments",
            &clerk_tokens.access_token,
            json!({ "user_id": clerk.user_id, "role_id": viewer }),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let audit = app
        .get("acme", "/audit/events", &clerk_tokens.access_token)
        .await;
    assert_eq!(audit.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn custom_role_grants_its_permissions() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let (clerk, clerk_tokens) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;

    let created = app
        .post(
            "acme",
            "/roles",
            admin,
            json!({
                "name": "stock_counter",
                "description": "Counts stock",
                "privilege_level": 20,
                "permissions": [
                    { "resource": "inventory", "action": "update", "context": "tenant" }
                ]
            }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let custom_id = created.body["role_id"].as_str().unwrap().to_string();

    let duplicate = app
        .post(
            "acme",
            "/roles",
            admin,
            json!({
                "name": "stock_counter",
                "privilege_level": 20,
                "permissions": [
                    { "resource": "inventory", "action": "read", "context": "tenant" }
                ]
            }),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let assigned = app
        .post(
            "acme",
            "/roles/assignments",
            admin,
            json!({ "user_id": clerk.user_id, "role_id": custom_id }),
        )
        .await;
    assert_eq!(assigned.status, StatusCode::CREATED);

    let decision = check(&app, "acme", &clerk_tokens.access_token, "inventory", "update").await;
    assert_eq!(decision["granted"], true);
    let decision = check(&app, "acme", &clerk_tokens.access_token, "orders", "update").await;
    assert_eq!(decision["granted"], false);

    let deleted = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/roles/{}", custom_id),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let decision = check(&app, "acme", &clerk_tokens.access_token, "inventory", "update").await;
    assert_eq!(decision["granted"], false);
}

#[tokio::test]
async fn custom_roles_cannot_grant_system_scope() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;

    let response = app
        .post(
            "acme",
            "/roles",
            &acme.tokens.access_token,
            json!({
                "name": "sneaky",
                "privilege_level": 10,
                "permissions": [
                    { "resource": "tenants", "action": "manage", "context": "system" }
                ]
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn system_roles_cannot_be_deleted() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let viewer = role_id(&app, "acme", admin, "viewer").await;

    let response = app
        .request(
            Method::DELETE,
            &host("acme"),
            &format!("/roles/{}", viewer),
            Some(admin),
            None,
        )
        .await;
    assert!(response.status.is_client_error());
    assert_ne!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_assignment_is_all_or_nothing() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let (first, first_tokens) = app.add_user(acme.tenant_id, "a@acme.test", "viewer").await;
    let (second, _) = app.add_user(acme.tenant_id, "b@acme.test", "viewer").await;
    let viewer = role_id(&app, "acme", admin, "viewer").await;

    let response = app
        .post(
            "acme",
            "/roles/assignments/bulk",
            admin,
            json!({ "assignments": [
                { "user_id": first.user_id, "role_id": viewer },
                { "user_id": second.user_id, "role_id": uuid::Uuid::new_v4() }
            ]}),
        )
        .await;
    assert!(response.status.is_client_error());

    let decision = check(&app, "acme", &first_tokens.access_token, "inventory", "read").await;
    assert_eq!(decision["granted"], false);

    let response = app
        .post(
            "acme",
            "/roles/assignments/bulk",
            admin,
            json!({ "assignments": [
                { "user_id": first.user_id, "role_id": viewer },
                { "user_id": second.user_id, "role_id": viewer }
            ]}),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body.as_array().unwrap().len(), 2);

    let decision = check(&app, "acme", &first_tokens.access_token, "inventory", "read").await;
    assert_eq!(decision["granted"], true);
}

#[tokio::test]
async fn users_of_another_tenant_cannot_be_assigned() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let globex = app.provision("globex", "owner@globex.test").await;
    let admin = acme.tokens.access_token.as_str();
    let viewer = role_id(&app, "acme", admin, "viewer").await;

    let response = app
        .post(
            "acme",
            "/roles/assignments",
            admin,
            json!({ "user_id": globex.user_id, "role_id": viewer }),
        )
        .await;
    assert!(response.status.is_client_error());

    let decision = check(&app, "globex", &globex.tokens.access_token, "inventory", "read").await;
    assert_eq!(decision["granted"], true);
    assert!(!decision["applied_roles"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "viewer"));
}

#[tokio::test]
async fn storage_outage_denies_as_unavailable() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let viewer = role_id(&app, "acme", admin, "viewer").await;
    let (clerk, _) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;

    app.store.set_available(false);
    let response = app
        .post(
            "acme",
            "/roles/assignments",
            admin,
            json!({ "user_id": clerk.user_id, "role_id": viewer }),
        )
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn own_profile_permissions_require_the_caller_as_target() {
    let app = TestApp::spawn().await;
    let acme = app.provision("acme", "owner@acme.test").await;
    let admin = acme.tokens.access_token.as_str();
    let (clerk, clerk_tokens) = app.add_user(acme.tenant_id, "clerk@acme.test", "viewer").await;
    let clerk_token = clerk_tokens.access_token.as_str();

    let viewer = role_id(&app, "acme", admin, "viewer").await;
    let assigned = app
        .post(
            "acme",
            "/roles/assignments",
            admin,
            json!({ "user_id": clerk.user_id, "role_id": viewer }),
        )
        .await;
    assert_eq!(assigned.status, StatusCode::CREATED);

    let own = |target: Value| {
        json!({ "resource": "users", "action": "update", "context": "own", "target_id": target })
    };

    let missing = app
        .post("acme", "/authz/check", clerk_token, own(Value::Null))
        .await;
    assert_eq!(missing.body["granted"], false);

    let someone_else = app
        .post("acme", "/authz/check", clerk_token, own(json!(acme.user_id)))
        .await;
    assert_eq!(someone_else.body["granted"], false);

    let themselves = app
        .post("acme", "/authz/check", clerk_token, own(json!(clerk.user_id)))
        .await;
    assert_eq!(themselves.body["granted"], true);
}
