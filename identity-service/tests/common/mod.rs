//! Shared setup for identity-service integration tests.
//!
//! Every test gets its own in-memory store, blacklist, code sender and alert
//! sink, so tests never need PostgreSQL or Redis.

#![allow(dead_code)]

use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::IdentityConfig,
    models::{DeviceMeta, Tenant, User},
    services::{
        audit::alert::RecordingAlertSink, mfa::delivery::MockCodeSender, FederatedIdentity,
        InMemoryBlacklist, MemoryStore, SignInOutcome, TokenPair,
    },
    AppState,
};
use service_core::axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub blacklist: Arc<InMemoryBlacklist>,
    pub sender: Arc<MockCodeSender>,
    pub alerts: Arc<RecordingAlertSink>,
}

/// A provisioned tenant with its first (admin) user signed in.
pub struct SignedIn {
    pub tenant_id: Uuid,
    pub subdomain: String,
    pub user_id: Uuid,
    pub tokens: TokenPair,
}

impl From<SignInOutcome> for SignedIn {
    fn from(outcome: SignInOutcome) -> Self {
        Self {
            tenant_id: outcome.tenant.tenant_id,
            subdomain: outcome.tenant.subdomain,
            user_id: outcome.user.user_id,
            tokens: outcome.tokens,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_config(IdentityConfig::for_tests()).await
    }

    pub async fn with_config(config: IdentityConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let sender = Arc::new(MockCodeSender::new());
        let alerts = Arc::new(RecordingAlertSink::new());

        let state = AppState::new(
            config,
            store.clone(),
            blacklist.clone(),
            sender.clone(),
            alerts.clone(),
        )
        .expect("Failed to build state");
        state
            .rbac
            .seed_system_roles()
            .await
            .expect("Failed to seed roles");

        let router = build_router(state.clone());
        Self {
            state,
            router,
            store,
            blacklist,
            sender,
            alerts,
        }
    }

    /// First sign-in for `email`, provisioning `subdomain` as a new tenant.
    pub async fn provision(&self, subdomain: &str, email: &str) -> SignedIn {
        self.state
            .identity
            .sign_in_federated(
                federated(email),
                Some(subdomain),
                &DeviceMeta::default(),
            )
            .await
            .expect("Provisioning failed")
            .into()
    }

    /// Adds an active user to an existing tenant and signs them in with `role`.
    pub async fn add_user(&self, tenant_id: Uuid, email: &str, role: &str) -> (User, TokenPair) {
        let user = User::new(
            tenant_id,
            email.to_string(),
            None,
            "google".to_string(),
            format!("sub-{}", email),
        );
        self.store.put_user(user.clone()).expect("Failed to store user");
        let tokens = self
            .state
            .sessions
            .issue_token_pair(user.user_id, tenant_id, role, &DeviceMeta::default())
            .await
            .expect("Failed to issue tokens");
        (user, tokens)
    }

    pub fn put_tenant(&self, subdomain: &str) -> Tenant {
        let tenant = Tenant::new(subdomain.to_string(), subdomain.to_string(), None);
        self.store
            .put_tenant(tenant.clone())
            .expect("Failed to store tenant");
        tenant
    }

    pub async fn request(
        &self,
        method: Method,
        host: &str,
        path: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, host)
            .header("x-forwarded-for", "203.0.113.7");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse { status, body }
    }

    pub async fn get(&self, subdomain: &str, path: &str, token: &str) -> TestResponse {
        self.request(Method::GET, &host(subdomain), path, Some(token), None)
            .await
    }

    pub async fn post(
        &self,
        subdomain: &str,
        path: &str,
        token: &str,
        body: serde_json::Value,
    ) -> TestResponse {
        self.request(Method::POST, &host(subdomain), path, Some(token), Some(body))
            .await
    }
}

pub fn host(subdomain: &str) -> String {
    format!("{}.example.com", subdomain)
}

pub fn federated(email: &str) -> FederatedIdentity {
    FederatedIdentity {
        provider: "google".to_string(),
        subject: format!("google-{}", email),
        email: email.to_string(),
        display_name: None,
    }
}
