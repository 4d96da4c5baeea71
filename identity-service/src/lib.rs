pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{Environment, IdentityConfig};
use crate::middleware::{require_permission, RequiredPermission};
use crate::services::audit::alert::AlertSink;
use crate::services::mfa::delivery::CodeSender;
use crate::services::{
    AuditLogger, Database, IdentityService, IdentityStore, JwtService, MfaManager, RbacEngine,
    SessionManager, TenantResolver, TokenBlacklist,
};

const MANAGE_ROLES: RequiredPermission =
    RequiredPermission::tenant("roles", "manage").with_second_factor();
const READ_AUDIT: RequiredPermission =
    RequiredPermission::tenant("audit", "read").with_second_factor();
const MANAGE_AUDIT: RequiredPermission =
    RequiredPermission::tenant("audit", "manage").with_second_factor();

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub resolver: TenantResolver,
    pub sessions: SessionManager,
    pub mfa: MfaManager,
    pub rbac: RbacEngine,
    pub audit: AuditLogger,
    pub identity: IdentityService,
    pub blacklist: Arc<dyn TokenBlacklist>,
    /// Set when running against PostgreSQL; checked by `/health`.
    pub database: Option<Database>,
    pub mfa_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wires every component onto one storage backend.
    pub fn new<S>(
        config: IdentityConfig,
        store: Arc<S>,
        blacklist: Arc<dyn TokenBlacklist>,
        sender: Arc<dyn CodeSender>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, AppError>
    where
        S: IdentityStore + 'static,
    {
        let audit = AuditLogger::new(store.clone(), alerts, config.audit.clone());
        let jwt = JwtService::new(&config.tokens).map_err(AppError::ConfigError)?;

        let sessions = SessionManager::new(
            store.clone(),
            store.clone(),
            blacklist.clone(),
            jwt,
            audit.clone(),
            config.tokens.clone(),
        );
        let mfa = MfaManager::new(
            store.clone(),
            store.clone(),
            sender,
            audit.clone(),
            config.mfa.clone(),
            config.tokens.refresh_pepper.clone(),
        );
        let rbac = RbacEngine::new(store.clone(), store.clone(), audit.clone(), config.rbac.clone());
        let resolver = TenantResolver::new(
            store.clone(),
            config.tenancy.clone(),
            config.environment == Environment::Dev,
        );
        let identity = IdentityService::new(
            store.clone(),
            store.clone(),
            store,
            rbac.clone(),
            sessions.clone(),
            audit.clone(),
            config.tenancy.clone(),
        );

        let mfa_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.mfa_verify_attempts,
            config.rate_limit.mfa_verify_window_seconds,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config,
            resolver,
            sessions,
            mfa,
            rbac,
            audit,
            identity,
            blacklist,
            database: None,
            mfa_rate_limiter,
            ip_rate_limiter,
        })
    }
}

/// Tenant-scoped routes behind the request guard. Mounted once at the root for
/// subdomain addressing and once under `/:tenant` for path addressing.
fn tenant_routes(state: &AppState) -> Router<AppState> {
    let require = |required: RequiredPermission| {
        from_fn_with_state(
            state.clone(),
            move |s: State<AppState>, req: Request, next: Next| {
                require_permission(s, required, req, next)
            },
        )
    };
    let mfa_limiter = from_fn_with_state(state.mfa_rate_limiter.clone(), ip_rate_limit_middleware);

    Router::new()
        .route("/auth/logout", post(handlers::session::logout))
        .route("/auth/logout-all", post(handlers::session::logout_all))
        .route("/auth/sessions", get(handlers::session::list_sessions))
        .route(
            "/auth/sessions/:session_id",
            delete(handlers::session::revoke_session),
        )
        .route("/mfa/totp/enroll", post(handlers::mfa::enroll_totp))
        .route("/mfa/totp/confirm", post(handlers::mfa::confirm_totp))
        .route("/mfa/sms/enroll", post(handlers::mfa::enroll_sms))
        .route("/mfa/email/enroll", post(handlers::mfa::enroll_email))
        .route("/mfa/code/confirm", post(handlers::mfa::confirm_code))
        .route("/mfa/challenge", post(handlers::mfa::send_challenge))
        .route(
            "/mfa/verify",
            post(handlers::mfa::verify).route_layer(mfa_limiter),
        )
        .route(
            "/mfa/backup-codes/regenerate",
            post(handlers::mfa::regenerate_backup_codes),
        )
        .route("/mfa/devices", get(handlers::mfa::list_devices))
        .route(
            "/mfa/devices/:device_id",
            delete(handlers::mfa::disable_device),
        )
        .route("/authz/check", post(handlers::authz::check))
        .route(
            "/roles",
            post(handlers::roles::create_role)
                .route_layer(require(MANAGE_ROLES))
                .get(handlers::roles::list_roles),
        )
        .route(
            "/roles/:role_id",
            delete(handlers::roles::delete_role).route_layer(require(MANAGE_ROLES)),
        )
        .route(
            "/roles/assignments",
            post(handlers::roles::assign_role)
                .delete(handlers::roles::revoke_role)
                .route_layer(require(MANAGE_ROLES)),
        )
        .route(
            "/roles/assignments/bulk",
            post(handlers::roles::assign_roles_bulk).route_layer(require(MANAGE_ROLES)),
        )
        .route(
            "/audit/events",
            get(handlers::audit::search_events).route_layer(require(READ_AUDIT)),
        )
        .route(
            "/audit/report",
            get(handlers::audit::report).route_layer(require(READ_AUDIT)),
        )
        .route(
            "/audit/alerts/:alert_id/resolve",
            post(handlers::audit::resolve_alert).route_layer(require(MANAGE_AUDIT)),
        )
        .route("/privacy/requests", post(handlers::audit::privacy_request))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::request_guard,
        ))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/auth/refresh", post(handlers::session::refresh))
        .merge(tenant_routes(&state))
        .nest("/:tenant", tenant_routes(&state))
        .route_layer(from_fn(middleware::metrics_middleware))
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(database) = &state.database {
        database.health_check().await.map_err(|e| {
            tracing::error!(error = %e, "PostgreSQL health check failed");
            e
        })?;
    }

    state.blacklist.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Blacklist health check failed");
        AppError::ServiceUnavailable(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": if state.database.is_some() { "up" } else { "in_memory" },
            "blacklist": "up",
            "audit_buffered": state.audit.buffered(),
        }
    })))
}
