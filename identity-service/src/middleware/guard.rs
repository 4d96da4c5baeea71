//! Per-request pipeline: tenant resolution, then session authentication, then
//! the tenant binding check. The resulting [`RequestContext`] is what every
//! downstream handler trusts; none of them re-derive tenant scoping.

use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use service_core::{
    axum::{
        async_trait,
        extract::{FromRequestParts, OriginalUri, RawPathParams, Request, State},
        http::{header, request::Parts, HeaderMap},
        middleware::Next,
        response::Response,
    },
    error::AppError,
    middleware::{rate_limit::client_ip, tracing::RequestId},
};
use uuid::Uuid;

use crate::models::{AuditCategory, AuditEventType, RiskLevel, Tenant};
use crate::services::{metrics, AccessTokenClaims, AuditContext, AuditRecord, ServiceError};
use crate::AppState;

/// Identity and tenant of an authenticated request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant: Tenant,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub claims: AccessTokenClaims,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.tenant_id
    }

    pub fn audit_context(&self) -> AuditContext {
        AuditContext {
            user_id: Some(self.user_id),
            tenant_id: Some(self.tenant.tenant_id),
            session_id: Some(self.session_id),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Request context missing from request extensions"
            ))
        })
    }
}

/// Network metadata of a request, available before authentication.
pub fn anonymous_context(req: &Request) -> AuditContext {
    AuditContext {
        ip_address: client_ip(req).map(|ip| ip.to_string()),
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        correlation_id: req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.as_str().to_string()),
        ..AuditContext::default()
    }
}

/// Bearer token from `Authorization`, falling back to the session cookie.
pub fn access_token_from(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

async fn reject(
    state: &AppState,
    context: &AuditContext,
    event_type: AuditEventType,
    risk: RiskLevel,
    details: serde_json::Value,
) {
    metrics::record_decision("middleware", "deny");
    state
        .audit
        .log(
            AuditRecord::new(event_type, AuditCategory::Security, risk, "request_guard")
                .context(context)
                .details(details),
        )
        .await;
}

/// Route parameter holding the tenant label on path-addressed routes.
const TENANT_PARAM: &str = "tenant";

/// Tenant label captured by the `/:tenant` mount, if this route has one.
fn tenant_param(params: Option<&RawPathParams>) -> Option<String> {
    params?
        .iter()
        .find(|(key, _)| *key == TENANT_PARAM)
        .map(|(_, value)| value.to_ascii_lowercase())
}

/// Tenant → session → context. Any failure short-circuits with a deny.
pub async fn request_guard(
    State(state): State<AppState>,
    params: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let mut context = anonymous_context(&req);
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string));
    // Nested mounts strip their prefix; resolution needs the path as sent.
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let addressed = tenant_param(params.as_ref());

    let resolution = state
        .resolver
        .resolve(host.as_deref(), &path)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Tenant lookup failed");
            metrics::record_decision("middleware", "error");
            AppError::from(e)
        })?;
    let outcome = resolution.outcome();
    let tenant = match resolution.into_tenant() {
        Ok(tenant) => tenant,
        Err(e) => {
            tracing::info!(outcome, host = ?host, "Request rejected: no tenant");
            reject(
                &state,
                &context,
                AuditEventType::TenantResolutionFailed,
                RiskLevel::Medium,
                json!({ "outcome": outcome, "host": host, "path": path }),
            )
            .await;
            return Err(e.into());
        }
    };
    if let Some(label) = addressed.filter(|label| *label != tenant.subdomain) {
        tracing::info!(
            label = %label,
            resolved = %tenant.subdomain,
            "Request rejected: path tenant mismatch"
        );
        reject(
            &state,
            &context,
            AuditEventType::TenantResolutionFailed,
            RiskLevel::Medium,
            json!({ "outcome": "path_mismatch", "host": host, "path": path }),
        )
        .await;
        return Err(ServiceError::TenantNotResolved(
            "path tenant differs from resolved tenant".to_string(),
        )
        .into());
    }
    context.tenant_id = Some(tenant.tenant_id);

    let token = match access_token_from(req.headers(), &state.config.security.session_cookie_name)
    {
        Some(token) => token,
        None => {
            reject(
                &state,
                &context,
                AuditEventType::AccessTokenRejected,
                RiskLevel::Medium,
                json!({ "reason": "missing_credentials" }),
            )
            .await;
            return Err(ServiceError::unauthenticated("missing credentials").into());
        }
    };

    let claims = match state.sessions.authenticate(&token).await {
        Ok(claims) => claims,
        Err(ServiceError::Unauthenticated(reason)) => {
            reject(
                &state,
                &context,
                AuditEventType::AccessTokenRejected,
                RiskLevel::Medium,
                json!({ "reason": &reason }),
            )
            .await;
            return Err(ServiceError::Unauthenticated(reason).into());
        }
        Err(e) => {
            tracing::error!(error = %e, "Session check unavailable");
            metrics::record_decision("middleware", "error");
            return Err(e.into());
        }
    };

    context.user_id = Some(claims.sub);
    context.session_id = Some(claims.sid);

    if claims.tid != tenant.tenant_id {
        tracing::warn!(
            user_id = %claims.sub,
            token_tenant = %claims.tid,
            request_tenant = %tenant.tenant_id,
            "Cross-tenant request blocked"
        );
        reject(
            &state,
            &context,
            AuditEventType::CrossTenantAccess,
            RiskLevel::High,
            json!({ "token_tenant_id": claims.tid, "subdomain": tenant.subdomain }),
        )
        .await;
        return Err(ServiceError::denied("token issued for another tenant").into());
    }

    metrics::record_decision("middleware", "allow");
    req.extensions_mut().insert(RequestContext {
        tenant,
        user_id: claims.sub,
        session_id: claims.sid,
        role: claims.role.clone(),
        claims,
        ip_address: context.ip_address,
        user_agent: context.user_agent,
        correlation_id: context.correlation_id,
    });

    Ok(next.run(req).await)
}
