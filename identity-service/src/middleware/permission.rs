use service_core::{
    axum::{
        extract::{Request, State},
        middleware::Next,
        response::Response,
    },
    error::AppError,
};

use serde_json::json;

use super::RequestContext;
use crate::models::{AuditCategory, AuditEventType, ContextScope, RiskLevel};
use crate::services::rbac::REASON_UNAVAILABLE;
use crate::services::{metrics, AuditRecord, PermissionRequest};
use crate::AppState;

/// Permission a route demands of the acting user.
#[derive(Debug, Clone, Copy)]
pub struct RequiredPermission {
    pub resource: &'static str,
    pub action: &'static str,
    pub context: ContextScope,
    /// Users with an enabled second factor must have verified it on this session.
    pub second_factor: bool,
}

impl RequiredPermission {
    pub const fn tenant(resource: &'static str, action: &'static str) -> Self {
        Self {
            resource,
            action,
            context: ContextScope::Tenant,
            second_factor: false,
        }
    }

    pub const fn with_second_factor(self) -> Self {
        Self {
            second_factor: true,
            ..self
        }
    }
}

/// Refuses sessions that skipped a second factor the user has enrolled.
/// Users without an enabled device pass.
pub async fn require_second_factor(
    state: &AppState,
    context: &RequestContext,
    operation: &str,
) -> Result<(), AppError> {
    if context.claims.mfa {
        return Ok(());
    }
    let enrolled = state
        .mfa
        .has_enabled_factor(context.user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Second factor lookup failed");
            AppError::ServiceUnavailable(anyhow::anyhow!("second factor check unavailable"))
        })?;
    if !enrolled {
        return Ok(());
    }

    tracing::warn!(user_id = %context.user_id, operation, "Second factor required");
    metrics::record_decision("step_up", "deny");
    state
        .audit
        .log(
            AuditRecord::new(
                AuditEventType::StepUpRequired,
                AuditCategory::Security,
                RiskLevel::Medium,
                operation,
            )
            .context(&context.audit_context())
            .details(json!({ "reason": "second_factor_not_verified" })),
        )
        .await;
    Err(AppError::Forbidden(anyhow::anyhow!(
        "second factor not verified on this session"
    )))
}

/// Runs after [`super::request_guard`]. The decision is attached to the request
/// for handlers that want to explain it.
pub async fn require_permission(
    State(state): State<AppState>,
    required: RequiredPermission,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req.extensions().get::<RequestContext>().cloned().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Request context missing from request extensions"
        ))
    })?;

    let request = PermissionRequest::new(
        context.user_id,
        context.tenant_id(),
        required.resource,
        required.action,
        required.context,
    );
    let decision = state
        .rbac
        .check_permission(&request, &context.audit_context())
        .await;

    if !decision.granted {
        tracing::warn!(
            user_id = %context.user_id,
            required = %request.label(),
            reason = %decision.reason,
            "Insufficient permissions"
        );
        if decision.reason == REASON_UNAVAILABLE {
            return Err(AppError::ServiceUnavailable(anyhow::anyhow!(
                "permission evaluation unavailable"
            )));
        }
        return Err(AppError::Forbidden(anyhow::anyhow!(decision.reason)));
    }

    if required.second_factor {
        require_second_factor(&state, &context, &request.label()).await?;
    }

    req.extensions_mut().insert(decision);
    Ok(next.run(req).await)
}
