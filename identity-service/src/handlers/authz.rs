use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::access::CheckPermissionRequest, middleware::RequestContext,
    services::{PermissionDecision, PermissionRequest}, utils::ValidatedJson, AppState,
};

/// Explainable permission decision for the caller. Denials are answered with
/// 200 and `granted: false`; the reason is only in the audit trail.
pub async fn check(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<CheckPermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = PermissionRequest {
        user_id: ctx.user_id,
        tenant_id: ctx.tenant_id(),
        resource: req.resource,
        action: req.action,
        context: req.context,
        target_id: req.target_id,
        attributes: req.attributes,
    };
    let decision = state
        .rbac
        .check_permission(&request, &ctx.audit_context())
        .await;

    if decision.granted {
        return Ok(Json(decision));
    }
    Ok(Json(PermissionDecision {
        reason: "denied".to_string(),
        ..decision
    }))
}
