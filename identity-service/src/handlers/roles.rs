use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    dtos::access::{BulkAssignRequest, RevokeRoleRequest},
    middleware::RequestContext,
    services::rbac::{AssignmentRequest, CustomRoleRequest},
    utils::ValidatedJson,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct RolePath {
    role_id: Uuid,
}

/// System roles plus the tenant's own custom roles.
pub async fn list_roles(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.rbac.list_roles(ctx.tenant_id()).await?))
}

pub async fn create_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CustomRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = state
        .rbac
        .create_custom_role(ctx.user_id, ctx.tenant_id(), req, &ctx.audit_context())
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn delete_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(RolePath { role_id }): Path<RolePath>,
) -> Result<impl IntoResponse, AppError> {
    state
        .rbac
        .delete_custom_role(ctx.user_id, ctx.tenant_id(), role_id, &ctx.audit_context())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<AssignmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let assignment = state
        .rbac
        .assign_role(ctx.user_id, ctx.tenant_id(), req, &ctx.audit_context())
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// All-or-nothing: one invalid entry rejects the whole batch.
pub async fn assign_roles_bulk(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<BulkAssignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let assignments = state
        .rbac
        .assign_roles_bulk(ctx.user_id, ctx.tenant_id(), req.assignments, &ctx.audit_context())
        .await?;
    Ok((StatusCode::CREATED, Json(assignments)))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RevokeRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .rbac
        .revoke_role(
            ctx.user_id,
            ctx.tenant_id(),
            req.user_id,
            req.role_id,
            &ctx.audit_context(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
