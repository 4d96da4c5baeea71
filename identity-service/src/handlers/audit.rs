use serde_json::json;
use service_core::{
    axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    dtos::access::{PrivacyRequestBody, PrivacyRequestResponse, ReportQuery},
    middleware::RequestContext,
    models::{AuditCategory, AuditEventType, AuditFilter, RiskLevel},
    services::AuditRecord,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct AlertPath {
    alert_id: Uuid,
}

/// Filtered audit search, always confined to the caller's tenant.
pub async fn search_events(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(filter): Query<AuditFilter>,
) -> Result<impl IntoResponse, AppError> {
    let filter = AuditFilter {
        tenant_id: Some(ctx.tenant_id()),
        ..filter
    };
    let events = state.audit.search(&filter).await?;

    state
        .audit
        .log(
            AuditRecord::new(
                AuditEventType::AuditTrailViewed,
                AuditCategory::DataAccess,
                RiskLevel::Low,
                "search_events",
            )
            .context(&ctx.audit_context())
            .resource("audit")
            .details(json!({ "returned": events.len() })),
        )
        .await;

    Ok(Json(events))
}

pub async fn report(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .audit
        .report(Some(ctx.tenant_id()), query.from, query.to)
        .await?;

    state
        .audit
        .log(
            AuditRecord::new(
                AuditEventType::AuditTrailViewed,
                AuditCategory::Compliance,
                RiskLevel::Medium,
                "generate_report",
            )
            .context(&ctx.audit_context())
            .resource("audit")
            .details(json!({
                "from": query.from,
                "to": query.to,
                "total": report.summary.total,
            })),
        )
        .await;

    Ok(Json(report))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(AlertPath { alert_id }): Path<AlertPath>,
) -> Result<impl IntoResponse, AppError> {
    state
        .audit
        .resolve_alert(alert_id, &ctx.audit_context(), ctx.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Records a data-subject request by the caller about their own data.
pub async fn privacy_request(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<PrivacyRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = state
        .audit
        .log_privacy_request(&ctx.audit_context(), req.kind, ctx.user_id)
        .await;
    Ok((
        StatusCode::ACCEPTED,
        Json(PrivacyRequestResponse {
            request_id,
            kind: req.kind,
        }),
    ))
}
