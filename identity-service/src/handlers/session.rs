use service_core::{
    axum::{
        extract::{FromRequest, Path, Request, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    dtos::{
        session::{RefreshRequest, RevokedResponse},
        MessageResponse,
    },
    middleware::{access_token_from, anonymous_context, RequestContext},
    models::{DeviceMeta, RevocationReason},
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Route parameters. Path-addressed requests also capture the tenant label.
#[derive(Debug, Deserialize)]
pub struct SessionPath {
    session_id: Uuid,
}

/// Exchange a refresh token for a new pair. Every failure looks the same.
pub async fn refresh(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let context = anonymous_context(&request);
    let ValidatedJson(body) = ValidatedJson::<RefreshRequest>::from_request(request, &state)
        .await
        .map_err(|_| ServiceError::unauthenticated("malformed refresh request"))?;

    let device = DeviceMeta {
        device_name: body.device_name,
        ip_address: context.ip_address.clone(),
        user_agent: context.user_agent.clone(),
    };
    let pair = state
        .sessions
        .rotate_token_pair(&body.refresh_token, &device, &context)
        .await
        .ok_or_else(|| ServiceError::unauthenticated("refresh rejected"))?;

    Ok((StatusCode::OK, Json(pair)))
}

/// Ends the current session and revokes the presented access token.
pub async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let audit = ctx.audit_context();
    if let Some(token) = access_token_from(&headers, &state.config.security.session_cookie_name) {
        if let Err(e) = state.sessions.revoke_access_token(&token, &ctx.claims).await {
            tracing::error!(error = %e, user_id = %ctx.user_id, "Failed to blacklist access token on logout");
        }
    }

    match state
        .sessions
        .revoke_session(ctx.session_id, ctx.user_id, RevocationReason::Logout, &audit)
        .await
    {
        Ok(()) | Err(ServiceError::Conflict(_)) => {}
        Err(e) => return Err(e.into()),
    }

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

pub async fn logout_all(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state
        .sessions
        .revoke_all_for_user(ctx.user_id, RevocationReason::Logout, &ctx.audit_context())
        .await?;
    Ok((StatusCode::OK, Json(RevokedResponse { revoked })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state
        .sessions
        .list_sessions(ctx.user_id, Some(ctx.session_id))
        .await?;
    Ok(Json(sessions))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(SessionPath { session_id }): Path<SessionPath>,
) -> Result<impl IntoResponse, AppError> {
    state
        .sessions
        .revoke_session(session_id, ctx.user_id, RevocationReason::Logout, &ctx.audit_context())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
