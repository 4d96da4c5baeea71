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
    dtos::mfa::{
        BackupCodesResponse, ChallengeResponse, ConfirmDeviceRequest, ConfirmDeviceResponse,
        EnrollEmailRequest, EnrollSmsRequest, EnrollTotpRequest, VerifyCodeRequest,
        VerifyCodeResponse,
    },
    middleware::{require_second_factor, RequestContext},
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct DevicePath {
    device_id: Uuid,
}

fn name_or(device_name: Option<String>, fallback: &str) -> String {
    device_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

pub async fn enroll_totp(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<EnrollTotpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state
        .mfa
        .enroll_totp(
            ctx.user_id,
            ctx.tenant_id(),
            &name_or(req.device_name, "Authenticator app"),
            &ctx.audit_context(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

pub async fn confirm_totp(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<ConfirmDeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let verified = state
        .mfa
        .confirm_totp(ctx.user_id, req.device_id, &req.code, &ctx.audit_context())
        .await?;
    Ok(Json(ConfirmDeviceResponse { verified }))
}

pub async fn enroll_sms(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<EnrollSmsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state
        .mfa
        .enroll_sms(
            ctx.user_id,
            ctx.tenant_id(),
            &req.phone,
            &name_or(req.device_name, "Phone"),
            &ctx.audit_context(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

pub async fn enroll_email(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<EnrollEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state
        .mfa
        .enroll_email(
            ctx.user_id,
            ctx.tenant_id(),
            &req.email,
            &name_or(req.device_name, "Email"),
            &ctx.audit_context(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

pub async fn confirm_code(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<ConfirmDeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let verified = state
        .mfa
        .confirm_code(ctx.user_id, req.device_id, &req.code, &ctx.audit_context())
        .await?;
    Ok(Json(ConfirmDeviceResponse { verified }))
}

pub async fn send_challenge(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let sent = state
        .mfa
        .send_login_challenge(ctx.user_id, &ctx.audit_context())
        .await?;
    Ok(Json(ChallengeResponse { sent }))
}

/// Second-factor check. A wrong code is indistinguishable from any other
/// authentication failure. Success marks the session and returns an access
/// token carrying the mark.
pub async fn verify(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<VerifyCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let verification = state
        .mfa
        .verify_login(ctx.user_id, &req.code, &ctx.audit_context())
        .await?;
    if !verification.success {
        return Err(ServiceError::unauthenticated("second factor rejected").into());
    }
    let access = state.sessions.elevate(&ctx.claims).await?;
    Ok(Json(VerifyCodeResponse {
        success: verification.success,
        method: verification.method,
        access,
    }))
}

pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let backup_codes = state
        .mfa
        .regenerate_backup_codes(ctx.user_id, ctx.tenant_id(), &ctx.audit_context())
        .await?;
    Ok((StatusCode::CREATED, Json(BackupCodesResponse { backup_codes })))
}

pub async fn list_devices(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.mfa.list_devices(ctx.user_id).await?))
}

pub async fn disable_device(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(DevicePath { device_id }): Path<DevicePath>,
) -> Result<impl IntoResponse, AppError> {
    require_second_factor(&state, &ctx, "disable_device").await?;
    state
        .mfa
        .disable_device(ctx.user_id, device_id, &ctx.audit_context())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
