use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::services::ElevatedAccess;
use crate::utils::validation::{validate_otp_code, validate_phone_number};

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollTotpRequest {
    #[validate(length(min = 1, max = 64))]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollSmsRequest {
    #[validate(custom(function = "validate_phone_number"))]
    pub phone: String,

    #[validate(length(min = 1, max = 64))]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollEmailRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 64))]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmDeviceRequest {
    pub device_id: Uuid,

    #[validate(custom(function = "validate_otp_code"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyCodeRequest {
    #[validate(custom(function = "validate_otp_code"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmDeviceResponse {
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub sent: usize,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

/// Successful second-factor check. The access token replaces the caller's
/// current one and unlocks operations that need a verified second factor.
#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(flatten)]
    pub access: ElevatedAccess,
}
