use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, max = 256, message = "Refresh token is required"))]
    pub refresh_token: String,

    #[validate(length(max = 128))]
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: usize,
}
