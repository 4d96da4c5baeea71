//! Verification code model - server-generated numeric codes sent over SMS or email.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodePurpose {
    Enrollment,
    Login,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Enrollment => "enrollment",
            CodePurpose::Login => "login",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct VerificationCode {
    pub code_id: Uuid,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub code_salt: String,
    pub code_hash: String,
    pub purpose_code: String,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub superseded_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl VerificationCode {
    pub fn new(
        device_id: Uuid,
        user_id: Uuid,
        salt: String,
        hash: String,
        purpose: CodePurpose,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            code_id: Uuid::new_v4(),
            device_id,
            user_id,
            code_salt: salt,
            code_hash: hash,
            purpose_code: purpose.as_str().to_string(),
            expiry_utc: now + Duration::seconds(ttl_seconds),
            consumed_utc: None,
            superseded_utc: None,
            created_utc: now,
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.consumed_utc.is_none() && self.superseded_utc.is_none() && self.expiry_utc > now
    }
}
