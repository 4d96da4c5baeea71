//! Backup code model - single-use recovery codes issued in batches.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub code_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub batch_id: Uuid,
    pub code_salt: String,
    pub code_hash: String,
    pub used_utc: Option<DateTime<Utc>>,
    pub invalidated_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl BackupCode {
    pub fn new(user_id: Uuid, tenant_id: Uuid, batch_id: Uuid, salt: String, hash: String) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            batch_id,
            code_salt: salt,
            code_hash: hash,
            used_utc: None,
            invalidated_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.used_utc.is_none() && self.invalidated_utc.is_none()
    }
}
