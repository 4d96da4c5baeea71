//! User model - an identity owned by exactly one tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }
}

/// User entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub identity_provider: String,
    pub provider_subject: String,
    pub user_status_code: String,
    pub created_utc: DateTime<Utc>,
    pub last_login_utc: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new active user from a federated identity.
    pub fn new(
        tenant_id: Uuid,
        email: String,
        display_name: Option<String>,
        identity_provider: String,
        provider_subject: String,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            display_name,
            identity_provider,
            provider_subject,
            user_status_code: UserStatus::Active.as_str().to_string(),
            created_utc: Utc::now(),
            last_login_utc: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.user_status_code == UserStatus::Active.as_str()
    }
}

/// User without provider internals, for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl From<&User> for SanitizedUser {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            tenant_id: u.tenant_id,
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            status: u.user_status_code.clone(),
            created_utc: u.created_utc,
        }
    }
}
