//! Refresh session model - one row per issued refresh token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why a refresh session stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationReason {
    Rotation,
    Logout,
    Compromise,
    Expired,
    Admin,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotation => "rotation",
            RevocationReason::Logout => "logout",
            RevocationReason::Compromise => "compromise",
            RevocationReason::Expired => "expired",
            RevocationReason::Admin => "admin",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "rotation" => Some(RevocationReason::Rotation),
            "logout" => Some(RevocationReason::Logout),
            "compromise" => Some(RevocationReason::Compromise),
            "expired" => Some(RevocationReason::Expired),
            "admin" => Some(RevocationReason::Admin),
            _ => None,
        }
    }
}

/// Client metadata captured when a session is issued or rotated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMeta {
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Refresh session entity. Only the salted hash of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshSession {
    pub session_id: Uuid,
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_salt: String,
    pub token_hash: String,
    pub role_name: String,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub replaced_by: Option<Uuid>,
    /// Set once a second factor has been verified on this session; carried across rotation.
    pub mfa_verified_utc: Option<DateTime<Utc>>,
}

impl RefreshSession {
    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn is_mfa_verified(&self) -> bool {
        self.mfa_verified_utc.is_some()
    }

    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revoked_reason.as_deref().and_then(RevocationReason::parse)
    }
}

/// Session inventory entry for self-service session management.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub is_current: bool,
}

impl From<&RefreshSession> for SessionInfo {
    fn from(s: &RefreshSession) -> Self {
        Self {
            session_id: s.session_id,
            device: s.device_name.clone(),
            ip_address: s.ip_address.clone(),
            user_agent: s.user_agent.clone(),
            created_utc: s.created_utc,
            last_used_utc: s.last_used_utc,
            expiry_utc: s.expiry_utc,
            is_current: false,
        }
    }
}
