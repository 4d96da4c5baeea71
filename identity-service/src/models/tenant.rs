//! Tenant model - the unit of data partitioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Tenant lifecycle status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Pending,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Pending => "pending",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "active" => Some(TenantStatus::Active),
            "suspended" => Some(TenantStatus::Suspended),
            "pending" => Some(TenantStatus::Pending),
            _ => None,
        }
    }
}

/// Tenant entity. Never hard-deleted; suspension is a status change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub subdomain: String,
    pub display_name: String,
    pub business_type: Option<String>,
    pub tenant_status_code: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant.
    pub fn new(subdomain: String, display_name: String, business_type: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: Uuid::new_v4(),
            subdomain,
            display_name,
            business_type,
            tenant_status_code: TenantStatus::Active.as_str().to_string(),
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn status(&self) -> Option<TenantStatus> {
        TenantStatus::parse(&self.tenant_status_code)
    }

    pub fn is_active(&self) -> bool {
        self.status() == Some(TenantStatus::Active)
    }
}

/// Tenant summary for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct TenantResponse {
    pub tenant_id: Uuid,
    pub subdomain: String,
    pub display_name: String,
    pub status: String,
}

impl From<&Tenant> for TenantResponse {
    fn from(t: &Tenant) -> Self {
        Self {
            tenant_id: t.tenant_id,
            subdomain: t.subdomain.clone(),
            display_name: t.display_name.clone(),
            status: t.tenant_status_code.clone(),
        }
    }
}
