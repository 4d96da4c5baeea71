//! Role model - system-wide built-ins and tenant-scoped custom roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Permission;

/// Role entity. `tenant_id` is `None` exactly for system roles.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub role_name: String,
    pub description: Option<String>,
    pub privilege_level: i32,
    pub is_system: bool,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn system(role_name: &str, description: &str, privilege_level: i32) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id: None,
            role_name: role_name.to_string(),
            description: Some(description.to_string()),
            privilege_level,
            is_system: true,
            is_active: true,
            created_by: None,
            created_utc: Utc::now(),
        }
    }

    pub fn custom(
        tenant_id: Uuid,
        role_name: String,
        description: Option<String>,
        privilege_level: i32,
        created_by: Uuid,
    ) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id: Some(tenant_id),
            role_name,
            description,
            privilege_level,
            is_system: false,
            is_active: true,
            created_by: Some(created_by),
            created_utc: Utc::now(),
        }
    }

    /// Whether this role is visible inside `tenant_id`.
    pub fn is_visible_to(&self, tenant_id: Uuid) -> bool {
        self.tenant_id.is_none() || self.tenant_id == Some(tenant_id)
    }
}

/// Role with its permission set, for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}
