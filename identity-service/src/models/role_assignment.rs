//! Role assignment and team membership models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Grant of a role to a user within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoleAssignment {
    pub assignment_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
}

impl RoleAssignment {
    pub fn new(
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        assigned_by: Option<Uuid>,
        expires_utc: Option<DateTime<Utc>>,
        conditions: Option<serde_json::Value>,
    ) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            user_id,
            role_id,
            tenant_id,
            assigned_by,
            expires_utc,
            conditions,
            is_active: true,
            created_utc: Utc::now(),
            revoked_utc: None,
            revoked_by: None,
        }
    }

    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_utc.map_or(true, |exp| exp > now)
    }
}

/// An effective assignment joined with its role, as loaded for evaluation.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AssignedRole {
    pub assignment_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub privilege_level: i32,
    pub is_system: bool,
    pub expires_utc: Option<DateTime<Utc>>,
    pub assignment_conditions: Option<serde_json::Value>,
}

/// Membership of a user in a team inside one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamMembership {
    pub tenant_id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl TeamMembership {
    pub fn new(tenant_id: Uuid, team_id: Uuid, user_id: Uuid) -> Self {
        Self {
            tenant_id,
            team_id,
            user_id,
            created_utc: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expired_assignment_is_not_effective() {
        let mut assignment =
            RoleAssignment::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None, None, None);
        let now = Utc::now();
        assert!(assignment.is_effective_at(now));

        assignment.expires_utc = Some(now - Duration::seconds(1));
        assert!(!assignment.is_effective_at(now));

        assignment.expires_utc = None;
        assignment.is_active = false;
        assert!(!assignment.is_effective_at(now));
    }
}
