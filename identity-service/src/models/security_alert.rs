//! Security alert model - opened for critical events, closed by an admin.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SecurityAlert {
    pub alert_id: Uuid,
    pub event_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub alert_type: String,
    pub risk_code: String,
    pub summary: String,
    pub created_utc: DateTime<Utc>,
    pub resolved_utc: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
}

impl SecurityAlert {
    pub fn new(
        event_id: Uuid,
        tenant_id: Option<Uuid>,
        alert_type: &str,
        risk_code: &str,
        summary: String,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            event_id,
            tenant_id,
            alert_type: alert_type.to_string(),
            risk_code: risk_code.to_string(),
            summary,
            created_utc: Utc::now(),
            resolved_utc: None,
            resolved_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_utc.is_none()
    }
}
