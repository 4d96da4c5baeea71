use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::models::ContextScope;
use crate::services::audit::PrivacyRequestKind;
use crate::services::rbac::AssignmentRequest;

/// Permission check for the calling user in the resolved tenant.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckPermissionRequest {
    #[validate(length(min = 1, max = 64))]
    pub resource: String,

    #[validate(length(min = 1, max = 64))]
    pub action: String,

    pub context: ContextScope,

    #[serde(default)]
    pub target_id: Option<Uuid>,

    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkAssignRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 assignments"))]
    pub assignments: Vec<AssignmentRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRoleRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PrivacyRequestBody {
    pub kind: PrivacyRequestKind,
}

#[derive(Debug, Serialize)]
pub struct PrivacyRequestResponse {
    pub request_id: Uuid,
    pub kind: PrivacyRequestKind,
}
