//! Permission model - resource x action x context scope, with optional conditions.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Breadth over which a permission applies: `own ⊂ team ⊂ tenant ⊂ system`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextScope {
    Own,
    Team,
    Tenant,
    System,
}

impl ContextScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextScope::Own => "own",
            ContextScope::Team => "team",
            ContextScope::Tenant => "tenant",
            ContextScope::System => "system",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "own" => Some(ContextScope::Own),
            "team" => Some(ContextScope::Team),
            "tenant" => Some(ContextScope::Tenant),
            "system" => Some(ContextScope::System),
            _ => None,
        }
    }

    /// A granted scope satisfies any request scoped equal to or narrower than itself.
    pub fn covers(&self, requested: ContextScope) -> bool {
        *self >= requested
    }
}

/// Permission row linked to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub permission_id: Uuid,
    pub role_id: Uuid,
    pub resource: String,
    pub action: String,
    pub context_code: String,
    pub conditions: Option<serde_json::Value>,
}

impl Permission {
    pub fn from_spec(role_id: Uuid, spec: &PermissionSpec) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            role_id,
            resource: spec.resource.clone(),
            action: spec.action.clone(),
            context_code: spec.context.as_str().to_string(),
            conditions: spec.conditions.clone(),
        }
    }

    pub fn context(&self) -> Option<ContextScope> {
        ContextScope::parse(&self.context_code)
    }

    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.resource, self.action, self.context_code)
    }
}

/// Permission as requested by an admin defining a custom role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSpec {
    pub resource: String,
    pub action: String,
    pub context: ContextScope,
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
}

impl PermissionSpec {
    pub fn new(resource: &str, action: &str, context: ContextScope) -> Self {
        Self {
            resource: resource.to_string(),
            action: action.to_string(),
            context,
            conditions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broader_scopes_cover_narrower_requests() {
        assert!(ContextScope::Tenant.covers(ContextScope::Own));
        assert!(ContextScope::Tenant.covers(ContextScope::Team));
        assert!(ContextScope::Tenant.covers(ContextScope::Tenant));
        assert!(ContextScope::System.covers(ContextScope::Tenant));
    }

    #[test]
    fn narrower_scopes_never_cover_broader_requests() {
        assert!(!ContextScope::Own.covers(ContextScope::Team));
        assert!(!ContextScope::Team.covers(ContextScope::Tenant));
        assert!(!ContextScope::Tenant.covers(ContextScope::System));
    }
}
