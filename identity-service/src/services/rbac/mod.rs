//! Role-based access control with tenant-scoped custom roles over a fixed
//! system catalog.
//!
//! A request is granted when one of the user's effective permissions matches
//! (resource, action), its scope covers the requested context, its conditions
//! hold, and the context-specific secondary check passes. Anything else,
//! including storage errors and timeouts, is a deny.

pub mod cache;
pub mod catalog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::cache::{CachedGrants, PermissionCache};
use super::audit::{AuditContext, AuditLogger, AuditRecord};
use super::store::{RbacStore, UserStore};
use super::{metrics, ServiceError};
use crate::config::RbacConfig;
use crate::models::{
    AssignedRole, AuditCategory, AuditEventType, ContextScope, Permission, PermissionSpec,
    RiskLevel, Role, RoleAssignment, RoleWithPermissions, TeamMembership,
};
use crate::utils::validation::is_identifier;

pub const REASON_NO_MATCH: &str = "no matching permissions";
pub const REASON_UNAVAILABLE: &str = "evaluation unavailable";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub resource: String,
    pub action: String,
    pub context: ContextScope,
    #[serde(default)]
    pub target_id: Option<Uuid>,
    /// Request attributes that permission and assignment conditions are matched against.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl PermissionRequest {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        resource: &str,
        action: &str,
        context: ContextScope,
    ) -> Self {
        Self {
            user_id,
            tenant_id,
            resource: resource.to_string(),
            action: action.to_string(),
            context,
            target_id: None,
            attributes: Map::new(),
        }
    }

    pub fn target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.resource, self.action, self.context.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionDecision {
    pub granted: bool,
    pub reason: String,
    pub applied_roles: Vec<String>,
    pub applied_permissions: Vec<String>,
}

impl PermissionDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
            applied_roles: Vec::new(),
            applied_permissions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
    #[serde(default)]
    pub expires_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub privilege_level: i32,
    pub permissions: Vec<PermissionSpec>,
}

#[derive(Clone)]
pub struct RbacEngine {
    store: Arc<dyn RbacStore>,
    users: Arc<dyn UserStore>,
    cache: Arc<PermissionCache>,
    audit: AuditLogger,
    config: RbacConfig,
}

impl RbacEngine {
    pub fn new(
        store: Arc<dyn RbacStore>,
        users: Arc<dyn UserStore>,
        audit: AuditLogger,
        config: RbacConfig,
    ) -> Self {
        Self {
            store,
            users,
            cache: Arc::new(PermissionCache::new(Duration::from_secs(config.cache_ttl_seconds))),
            audit,
            config,
        }
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub fn spawn_cache_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.cache).spawn_sweeper(cancel)
    }

    pub async fn seed_system_roles(&self) -> Result<(), ServiceError> {
        self.store.seed_system_roles(&catalog::system_roles()).await?;
        tracing::info!("System roles seeded");
        Ok(())
    }

    /// Always answers; storage failures and timeouts deny.
    pub async fn check_permission(
        &self,
        request: &PermissionRequest,
        context: &AuditContext,
    ) -> PermissionDecision {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.decision_timeout_ms);

        let (decision, cached, risk) =
            match tokio::time::timeout(timeout, self.evaluate(request)).await {
                Ok(Ok((decision, cached))) => {
                    let risk = if decision.granted {
                        RiskLevel::Low
                    } else {
                        RiskLevel::Medium
                    };
                    (decision, cached, risk)
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, user_id = %request.user_id, "Permission evaluation failed");
                    (PermissionDecision::deny(REASON_UNAVAILABLE), false, RiskLevel::High)
                }
                Err(_) => {
                    tracing::error!(user_id = %request.user_id, timeout_ms = self.config.decision_timeout_ms, "Permission evaluation timed out");
                    (PermissionDecision::deny(REASON_UNAVAILABLE), false, RiskLevel::High)
                }
            };

        metrics::observe_permission_check(cached, started.elapsed().as_secs_f64());
        metrics::record_decision("rbac", if decision.granted { "allow" } else { "deny" });

        let event_type = if decision.granted {
            AuditEventType::PermissionGranted
        } else {
            AuditEventType::PermissionDenied
        };
        self.audit
            .log(
                AuditRecord::new(event_type, AuditCategory::Authorization, risk, "check_permission")
                    .context(context)
                    .user(request.user_id)
                    .tenant(request.tenant_id)
                    .resource(request.resource.clone())
                    .details(json!({
                        "requested": request.label(),
                        "target_id": request.target_id,
                        "reason": decision.reason,
                        "roles": decision.applied_roles,
                        "permissions": decision.applied_permissions,
                    })),
            )
            .await;

        decision
    }

    async fn grants(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(Arc<CachedGrants>, bool), ServiceError> {
        if let Some(hit) = self.cache.get(user_id, tenant_id) {
            return Ok((hit, true));
        }

        let generation = self.cache.generation(user_id);
        let roles = self
            .store
            .effective_roles(user_id, tenant_id, Utc::now())
            .await?;
        let role_ids: Vec<Uuid> = roles.iter().map(|r| r.role_id).collect();
        let permissions = if role_ids.is_empty() {
            Vec::new()
        } else {
            self.store.role_permissions(&role_ids).await?
        };

        let grants = Arc::new(CachedGrants::new(roles, permissions));
        self.cache
            .insert_if_current(user_id, tenant_id, Arc::clone(&grants), generation);
        Ok((grants, false))
    }

    async fn evaluate(
        &self,
        request: &PermissionRequest,
    ) -> Result<(PermissionDecision, bool), ServiceError> {
        let (grants, cached) = self.grants(request.user_id, request.tenant_id).await?;
        let now = Utc::now();

        let mut applied_roles: Vec<String> = Vec::new();
        let mut applied_permissions: Vec<String> = Vec::new();

        for role in grants
            .roles
            .iter()
            .filter(|r| r.expires_utc.map_or(true, |exp| exp > now))
        {
            if !conditions_hold(role.assignment_conditions.as_ref(), &request.attributes) {
                continue;
            }
            let matching: Vec<&Permission> = grants
                .permissions
                .iter()
                .filter(|p| p.role_id == role.role_id && permission_matches(p, request))
                .collect();
            if matching.is_empty() {
                continue;
            }
            applied_roles.push(role.role_name.clone());
            for permission in matching {
                let label = permission.label();
                if !applied_permissions.contains(&label) {
                    applied_permissions.push(label);
                }
            }
        }

        if applied_roles.is_empty() {
            return Ok((PermissionDecision::deny(REASON_NO_MATCH), cached));
        }

        if let Some(reason) = self
            .secondary_check(request, &grants.roles)
            .await?
        {
            return Ok((PermissionDecision::deny(reason), cached));
        }

        Ok((
            PermissionDecision {
                granted: true,
                reason: "granted".to_string(),
                applied_roles,
                applied_permissions,
            },
            cached,
        ))
    }

    /// Context-specific check once a permission matched. `Some(reason)` denies.
    async fn secondary_check(
        &self,
        request: &PermissionRequest,
        all_roles: &[AssignedRole],
    ) -> Result<Option<String>, ServiceError> {
        match request.context {
            ContextScope::Own => {
                // A missing target is not the acting user.
                if request.resource == "users" && request.target_id != Some(request.user_id) {
                    return Ok(Some("own context requires target to be the acting user".to_string()));
                }
                Ok(None)
            }
            ContextScope::Team => {
                let in_team = match request.target_id {
                    Some(target) if target == request.user_id => self
                        .store
                        .belongs_to_any_team(request.tenant_id, request.user_id)
                        .await?,
                    Some(target) => self
                        .store
                        .shares_team(request.tenant_id, request.user_id, target)
                        .await?,
                    None => self
                        .store
                        .belongs_to_any_team(request.tenant_id, request.user_id)
                        .await?,
                };
                Ok((!in_team).then(|| "acting user shares no team with the target".to_string()))
            }
            ContextScope::Tenant => {
                let member = self
                    .users
                    .find_user_by_id(request.user_id)
                    .await?
                    .is_some_and(|u| u.tenant_id == request.tenant_id && u.is_active());
                Ok((!member).then(|| "acting user does not belong to the tenant".to_string()))
            }
            ContextScope::System => {
                let has_system_role = all_roles.iter().any(|r| r.is_system);
                Ok((!has_system_role).then(|| "system context requires a system role".to_string()))
            }
        }
    }

    pub async fn user_roles(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<AssignedRole>, ServiceError> {
        Ok(self
            .store
            .effective_roles(user_id, tenant_id, Utc::now())
            .await?)
    }

    /// Highest effective privilege level, 0 without roles. Read from storage, not the cache.
    pub async fn highest_level(&self, user_id: Uuid, tenant_id: Uuid) -> Result<i32, ServiceError> {
        Ok(self
            .user_roles(user_id, tenant_id)
            .await?
            .iter()
            .map(|r| r.privilege_level)
            .max()
            .unwrap_or(0))
    }

    /// Name of the highest-privilege effective role, if any.
    pub async fn primary_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<String>, ServiceError> {
        Ok(self
            .user_roles(user_id, tenant_id)
            .await?
            .into_iter()
            .max_by_key(|r| r.privilege_level)
            .map(|r| r.role_name))
    }

    pub async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<RoleWithPermissions>, ServiceError> {
        let roles = self.store.list_roles(tenant_id).await?;
        let role_ids: Vec<Uuid> = roles.iter().map(|r| r.role_id).collect();
        let permissions = if role_ids.is_empty() {
            Vec::new()
        } else {
            self.store.role_permissions(&role_ids).await?
        };

        Ok(roles
            .into_iter()
            .map(|role| {
                let permissions = permissions
                    .iter()
                    .filter(|p| p.role_id == role.role_id)
                    .cloned()
                    .collect();
                RoleWithPermissions { role, permissions }
            })
            .collect())
    }

    pub async fn create_custom_role(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        request: CustomRoleRequest,
        context: &AuditContext,
    ) -> Result<RoleWithPermissions, ServiceError> {
        let name = request.name.trim().to_lowercase();
        if !is_identifier(&name) {
            return Err(ServiceError::validation(
                "role name must be a lowercase identifier",
            ));
        }
        if catalog::is_system_role_name(&name) {
            return Err(ServiceError::validation("role name is reserved for a system role"));
        }
        if !(1..=100).contains(&request.privilege_level) {
            return Err(ServiceError::validation("privilege level must be between 1 and 100"));
        }
        if request.permissions.is_empty() {
            return Err(ServiceError::validation("a role needs at least one permission"));
        }
        for spec in &request.permissions {
            validate_permission_spec(spec)?;
        }

        let actor_level = self.highest_level(actor_id, tenant_id).await?;
        if request.privilege_level >= actor_level {
            return Err(ServiceError::denied(format!(
                "role level {} is not below actor level {}",
                request.privilege_level, actor_level
            )));
        }

        if self
            .store
            .find_tenant_role_by_name(tenant_id, &name)
            .await?
            .is_some()
        {
            return Err(ServiceError::conflict("Role name already exists"));
        }

        let role = Role::custom(
            tenant_id,
            name,
            request.description,
            request.privilege_level,
            actor_id,
        );
        let permissions: Vec<Permission> = request
            .permissions
            .iter()
            .map(|spec| Permission::from_spec(role.role_id, spec))
            .collect();
        self.store
            .insert_role(&role, &permissions)
            .await
            .map_err(conflict_as_domain)?;

        tracing::info!(tenant_id = %tenant_id, role_id = %role.role_id, "Custom role created");
        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::RoleCreated,
                    AuditCategory::RoleManagement,
                    RiskLevel::Medium,
                    "create_custom_role",
                )
                .context(context)
                .user(actor_id)
                .tenant(tenant_id)
                .resource("roles")
                .details(json!({
                    "role_id": role.role_id,
                    "role_name": role.role_name,
                    "privilege_level": role.privilege_level,
                    "permissions": permissions.iter().map(Permission::label).collect::<Vec<_>>(),
                })),
            )
            .await;

        Ok(RoleWithPermissions { role, permissions })
    }

    async fn tenant_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<Role, ServiceError> {
        self.store
            .find_role(role_id)
            .await?
            .filter(|r| r.is_active && r.is_visible_to(tenant_id))
            .ok_or_else(|| ServiceError::NotFound("Role not found".to_string()))
    }

    /// Soft-deletes a custom role and drops every holder's cached grants.
    pub async fn delete_custom_role(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        role_id: Uuid,
        context: &AuditContext,
    ) -> Result<(), ServiceError> {
        let role = self.tenant_role(tenant_id, role_id).await?;
        if role.is_system {
            return Err(ServiceError::validation("system roles cannot be modified"));
        }
        let actor_level = self.highest_level(actor_id, tenant_id).await?;
        if role.privilege_level > actor_level {
            return Err(ServiceError::denied("role outranks actor"));
        }

        let affected = self.store.deactivate_role(role_id, Utc::now()).await?;
        for user_id in &affected {
            self.cache.invalidate_user(*user_id);
        }

        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::RoleDeactivated,
                    AuditCategory::RoleManagement,
                    RiskLevel::High,
                    "delete_custom_role",
                )
                .context(context)
                .user(actor_id)
                .tenant(tenant_id)
                .resource("roles")
                .details(json!({
                    "role_id": role_id,
                    "role_name": role.role_name,
                    "affected_users": affected.len(),
                })),
            )
            .await;
        Ok(())
    }

    pub async fn assign_role(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        request: AssignmentRequest,
        context: &AuditContext,
    ) -> Result<RoleAssignment, ServiceError> {
        let mut assigned = self
            .assign_roles_bulk(actor_id, tenant_id, vec![request], context)
            .await?;
        assigned
            .pop()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("assignment batch was empty")))
    }

    /// Validates every request, then writes all assignments in one transaction.
    pub async fn assign_roles_bulk(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        requests: Vec<AssignmentRequest>,
        context: &AuditContext,
    ) -> Result<Vec<RoleAssignment>, ServiceError> {
        if requests.is_empty() {
            return Err(ServiceError::validation("no assignments given"));
        }
        let actor_level = self.highest_level(actor_id, tenant_id).await?;
        let now = Utc::now();

        let mut assignments = Vec::with_capacity(requests.len());
        let mut role_names = Vec::with_capacity(requests.len());
        for request in requests {
            let role = self.tenant_role(tenant_id, request.role_id).await?;
            if role.privilege_level > actor_level {
                return Err(ServiceError::denied(format!(
                    "role {} outranks actor level {}",
                    role.role_name, actor_level
                )));
            }
            let target_in_tenant = self
                .users
                .find_user_by_id(request.user_id)
                .await?
                .is_some_and(|u| u.tenant_id == tenant_id);
            if !target_in_tenant {
                return Err(ServiceError::NotFound("User not found".to_string()));
            }
            if request.expires_utc.is_some_and(|exp| exp <= now) {
                return Err(ServiceError::validation("expiry must be in the future"));
            }
            if request.conditions.as_ref().is_some_and(|c| !c.is_object()) {
                return Err(ServiceError::validation("conditions must be a JSON object"));
            }

            role_names.push(role.role_name);
            assignments.push(RoleAssignment::new(
                request.user_id,
                request.role_id,
                tenant_id,
                Some(actor_id),
                request.expires_utc,
                request.conditions,
            ));
        }

        self.store
            .insert_assignments(&assignments)
            .await
            .map_err(conflict_as_domain)?;
        for assignment in &assignments {
            self.cache.invalidate_user(assignment.user_id);
        }

        for (assignment, role_name) in assignments.iter().zip(&role_names) {
            self.audit
                .log(
                    AuditRecord::new(
                        AuditEventType::RoleAssigned,
                        AuditCategory::RoleManagement,
                        RiskLevel::Medium,
                        "assign_role",
                    )
                    .context(context)
                    .user(actor_id)
                    .tenant(tenant_id)
                    .resource("roles")
                    .details(json!({
                        "assignment_id": assignment.assignment_id,
                        "target_user_id": assignment.user_id,
                        "role_id": assignment.role_id,
                        "role_name": role_name,
                        "expires_utc": assignment.expires_utc,
                    })),
                )
                .await;
        }
        Ok(assignments)
    }

    pub async fn revoke_role(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        context: &AuditContext,
    ) -> Result<(), ServiceError> {
        let role = self.tenant_role(tenant_id, role_id).await?;
        let actor_level = self.highest_level(actor_id, tenant_id).await?;
        if role.privilege_level > actor_level {
            return Err(ServiceError::denied("role outranks actor"));
        }

        let revoked = self
            .store
            .revoke_assignment(user_id, role_id, tenant_id, actor_id, Utc::now())
            .await?;
        if !revoked {
            return Err(ServiceError::conflict("Role is not assigned"));
        }
        self.cache.invalidate_user(user_id);

        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::RoleRevoked,
                    AuditCategory::RoleManagement,
                    RiskLevel::Medium,
                    "revoke_role",
                )
                .context(context)
                .user(actor_id)
                .tenant(tenant_id)
                .resource("roles")
                .details(json!({
                    "target_user_id": user_id,
                    "role_id": role_id,
                    "role_name": role.role_name,
                })),
            )
            .await;
        Ok(())
    }

    pub async fn add_team_member(
        &self,
        tenant_id: Uuid,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.store
            .add_team_member(&TeamMembership::new(tenant_id, team_id, user_id))
            .await?;
        Ok(())
    }
}

fn permission_matches(permission: &Permission, request: &PermissionRequest) -> bool {
    permission.resource == request.resource
        && permission.action == request.action
        && permission
            .context()
            .is_some_and(|scope| scope.covers(request.context))
        && conditions_hold(permission.conditions.as_ref(), &request.attributes)
}

/// Every key of a condition object must equal the same request attribute.
/// Non-object conditions never hold.
pub fn conditions_hold(conditions: Option<&Value>, attributes: &Map<String, Value>) -> bool {
    match conditions {
        None | Some(Value::Null) => true,
        Some(Value::Object(required)) => required
            .iter()
            .all(|(key, expected)| attributes.get(key) == Some(expected)),
        Some(_) => false,
    }
}

fn validate_permission_spec(spec: &PermissionSpec) -> Result<(), ServiceError> {
    if !is_identifier(&spec.resource) || !is_identifier(&spec.action) {
        return Err(ServiceError::validation(format!(
            "invalid permission '{}:{}'",
            spec.resource, spec.action
        )));
    }
    if spec.context == ContextScope::System {
        return Err(ServiceError::validation(
            "custom roles cannot grant system context",
        ));
    }
    if spec
        .conditions
        .as_ref()
        .is_some_and(|c| !c.is_null() && !c.is_object())
    {
        return Err(ServiceError::validation("conditions must be a JSON object"));
    }
    Ok(())
}

fn conflict_as_domain(err: AppError) -> ServiceError {
    match err {
        AppError::Conflict(e) => ServiceError::Conflict(e.to_string()),
        other => ServiceError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn absent_conditions_always_hold() {
        assert!(conditions_hold(None, &Map::new()));
        assert!(conditions_hold(Some(&Value::Null), &Map::new()));
    }

    #[test]
    fn every_condition_key_must_match() {
        let conditions = json!({ "warehouse": "north", "channel": "retail" });
        assert!(conditions_hold(
            Some(&conditions),
            &attrs(json!({ "warehouse": "north", "channel": "retail", "extra": 1 }))
        ));
        assert!(!conditions_hold(
            Some(&conditions),
            &attrs(json!({ "warehouse": "north" }))
        ));
        assert!(!conditions_hold(
            Some(&conditions),
            &attrs(json!({ "warehouse": "south", "channel": "retail" }))
        ));
    }

    #[test]
    fn non_object_conditions_fail_closed() {
        assert!(!conditions_hold(Some(&json!(["warehouse"])), &Map::new()));
    }

    #[test]
    fn permission_match_respects_scope_hierarchy() {
        let role_id = Uuid::new_v4();
        let tenant_read = Permission::from_spec(
            role_id,
            &PermissionSpec::new("inventory", "read", ContextScope::Tenant),
        );
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());

        let own = PermissionRequest::new(user, tenant, "inventory", "read", ContextScope::Own);
        let system = PermissionRequest::new(user, tenant, "inventory", "read", ContextScope::System);
        let other_action =
            PermissionRequest::new(user, tenant, "inventory", "delete", ContextScope::Own);

        assert!(permission_matches(&tenant_read, &own));
        assert!(!permission_matches(&tenant_read, &system));
        assert!(!permission_matches(&tenant_read, &other_action));
    }

    #[test]
    fn custom_permissions_are_validated() {
        assert!(validate_permission_spec(&PermissionSpec::new("products", "read", ContextScope::Team)).is_ok());
        assert!(validate_permission_spec(&PermissionSpec::new("Products!", "read", ContextScope::Team)).is_err());
        assert!(validate_permission_spec(&PermissionSpec::new("products", "read", ContextScope::System)).is_err());
    }
}
