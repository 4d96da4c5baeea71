//! In-process implementation of the storage traits.
//!
//! All tables live behind one mutex so multi-row writes are atomic the same way
//! a database transaction is. `set_available(false)` makes every call fail like
//! an unreachable database; `set_latency` delays every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::store::{AuditStore, MfaStore, RbacStore, SessionStore, TenantDirectory, UserStore};
use crate::models::{
    AssignedRole, AuditCategory, AuditEvent, AuditFilter, BackupCode, DeviceStatus, MfaDevice,
    Permission, RefreshSession, RevocationReason, Role, RoleAssignment, SecurityAlert,
    TeamMembership, Tenant, User, VerificationCode,
};

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, RefreshSession>,
    devices: HashMap<Uuid, MfaDevice>,
    backup_codes: HashMap<Uuid, BackupCode>,
    verification_codes: HashMap<Uuid, VerificationCode>,
    roles: HashMap<Uuid, Role>,
    permissions: Vec<Permission>,
    assignments: HashMap<Uuid, RoleAssignment>,
    teams: Vec<TeamMembership>,
    events: Vec<AuditEvent>,
    alerts: HashMap<Uuid, SecurityAlert>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulates the database becoming unreachable (`false`) or recovering (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Seeds a tenant directly, bypassing provisioning.
    pub fn put_tenant(&self, tenant: Tenant) -> Result<(), AppError> {
        self.lock()?.tenants.insert(tenant.tenant_id, tenant);
        Ok(())
    }

    /// Seeds a user directly, bypassing provisioning.
    pub fn put_user(&self, user: User) -> Result<(), AppError> {
        self.lock()?.users.insert(user.user_id, user);
        Ok(())
    }

    /// Rewrites a stored event's timestamp; used to age events in retention tests.
    pub fn backdate_event(&self, event_id: Uuid, occurred_utc: DateTime<Utc>) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        match tables.events.iter_mut().find(|e| e.event_id == event_id) {
            Some(event) => {
                event.occurred_utc = occurred_utc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn event_count(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.events.len())
    }

    pub fn open_alerts(&self) -> Result<Vec<SecurityAlert>, AppError> {
        Ok(self
            .lock()?
            .alerts
            .values()
            .filter(|a| a.is_open())
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Memory store poisoned: {}", e)))
    }

    async fn enter(&self) -> Result<(), AppError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::DatabaseError(anyhow::anyhow!(
                "connection refused: storage unavailable"
            )))
        }
    }
}

fn conflict(message: &str) -> AppError {
    AppError::Conflict(anyhow::anyhow!(message.to_string()))
}

fn revoke_where<F>(
    tables: &mut Tables,
    reason: RevocationReason,
    at: DateTime<Utc>,
    predicate: F,
) -> Vec<RefreshSession>
where
    F: Fn(&RefreshSession) -> bool,
{
    let mut revoked = Vec::new();
    for session in tables.sessions.values_mut() {
        if session.revoked_utc.is_none() && predicate(session) {
            session.revoked_utc = Some(at);
            session.revoked_reason = Some(reason.as_str().to_string());
            revoked.push(session.clone());
        }
    }
    revoked
}

fn active_duplicate(tables: &Tables, assignment: &RoleAssignment) -> bool {
    tables.assignments.values().any(|a| {
        a.is_active
            && a.user_id == assignment.user_id
            && a.role_id == assignment.role_id
            && a.tenant_id == assignment.tenant_id
            && a.is_effective_at(assignment.created_utc)
    })
}

#[async_trait]
impl TenantDirectory for MemoryStore {
    async fn find_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .tenants
            .values()
            .find(|t| t.subdomain == subdomain)
            .cloned())
    }

    async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        self.enter().await?;
        Ok(self.lock()?.tenants.get(&tenant_id).cloned())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.enter().await?;
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_subject(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.identity_provider == provider && u.provider_subject == subject)
            .cloned())
    }

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        self.enter().await?;
        if let Some(user) = self.lock()?.users.get_mut(&user_id) {
            user.last_login_utc = Some(at);
        }
        Ok(())
    }

    async fn provision_tenant(
        &self,
        tenant: &Tenant,
        user: &User,
        assignment: &RoleAssignment,
    ) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;

        if tables.tenants.values().any(|t| t.subdomain == tenant.subdomain) {
            return Err(conflict("Record already exists"));
        }
        if tables.users.values().any(|u| {
            u.identity_provider == user.identity_provider
                && u.provider_subject == user.provider_subject
        }) {
            return Err(conflict("Record already exists"));
        }

        tables.tenants.insert(tenant.tenant_id, tenant.clone());
        tables.users.insert(user.user_id, user.clone());
        tables
            .assignments
            .insert(assignment.assignment_id, assignment.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        if tables.sessions.contains_key(&session.session_id) {
            return Err(conflict("Record already exists"));
        }
        tables.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, AppError> {
        self.enter().await?;
        Ok(self.lock()?.sessions.get(&session_id).cloned())
    }

    async fn rotate_session(
        &self,
        old_session_id: Uuid,
        replacement: &RefreshSession,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;

        let Some(old) = tables.sessions.get_mut(&old_session_id) else {
            return Ok(false);
        };
        if !old.is_valid_at(at) {
            return Ok(false);
        }
        old.revoked_utc = Some(at);
        old.revoked_reason = Some(RevocationReason::Rotation.as_str().to_string());
        old.replaced_by = Some(replacement.session_id);
        old.last_used_utc = at;

        tables
            .sessions
            .insert(replacement.session_id, replacement.clone());
        Ok(true)
    }

    async fn mark_session_mfa_verified(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        match tables.sessions.get_mut(&session_id) {
            Some(session) if session.is_valid_at(at) => {
                session.mfa_verified_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        Ok(!revoke_where(&mut tables, reason, at, |s| s.session_id == session_id).is_empty())
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        Ok(revoke_where(&mut tables, reason, at, |s| s.user_id == user_id))
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        Ok(revoke_where(&mut tables, reason, at, |s| s.family_id == family_id))
    }

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError> {
        self.enter().await?;
        let mut sessions: Vec<RefreshSession> = self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_valid_at(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_used_utc.cmp(&a.last_used_utc));
        Ok(sessions)
    }
}

#[async_trait]
impl MfaStore for MemoryStore {
    async fn insert_device(&self, device: &MfaDevice) -> Result<(), AppError> {
        self.enter().await?;
        self.lock()?.devices.insert(device.device_id, device.clone());
        Ok(())
    }

    async fn find_device(&self, device_id: Uuid) -> Result<Option<MfaDevice>, AppError> {
        self.enter().await?;
        Ok(self.lock()?.devices.get(&device_id).cloned())
    }

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<MfaDevice>, AppError> {
        self.enter().await?;
        let mut devices: Vec<MfaDevice> = self
            .lock()?
            .devices
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(devices)
    }

    async fn mark_device_verified(
        &self,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.enter().await?;
        if let Some(device) = self.lock()?.devices.get_mut(&device_id) {
            if device.is_pending() {
                device.device_status_code = DeviceStatus::Enabled.as_str().to_string();
                device.failed_attempts = 0;
                device.verified_utc = Some(at);
                device.last_used_utc = Some(at);
            }
        }
        Ok(())
    }

    async fn record_device_success(
        &self,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.enter().await?;
        if let Some(device) = self.lock()?.devices.get_mut(&device_id) {
            device.failed_attempts = 0;
            device.last_used_utc = Some(at);
        }
        Ok(())
    }

    async fn record_device_failure(&self, device_id: Uuid) -> Result<(), AppError> {
        self.enter().await?;
        if let Some(device) = self.lock()?.devices.get_mut(&device_id) {
            device.failed_attempts += 1;
        }
        Ok(())
    }

    async fn disable_device(&self, device_id: Uuid) -> Result<bool, AppError> {
        self.enter().await?;
        match self.lock()?.devices.get_mut(&device_id) {
            Some(device) if device.status() != Some(DeviceStatus::Disabled) => {
                device.device_status_code = DeviceStatus::Disabled.as_str().to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        for code in tables.backup_codes.values_mut() {
            if code.user_id == user_id && code.is_usable() {
                code.invalidated_utc = Some(at);
            }
        }
        for code in codes {
            tables.backup_codes.insert(code.code_id, code.clone());
        }
        Ok(())
    }

    async fn list_usable_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .backup_codes
            .values()
            .filter(|c| c.user_id == user_id && c.is_usable())
            .cloned()
            .collect())
    }

    async fn consume_backup_code(
        &self,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        match self.lock()?.backup_codes.get_mut(&code_id) {
            Some(code) if code.is_usable() => {
                code.used_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_verification_code(
        &self,
        code: &VerificationCode,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        for existing in tables.verification_codes.values_mut() {
            if existing.device_id == code.device_id
                && existing.consumed_utc.is_none()
                && existing.superseded_utc.is_none()
            {
                existing.superseded_utc = Some(at);
            }
        }
        tables.verification_codes.insert(code.code_id, code.clone());
        Ok(())
    }

    async fn find_open_verification_code(
        &self,
        device_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .verification_codes
            .values()
            .filter(|c| c.device_id == device_id && c.is_open_at(now))
            .max_by_key(|c| c.created_utc)
            .cloned())
    }

    async fn consume_verification_code(
        &self,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        match self.lock()?.verification_codes.get_mut(&code_id) {
            Some(code) if code.consumed_utc.is_none() => {
                code.consumed_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn seed_system_roles(&self, roles: &[(Role, Vec<Permission>)]) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        for (role, permissions) in roles {
            let exists = tables
                .roles
                .values()
                .any(|r| r.tenant_id.is_none() && r.role_name == role.role_name);
            if !exists {
                tables.roles.insert(role.role_id, role.clone());
                tables.permissions.extend(permissions.iter().cloned());
            }
        }
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AppError> {
        self.enter().await?;
        Ok(self.lock()?.roles.get(&role_id).cloned())
    }

    async fn find_system_role(&self, role_name: &str) -> Result<Option<Role>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .roles
            .values()
            .find(|r| r.tenant_id.is_none() && r.role_name == role_name && r.is_active)
            .cloned())
    }

    async fn find_tenant_role_by_name(
        &self,
        tenant_id: Uuid,
        role_name: &str,
    ) -> Result<Option<Role>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .roles
            .values()
            .find(|r| r.tenant_id == Some(tenant_id) && r.role_name == role_name && r.is_active)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, AppError> {
        self.enter().await?;
        let mut roles: Vec<Role> = self
            .lock()?
            .roles
            .values()
            .filter(|r| r.is_active && r.is_visible_to(tenant_id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| {
            b.privilege_level
                .cmp(&a.privilege_level)
                .then_with(|| a.role_name.cmp(&b.role_name))
        });
        Ok(roles)
    }

    async fn role_permissions(&self, role_ids: &[Uuid]) -> Result<Vec<Permission>, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .permissions
            .iter()
            .filter(|p| role_ids.contains(&p.role_id))
            .cloned()
            .collect())
    }

    async fn insert_role(&self, role: &Role, permissions: &[Permission]) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        let duplicate = tables.roles.values().any(|r| {
            r.is_active && r.tenant_id == role.tenant_id && r.role_name == role.role_name
        });
        if duplicate {
            return Err(conflict("Record already exists"));
        }
        tables.roles.insert(role.role_id, role.clone());
        tables.permissions.extend(permissions.iter().cloned());
        Ok(())
    }

    async fn deactivate_role(
        &self,
        role_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        if let Some(role) = tables.roles.get_mut(&role_id) {
            if !role.is_system {
                role.is_active = false;
            }
        }
        let mut affected = Vec::new();
        for assignment in tables.assignments.values_mut() {
            if assignment.role_id == role_id && assignment.is_active {
                assignment.is_active = false;
                assignment.revoked_utc = Some(at);
                affected.push(assignment.user_id);
            }
        }
        Ok(affected)
    }

    async fn effective_roles(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AssignedRole>, AppError> {
        self.enter().await?;
        let tables = self.lock()?;
        Ok(tables
            .assignments
            .values()
            .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id && a.is_effective_at(now))
            .filter_map(|a| {
                tables
                    .roles
                    .get(&a.role_id)
                    .filter(|r| r.is_active && r.is_visible_to(tenant_id))
                    .map(|r| AssignedRole {
                        assignment_id: a.assignment_id,
                        role_id: r.role_id,
                        role_name: r.role_name.clone(),
                        privilege_level: r.privilege_level,
                        is_system: r.is_system,
                        expires_utc: a.expires_utc,
                        assignment_conditions: a.conditions.clone(),
                    })
            })
            .collect())
    }

    async fn insert_assignments(&self, assignments: &[RoleAssignment]) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;

        // Validate the whole batch before writing anything.
        for (index, assignment) in assignments.iter().enumerate() {
            let repeated_in_batch = assignments[..index].iter().any(|other| {
                other.user_id == assignment.user_id
                    && other.role_id == assignment.role_id
                    && other.tenant_id == assignment.tenant_id
            });
            if repeated_in_batch || active_duplicate(&tables, assignment) {
                return Err(conflict("Role already assigned"));
            }
        }

        for assignment in assignments {
            for existing in tables.assignments.values_mut() {
                if existing.is_active
                    && existing.user_id == assignment.user_id
                    && existing.role_id == assignment.role_id
                    && existing.tenant_id == assignment.tenant_id
                {
                    existing.is_active = false;
                    existing.revoked_utc = Some(assignment.created_utc);
                }
            }
            tables
                .assignments
                .insert(assignment.assignment_id, assignment.clone());
        }
        Ok(())
    }

    async fn revoke_assignment(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        revoked_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        let mut revoked = false;
        for assignment in tables.assignments.values_mut() {
            if assignment.user_id == user_id
                && assignment.role_id == role_id
                && assignment.tenant_id == tenant_id
                && assignment.is_effective_at(at)
            {
                assignment.is_active = false;
                assignment.revoked_utc = Some(at);
                assignment.revoked_by = Some(revoked_by);
                revoked = true;
            }
        }
        Ok(revoked)
    }

    async fn add_team_member(&self, membership: &TeamMembership) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        let exists = tables.teams.iter().any(|m| {
            m.tenant_id == membership.tenant_id
                && m.team_id == membership.team_id
                && m.user_id == membership.user_id
        });
        if !exists {
            tables.teams.push(membership.clone());
        }
        Ok(())
    }

    async fn shares_team(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        let tables = self.lock()?;
        Ok(tables
            .teams
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .any(|mine| {
                tables.teams.iter().any(|theirs| {
                    theirs.tenant_id == tenant_id
                        && theirs.team_id == mine.team_id
                        && theirs.user_id == other_user_id
                })
            }))
    }

    async fn belongs_to_any_team(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        self.enter().await?;
        Ok(self
            .lock()?
            .teams
            .iter()
            .any(|m| m.tenant_id == tenant_id && m.user_id == user_id))
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_events(&self, events: &[AuditEvent]) -> Result<(), AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        for event in events {
            if !tables.events.iter().any(|e| e.event_id == event.event_id) {
                tables.events.push(event.clone());
            }
        }
        Ok(())
    }

    async fn search_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AppError> {
        self.enter().await?;
        let mut matching: Vec<AuditEvent> = self
            .lock()?
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_utc.cmp(&a.occurred_utc));
        Ok(matching
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), AppError> {
        self.enter().await?;
        self.lock()?.alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        tenant_id: Option<Uuid>,
        resolved_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        match self.lock()?.alerts.get_mut(&alert_id) {
            Some(alert) if alert.is_open() && (tenant_id.is_none() || alert.tenant_id == tenant_id) => {
                alert.resolved_utc = Some(at);
                alert.resolved_by = Some(resolved_by);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_events(
        &self,
        category: AuditCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.enter().await?;
        let mut tables = self.lock()?;
        let held: Vec<Uuid> = tables
            .alerts
            .values()
            .filter(|a| a.is_open())
            .map(|a| a.event_id)
            .collect();
        let before = tables.events.len();
        tables.events.retain(|e| {
            e.category_code != category.as_str()
                || e.occurred_utc >= cutoff
                || held.contains(&e.event_id)
        });
        Ok((before - tables.events.len()) as u64)
    }
}
