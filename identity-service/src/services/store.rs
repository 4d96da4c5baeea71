//! Storage seams for the identity core.
//!
//! Services depend on these traits rather than on a concrete pool so they can
//! run against PostgreSQL in production and an in-process store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    AssignedRole, AuditCategory, AuditEvent, AuditFilter, BackupCode, MfaDevice, Permission,
    RefreshSession, RevocationReason, Role, RoleAssignment, SecurityAlert, TeamMembership,
    Tenant, User, VerificationCode,
};

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Exact, case-sensitive lookup on the stored (lowercase) subdomain.
    async fn find_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError>;
    async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_user_by_subject(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>, AppError>;
    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;
    /// Creates the tenant, its first user and that user's assignment in one transaction.
    /// A taken subdomain or subject surfaces as `AppError::Conflict`.
    async fn provision_tenant(
        &self,
        tenant: &Tenant,
        user: &User,
        assignment: &RoleAssignment,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), AppError>;
    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, AppError>;
    /// Retires `old_session_id` (reason `rotation`) and inserts `replacement` atomically.
    /// Returns `false` without inserting when the old session was no longer active.
    async fn rotate_session(
        &self,
        old_session_id: Uuid,
        replacement: &RefreshSession,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// Records a completed second-factor check on an active session.
    async fn mark_session_mfa_verified(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// Returns `false` when the session was already revoked.
    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// Revokes every active session of the user and returns the sessions it revoked.
    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError>;
    /// Revokes every active session in a rotation family and returns them.
    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError>;
    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError>;
}

#[async_trait]
pub trait MfaStore: Send + Sync {
    async fn insert_device(&self, device: &MfaDevice) -> Result<(), AppError>;
    async fn find_device(&self, device_id: Uuid) -> Result<Option<MfaDevice>, AppError>;
    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<MfaDevice>, AppError>;
    /// Moves a pending device to `enabled` and clears its failure counter.
    async fn mark_device_verified(&self, device_id: Uuid, at: DateTime<Utc>)
        -> Result<(), AppError>;
    async fn record_device_success(&self, device_id: Uuid, at: DateTime<Utc>)
        -> Result<(), AppError>;
    async fn record_device_failure(&self, device_id: Uuid) -> Result<(), AppError>;
    /// Returns `false` when the device was already disabled.
    async fn disable_device(&self, device_id: Uuid) -> Result<bool, AppError>;
    /// Invalidates every unused code of the user and stores `codes` in one transaction.
    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;
    async fn list_usable_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, AppError>;
    /// Returns `false` when the code had already been used or invalidated.
    async fn consume_backup_code(&self, code_id: Uuid, at: DateTime<Utc>)
        -> Result<bool, AppError>;
    /// Stores a new code and supersedes any open code for the same device.
    async fn insert_verification_code(
        &self,
        code: &VerificationCode,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;
    async fn find_open_verification_code(
        &self,
        device_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, AppError>;
    /// Returns `false` when the code was already consumed.
    async fn consume_verification_code(
        &self,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    /// Inserts the built-in roles that are not present yet.
    async fn seed_system_roles(&self, roles: &[(Role, Vec<Permission>)]) -> Result<(), AppError>;
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AppError>;
    async fn find_system_role(&self, role_name: &str) -> Result<Option<Role>, AppError>;
    async fn find_tenant_role_by_name(
        &self,
        tenant_id: Uuid,
        role_name: &str,
    ) -> Result<Option<Role>, AppError>;
    /// Active system roles plus the active custom roles of the tenant.
    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, AppError>;
    async fn role_permissions(&self, role_ids: &[Uuid]) -> Result<Vec<Permission>, AppError>;
    async fn insert_role(&self, role: &Role, permissions: &[Permission]) -> Result<(), AppError>;
    /// Deactivates a custom role and its assignments; returns the affected user ids.
    async fn deactivate_role(&self, role_id: Uuid, at: DateTime<Utc>)
        -> Result<Vec<Uuid>, AppError>;
    /// Effective (active, unexpired, role active) assignments of a user in a tenant.
    async fn effective_roles(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AssignedRole>, AppError>;
    /// Inserts all assignments or none. A duplicate active assignment is a conflict.
    async fn insert_assignments(&self, assignments: &[RoleAssignment]) -> Result<(), AppError>;
    /// Returns `false` when there was no active assignment to revoke.
    async fn revoke_assignment(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        revoked_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    async fn add_team_member(&self, membership: &TeamMembership) -> Result<(), AppError>;
    async fn shares_team(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<bool, AppError>;
    async fn belongs_to_any_team(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends a batch in one transaction.
    async fn insert_events(&self, events: &[AuditEvent]) -> Result<(), AppError>;
    async fn search_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AppError>;
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), AppError>;
    /// Returns `false` when the alert does not exist in the tenant or is already resolved.
    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        tenant_id: Option<Uuid>,
        resolved_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// Deletes events of `category` older than `cutoff`, skipping any event
    /// referenced by an unresolved alert.
    async fn purge_events(
        &self,
        category: AuditCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}

/// Every storage seam, implemented by one backend.
pub trait IdentityStore:
    TenantDirectory + UserStore + SessionStore + MfaStore + RbacStore + AuditStore
{
}

impl<T> IdentityStore for T where
    T: TenantDirectory + UserStore + SessionStore + MfaStore + RbacStore + AuditStore
{
}
