//! PostgreSQL implementation of the storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::store::{AuditStore, MfaStore, RbacStore, SessionStore, TenantDirectory, UserStore};
use crate::models::{
    AssignedRole, AuditCategory, AuditEvent, AuditFilter, BackupCode, MfaDevice, Permission,
    RefreshSession, RevocationReason, Role, RoleAssignment, SecurityAlert, TeamMembership,
    Tenant, User, VerificationCode,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e))
}

/// Maps unique-constraint violations to `Conflict`, everything else to `DatabaseError`.
fn write_err(e: sqlx::Error) -> AppError {
    let unique = e
        .as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false);
    if unique {
        AppError::Conflict(anyhow::anyhow!("Record already exists"))
    } else {
        db_err(e)
    }
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

// ==================== Tenants ====================

#[async_trait]
impl TenantDirectory for Database {
    async fn find_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE subdomain = $1")
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }
}

// ==================== Users ====================

#[async_trait]
impl UserStore for Database {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_user_by_subject(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE identity_provider = $1 AND provider_subject = $2",
        )
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login_utc = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn provision_tenant(
        &self,
        tenant: &Tenant,
        user: &User,
        assignment: &RoleAssignment,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, subdomain, display_name, business_type, tenant_status_code, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.subdomain)
        .bind(&tenant.display_name)
        .bind(&tenant.business_type)
        .bind(&tenant.tenant_status_code)
        .bind(tenant.created_utc)
        .bind(tenant.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        sqlx::query(
            r#"
            INSERT INTO users (user_id, tenant_id, email, display_name, identity_provider, provider_subject, user_status_code, created_utc, last_login_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.identity_provider)
        .bind(&user.provider_subject)
        .bind(&user.user_status_code)
        .bind(user.created_utc)
        .bind(user.last_login_utc)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        insert_assignment(&mut tx, assignment).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

// ==================== Refresh Sessions ====================

async fn insert_session_row(
    executor: &mut sqlx::PgConnection,
    session: &RefreshSession,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_sessions (
            session_id, family_id, user_id, tenant_id, token_salt, token_hash, role_name,
            device_name, ip_address, user_agent, created_utc, last_used_utc, expiry_utc,
            revoked_utc, revoked_reason, replaced_by, mfa_verified_utc
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(session.session_id)
    .bind(session.family_id)
    .bind(session.user_id)
    .bind(session.tenant_id)
    .bind(&session.token_salt)
    .bind(&session.token_hash)
    .bind(&session.role_name)
    .bind(&session.device_name)
    .bind(&session.ip_address)
    .bind(&session.user_agent)
    .bind(session.created_utc)
    .bind(session.last_used_utc)
    .bind(session.expiry_utc)
    .bind(session.revoked_utc)
    .bind(&session.revoked_reason)
    .bind(session.replaced_by)
    .bind(session.mfa_verified_utc)
    .execute(executor)
    .await
    .map_err(write_err)?;
    Ok(())
}

#[async_trait]
impl SessionStore for Database {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_session_row(&mut conn, session).await
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>("SELECT * FROM refresh_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn rotate_session(
        &self,
        old_session_id: Uuid,
        replacement: &RefreshSession,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let retired = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_utc = $2, revoked_reason = $3, replaced_by = $4, last_used_utc = $2
            WHERE session_id = $1 AND revoked_utc IS NULL AND expiry_utc > $2
            "#,
        )
        .bind(old_session_id)
        .bind(at)
        .bind(RevocationReason::Rotation.as_str())
        .bind(replacement.session_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if retired.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        insert_session_row(&mut tx, replacement).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn mark_session_mfa_verified(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions SET mfa_verified_utc = $2
            WHERE session_id = $1 AND revoked_utc IS NULL AND expiry_utc > $2
            "#,
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions SET revoked_utc = $2, revoked_reason = $3
            WHERE session_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(session_id)
        .bind(at)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE refresh_sessions SET revoked_utc = $2, revoked_reason = $3
            WHERE user_id = $1 AND revoked_utc IS NULL
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(at)
        .bind(reason.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE refresh_sessions SET revoked_utc = $2, revoked_reason = $3
            WHERE family_id = $1 AND revoked_utc IS NULL
            RETURNING *
            "#,
        )
        .bind(family_id)
        .bind(at)
        .bind(reason.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT * FROM refresh_sessions
            WHERE user_id = $1 AND revoked_utc IS NULL AND expiry_utc > $2
            ORDER BY last_used_utc DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

// ==================== MFA ====================

#[async_trait]
impl MfaStore for Database {
    async fn insert_device(&self, device: &MfaDevice) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO mfa_devices (
                device_id, user_id, tenant_id, method_code, device_name, secret, contact_target,
                device_status_code, failed_attempts, last_used_utc, verified_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(device.device_id)
        .bind(device.user_id)
        .bind(device.tenant_id)
        .bind(&device.method_code)
        .bind(&device.device_name)
        .bind(&device.secret)
        .bind(&device.contact_target)
        .bind(&device.device_status_code)
        .bind(device.failed_attempts)
        .bind(device.last_used_utc)
        .bind(device.verified_utc)
        .bind(device.created_utc)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn find_device(&self, device_id: Uuid) -> Result<Option<MfaDevice>, AppError> {
        sqlx::query_as::<_, MfaDevice>("SELECT * FROM mfa_devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_devices(&self, user_id: Uuid) -> Result<Vec<MfaDevice>, AppError> {
        sqlx::query_as::<_, MfaDevice>(
            "SELECT * FROM mfa_devices WHERE user_id = $1 ORDER BY created_utc",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn mark_device_verified(
        &self,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE mfa_devices
            SET device_status_code = 'enabled', failed_attempts = 0, verified_utc = $2, last_used_utc = $2
            WHERE device_id = $1 AND device_status_code = 'pending_verification'
            "#,
        )
        .bind(device_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_device_success(
        &self,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE mfa_devices SET failed_attempts = 0, last_used_utc = $2 WHERE device_id = $1",
        )
        .bind(device_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_device_failure(&self, device_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE mfa_devices SET failed_attempts = failed_attempts + 1 WHERE device_id = $1",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn disable_device(&self, device_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_devices SET device_status_code = 'disabled'
            WHERE device_id = $1 AND device_status_code <> 'disabled'
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            UPDATE backup_codes SET invalidated_utc = $2
            WHERE user_id = $1 AND used_utc IS NULL AND invalidated_utc IS NULL
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (code_id, user_id, tenant_id, batch_id, code_salt, code_hash, used_utc, invalidated_utc, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(code.code_id)
            .bind(code.user_id)
            .bind(code.tenant_id)
            .bind(code.batch_id)
            .bind(&code.code_salt)
            .bind(&code.code_hash)
            .bind(code.used_utc)
            .bind(code.invalidated_utc)
            .bind(code.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_usable_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, AppError> {
        sqlx::query_as::<_, BackupCode>(
            r#"
            SELECT * FROM backup_codes
            WHERE user_id = $1 AND used_utc IS NULL AND invalidated_utc IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn consume_backup_code(
        &self,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE backup_codes SET used_utc = $2
            WHERE code_id = $1 AND used_utc IS NULL AND invalidated_utc IS NULL
            "#,
        )
        .bind(code_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_verification_code(
        &self,
        code: &VerificationCode,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            UPDATE verification_codes SET superseded_utc = $2
            WHERE device_id = $1 AND consumed_utc IS NULL AND superseded_utc IS NULL
            "#,
        )
        .bind(code.device_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO verification_codes (code_id, device_id, user_id, code_salt, code_hash, purpose_code, expiry_utc, consumed_utc, superseded_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(code.code_id)
        .bind(code.device_id)
        .bind(code.user_id)
        .bind(&code.code_salt)
        .bind(&code.code_hash)
        .bind(&code.purpose_code)
        .bind(code.expiry_utc)
        .bind(code.consumed_utc)
        .bind(code.superseded_utc)
        .bind(code.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_open_verification_code(
        &self,
        device_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, AppError> {
        sqlx::query_as::<_, VerificationCode>(
            r#"
            SELECT * FROM verification_codes
            WHERE device_id = $1 AND consumed_utc IS NULL AND superseded_utc IS NULL AND expiry_utc > $2
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn consume_verification_code(
        &self,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE verification_codes SET consumed_utc = $2 WHERE code_id = $1 AND consumed_utc IS NULL",
        )
        .bind(code_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== RBAC ====================

async fn insert_role_row(
    executor: &mut sqlx::PgConnection,
    role: &Role,
    permissions: &[Permission],
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO roles (role_id, tenant_id, role_name, description, privilege_level, is_system, is_active, created_by, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(role.role_id)
    .bind(role.tenant_id)
    .bind(&role.role_name)
    .bind(&role.description)
    .bind(role.privilege_level)
    .bind(role.is_system)
    .bind(role.is_active)
    .bind(role.created_by)
    .bind(role.created_utc)
    .execute(&mut *executor)
    .await
    .map_err(write_err)?;

    for permission in permissions {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (permission_id, role_id, resource, action, context_code, conditions)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(permission.permission_id)
        .bind(permission.role_id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.context_code)
        .bind(&permission.conditions)
        .execute(&mut *executor)
        .await
        .map_err(write_err)?;
    }
    Ok(())
}

async fn insert_assignment(
    executor: &mut sqlx::PgConnection,
    assignment: &RoleAssignment,
) -> Result<(), AppError> {
    // Lapsed grants would otherwise block a fresh assignment through the partial unique index.
    sqlx::query(
        r#"
        UPDATE role_assignments SET is_active = FALSE, revoked_utc = $4
        WHERE user_id = $1 AND role_id = $2 AND tenant_id = $3 AND is_active
          AND expires_utc IS NOT NULL AND expires_utc <= $4
        "#,
    )
    .bind(assignment.user_id)
    .bind(assignment.role_id)
    .bind(assignment.tenant_id)
    .bind(assignment.created_utc)
    .execute(&mut *executor)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        INSERT INTO role_assignments (
            assignment_id, user_id, role_id, tenant_id, assigned_by, expires_utc, conditions,
            is_active, created_utc, revoked_utc, revoked_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(assignment.assignment_id)
    .bind(assignment.user_id)
    .bind(assignment.role_id)
    .bind(assignment.tenant_id)
    .bind(assignment.assigned_by)
    .bind(assignment.expires_utc)
    .bind(&assignment.conditions)
    .bind(assignment.is_active)
    .bind(assignment.created_utc)
    .bind(assignment.revoked_utc)
    .bind(assignment.revoked_by)
    .execute(&mut *executor)
    .await
    .map_err(|e| match write_err(e) {
        AppError::Conflict(_) => AppError::Conflict(anyhow::anyhow!("Role already assigned")),
        other => other,
    })?;
    Ok(())
}

#[async_trait]
impl RbacStore for Database {
    async fn seed_system_roles(&self, roles: &[(Role, Vec<Permission>)]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for (role, permissions) in roles {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM roles WHERE tenant_id IS NULL AND role_name = $1)",
            )
            .bind(&role.role_name)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            if !exists {
                insert_role_row(&mut tx, role, permissions).await?;
                tracing::info!(role = %role.role_name, "Seeded system role");
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_system_role(&self, role_name: &str) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id IS NULL AND role_name = $1 AND is_active",
        )
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_tenant_role_by_name(
        &self,
        tenant_id: Uuid,
        role_name: &str,
    ) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 AND role_name = $2 AND is_active",
        )
        .bind(tenant_id)
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, AppError> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT * FROM roles
            WHERE is_active AND (tenant_id IS NULL OR tenant_id = $1)
            ORDER BY privilege_level DESC, role_name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn role_permissions(&self, role_ids: &[Uuid]) -> Result<Vec<Permission>, AppError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Permission>("SELECT * FROM role_permissions WHERE role_id = ANY($1)")
            .bind(role_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_role(&self, role: &Role, permissions: &[Permission]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        insert_role_row(&mut tx, role, permissions).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn deactivate_role(
        &self,
        role_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE roles SET is_active = FALSE WHERE role_id = $1 AND NOT is_system")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let affected: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE role_assignments SET is_active = FALSE, revoked_utc = $2
            WHERE role_id = $1 AND is_active
            RETURNING user_id
            "#,
        )
        .bind(role_id)
        .bind(at)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(affected)
    }

    async fn effective_roles(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AssignedRole>, AppError> {
        sqlx::query_as::<_, AssignedRole>(
            r#"
            SELECT a.assignment_id, a.role_id, r.role_name, r.privilege_level, r.is_system,
                   a.expires_utc, a.conditions AS assignment_conditions
            FROM role_assignments a
            JOIN roles r ON r.role_id = a.role_id
            WHERE a.user_id = $1 AND a.tenant_id = $2 AND a.is_active AND r.is_active
              AND (a.expires_utc IS NULL OR a.expires_utc > $3)
              AND (r.tenant_id IS NULL OR r.tenant_id = a.tenant_id)
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert_assignments(&self, assignments: &[RoleAssignment]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for assignment in assignments {
            // Any failure drops `tx`, rolling back the rows already written.
            insert_assignment(&mut tx, assignment).await?;
        }
        tx.commit().await.map_err(db_err)?;
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
        let result = sqlx::query(
            r#"
            UPDATE role_assignments SET is_active = FALSE, revoked_utc = $4, revoked_by = $5
            WHERE user_id = $1 AND role_id = $2 AND tenant_id = $3 AND is_active
              AND (expires_utc IS NULL OR expires_utc > $4)
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .bind(at)
        .bind(revoked_by)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_team_member(&self, membership: &TeamMembership) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO team_memberships (tenant_id, team_id, user_id, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(membership.tenant_id)
        .bind(membership.team_id)
        .bind(membership.user_id)
        .bind(membership.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn shares_team(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<bool, AppError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM team_memberships a
                JOIN team_memberships b ON a.tenant_id = b.tenant_id AND a.team_id = b.team_id
                WHERE a.tenant_id = $1 AND a.user_id = $2 AND b.user_id = $3
            )
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(other_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn belongs_to_any_team(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM team_memberships WHERE tenant_id = $1 AND user_id = $2)",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

// ==================== Audit ====================

#[async_trait]
impl AuditStore for Database {
    async fn insert_events(&self, events: &[AuditEvent]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO audit_events (
                    event_id, event_type, category_code, risk_code, user_id, tenant_id, session_id,
                    ip_address, user_agent, resource, action, details, compliance_tags,
                    correlation_id, occurred_utc
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(&event.category_code)
            .bind(&event.risk_code)
            .bind(event.user_id)
            .bind(event.tenant_id)
            .bind(event.session_id)
            .bind(&event.ip_address)
            .bind(&event.user_agent)
            .bind(&event.resource)
            .bind(&event.action)
            .bind(&event.details)
            .bind(&event.compliance_tags)
            .bind(&event.correlation_id)
            .bind(event.occurred_utc)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn search_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AppError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM audit_events WHERE TRUE");

        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(tenant_id) = filter.tenant_id {
            query.push(" AND tenant_id = ").push_bind(tenant_id);
        }
        if let Some(category) = filter.category {
            query.push(" AND category_code = ").push_bind(category.as_str());
        }
        if let Some(risk) = filter.risk {
            query.push(" AND risk_code = ").push_bind(risk.as_str());
        }
        if let Some(event_type) = &filter.event_type {
            query.push(" AND event_type = ").push_bind(event_type.clone());
        }
        if let Some(from) = filter.from {
            query.push(" AND occurred_utc >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND occurred_utc <= ").push_bind(to);
        }
        if let Some(ip) = &filter.ip_address {
            query.push(" AND ip_address = ").push_bind(ip.clone());
        }

        query
            .push(" ORDER BY occurred_utc DESC LIMIT ")
            .push_bind(filter.effective_limit())
            .push(" OFFSET ")
            .push_bind(filter.effective_offset());

        query
            .build_query_as::<AuditEvent>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO security_alerts (alert_id, event_id, tenant_id, alert_type, risk_code, summary, created_utc, resolved_utc, resolved_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.alert_id)
        .bind(alert.event_id)
        .bind(alert.tenant_id)
        .bind(&alert.alert_type)
        .bind(&alert.risk_code)
        .bind(&alert.summary)
        .bind(alert.created_utc)
        .bind(alert.resolved_utc)
        .bind(alert.resolved_by)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        tenant_id: Option<Uuid>,
        resolved_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE security_alerts SET resolved_utc = $3, resolved_by = $4
            WHERE alert_id = $1 AND resolved_utc IS NULL
              AND ($2::uuid IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(alert_id)
        .bind(tenant_id)
        .bind(at)
        .bind(resolved_by)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_events(
        &self,
        category: AuditCategory,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_events e
            WHERE e.category_code = $1 AND e.occurred_utc < $2
              AND NOT EXISTS (
                  SELECT 1 FROM security_alerts s
                  WHERE s.event_id = e.event_id AND s.resolved_utc IS NULL
              )
            "#,
        )
        .bind(category.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
