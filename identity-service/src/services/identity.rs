//! Federated sign-in and first-time tenant provisioning.
//!
//! The external provider's assertion is verified before this layer is
//! reached; here a (provider, subject) pair is either mapped to its existing
//! user or turned into a brand new tenant owned by that user.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::audit::{AuditContext, AuditLogger, AuditRecord};
use super::rbac::{catalog, RbacEngine};
use super::session::{SessionManager, TokenPair};
use super::store::{RbacStore, TenantDirectory, UserStore};
use super::{metrics, ServiceError};
use crate::config::TenancyConfig;
use crate::models::{
    AuditCategory, AuditEventType, DeviceMeta, RiskLevel, RoleAssignment, SanitizedUser, Tenant,
    TenantResponse, User,
};
use crate::utils::validation::is_dns_label;

const MAX_SUBDOMAIN_LEN: usize = 40;
const MAX_SUFFIX_ATTEMPTS: u32 = 50;
const FALLBACK_SUBDOMAIN: &str = "store";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FederatedIdentity {
    #[validate(length(min = 1, max = 64))]
    pub provider: String,
    #[validate(length(min = 1, max = 255))]
    pub subject: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInOutcome {
    pub user: SanitizedUser,
    pub tenant: TenantResponse,
    pub tokens: TokenPair,
    pub created: bool,
}

#[derive(Clone)]
pub struct IdentityService {
    tenants: Arc<dyn TenantDirectory>,
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RbacStore>,
    rbac: RbacEngine,
    sessions: SessionManager,
    audit: AuditLogger,
    tenancy: TenancyConfig,
}

impl IdentityService {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RbacStore>,
        rbac: RbacEngine,
        sessions: SessionManager,
        audit: AuditLogger,
        tenancy: TenancyConfig,
    ) -> Self {
        Self {
            tenants,
            users,
            roles,
            rbac,
            sessions,
            audit,
            tenancy,
        }
    }

    pub async fn sign_in_federated(
        &self,
        identity: FederatedIdentity,
        requested_subdomain: Option<&str>,
        device: &DeviceMeta,
    ) -> Result<SignInOutcome, ServiceError> {
        identity
            .validate()
            .map_err(|e| ServiceError::validation(e.to_string()))?;
        let context = AuditContext {
            ip_address: device.ip_address.clone(),
            user_agent: device.user_agent.clone(),
            ..AuditContext::default()
        };

        match self
            .users
            .find_user_by_subject(&identity.provider, &identity.subject)
            .await?
        {
            Some(user) => self.sign_in_existing(user, device, &context).await,
            None => {
                self.provision(identity, requested_subdomain, device, &context)
                    .await
            }
        }
    }

    async fn sign_in_existing(
        &self,
        user: User,
        device: &DeviceMeta,
        context: &AuditContext,
    ) -> Result<SignInOutcome, ServiceError> {
        let tenant = self
            .tenants
            .find_tenant_by_id(user.tenant_id)
            .await?
            .filter(Tenant::is_active);

        let tenant = match tenant {
            Some(tenant) if user.is_active() => tenant,
            _ => {
                metrics::record_decision("sign_in", "deny");
                self.audit
                    .log(
                        AuditRecord::new(
                            AuditEventType::LoginFailed,
                            AuditCategory::Authentication,
                            RiskLevel::Medium,
                            "sign_in_federated",
                        )
                        .context(context)
                        .user(user.user_id)
                        .tenant(user.tenant_id)
                        .details(json!({ "reason": "user_or_tenant_inactive" })),
                    )
                    .await;
                return Err(ServiceError::unauthenticated("user or tenant inactive"));
            }
        };

        let role = self
            .rbac
            .primary_role(user.user_id, tenant.tenant_id)
            .await?
            .unwrap_or_default();
        let tokens = self
            .sessions
            .issue_token_pair(user.user_id, tenant.tenant_id, &role, device)
            .await?;
        if let Err(e) = self.users.record_login(user.user_id, Utc::now()).await {
            tracing::warn!(error = %e, user_id = %user.user_id, "Failed to record login time");
        }

        metrics::record_decision("sign_in", "allow");
        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::LoginSucceeded,
                    AuditCategory::Authentication,
                    RiskLevel::Low,
                    "sign_in_federated",
                )
                .context(context)
                .user(user.user_id)
                .tenant(tenant.tenant_id)
                .session(tokens.session_id)
                .details(json!({ "provider": user.identity_provider, "role": role })),
            )
            .await;

        Ok(SignInOutcome {
            user: SanitizedUser::from(&user),
            tenant: TenantResponse::from(&tenant),
            tokens,
            created: false,
        })
    }

    async fn provision(
        &self,
        identity: FederatedIdentity,
        requested_subdomain: Option<&str>,
        device: &DeviceMeta,
        context: &AuditContext,
    ) -> Result<SignInOutcome, ServiceError> {
        let subdomain = match requested_subdomain {
            Some(requested) => self.claim_requested_subdomain(requested).await?,
            None => self.derive_subdomain(&identity.email).await?,
        };

        let admin_role = self
            .roles
            .find_system_role(catalog::TENANT_ADMIN)
            .await?
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("system roles are not seeded")))?;

        let display_name = identity
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| subdomain.clone());
        let tenant = Tenant::new(subdomain, display_name, None);
        let user = User::new(
            tenant.tenant_id,
            identity.email.trim().to_lowercase(),
            identity.display_name,
            identity.provider,
            identity.subject,
        );
        let assignment = RoleAssignment::new(
            user.user_id,
            admin_role.role_id,
            tenant.tenant_id,
            None,
            None,
            None,
        );

        self.users
            .provision_tenant(&tenant, &user, &assignment)
            .await?;
        self.rbac.cache().invalidate_user(user.user_id);

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            user_id = %user.user_id,
            subdomain = %tenant.subdomain,
            "Provisioned tenant for new federated user"
        );
        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::TenantCreated,
                    AuditCategory::Configuration,
                    RiskLevel::Medium,
                    "provision_tenant",
                )
                .context(context)
                .user(user.user_id)
                .tenant(tenant.tenant_id)
                .resource("tenants")
                .details(json!({ "subdomain": tenant.subdomain })),
            )
            .await;
        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::UserProvisioned,
                    AuditCategory::UserManagement,
                    RiskLevel::Medium,
                    "provision_user",
                )
                .context(context)
                .user(user.user_id)
                .tenant(tenant.tenant_id)
                .resource("users")
                .details(json!({
                    "provider": user.identity_provider,
                    "email": user.email,
                    "role": admin_role.role_name,
                })),
            )
            .await;

        let tokens = self
            .sessions
            .issue_token_pair(user.user_id, tenant.tenant_id, &admin_role.role_name, device)
            .await?;
        metrics::record_decision("sign_in", "allow");

        Ok(SignInOutcome {
            user: SanitizedUser::from(&user),
            tenant: TenantResponse::from(&tenant),
            tokens,
            created: true,
        })
    }

    fn is_reserved(&self, subdomain: &str) -> bool {
        self.tenancy.is_reserved(subdomain)
            || subdomain == self.tenancy.dev_tenant_subdomain
    }

    async fn claim_requested_subdomain(&self, requested: &str) -> Result<String, ServiceError> {
        let subdomain = requested.trim().to_lowercase();
        if !is_dns_label(&subdomain) || subdomain.len() > MAX_SUBDOMAIN_LEN {
            return Err(ServiceError::validation(
                "subdomain must be a DNS label of at most 40 characters",
            ));
        }
        if self.is_reserved(&subdomain) {
            return Err(ServiceError::validation("subdomain is reserved"));
        }
        if self
            .tenants
            .find_tenant_by_subdomain(&subdomain)
            .await?
            .is_some()
        {
            return Err(ServiceError::conflict("Subdomain already taken"));
        }
        Ok(subdomain)
    }

    async fn derive_subdomain(&self, email: &str) -> Result<String, ServiceError> {
        let mut base = subdomain_base(email);
        if self.is_reserved(&base) {
            base = format!("{}-{}", base, FALLBACK_SUBDOMAIN);
        }

        if self.tenants.find_tenant_by_subdomain(&base).await?.is_none() {
            return Ok(base);
        }
        for suffix in 2..=MAX_SUFFIX_ATTEMPTS {
            let candidate = format!("{}-{}", base, suffix);
            if self
                .tenants
                .find_tenant_by_subdomain(&candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(ServiceError::conflict("No free subdomain available"))
    }
}

/// DNS-safe label derived from the local part of an email address.
pub fn subdomain_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default().to_lowercase();
    let mut label = String::with_capacity(local.len());
    for ch in local.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            label.push(ch);
        } else if !label.is_empty() && !label.ends_with('-') {
            label.push('-');
        }
    }
    label.truncate(MAX_SUBDOMAIN_LEN - 3);
    let label = label.trim_matches('-').to_string();
    if label.is_empty() {
        FALLBACK_SUBDOMAIN.to_string()
    } else {
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_a_dns_label() {
        assert_eq!(subdomain_base("Fami.Store@example.com"), "fami-store");
        assert_eq!(subdomain_base("egdc@example.com"), "egdc");
        assert_eq!(subdomain_base("__@example.com"), FALLBACK_SUBDOMAIN);
        assert!(is_dns_label(&subdomain_base(&format!("{}@x.io", "a".repeat(90)))));
    }

    #[test]
    fn separators_collapse() {
        assert_eq!(subdomain_base("a..b__c+tag@x.io"), "a-b-c-tag");
        assert_eq!(subdomain_base("-lead-@x.io"), "lead");
    }
}
