//! Audit event model - append-only security and compliance trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit categories, each with its own retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    System,
    Authentication,
    Authorization,
    UserManagement,
    RoleManagement,
    DataAccess,
    Configuration,
    Security,
    SecurityIncident,
    Privacy,
    Compliance,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 11] = [
        AuditCategory::System,
        AuditCategory::Authentication,
        AuditCategory::Authorization,
        AuditCategory::UserManagement,
        AuditCategory::RoleManagement,
        AuditCategory::DataAccess,
        AuditCategory::Configuration,
        AuditCategory::Security,
        AuditCategory::SecurityIncident,
        AuditCategory::Privacy,
        AuditCategory::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::System => "system",
            AuditCategory::Authentication => "authentication",
            AuditCategory::Authorization => "authorization",
            AuditCategory::UserManagement => "user_management",
            AuditCategory::RoleManagement => "role_management",
            AuditCategory::DataAccess => "data_access",
            AuditCategory::Configuration => "configuration",
            AuditCategory::Security => "security",
            AuditCategory::SecurityIncident => "security_incident",
            AuditCategory::Privacy => "privacy",
            AuditCategory::Compliance => "compliance",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == code)
    }
}

/// Risk level attached to every event. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

/// Audit event types emitted by the identity core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSucceeded,
    LoginFailed,
    TenantCreated,
    UserProvisioned,
    TokenRotated,
    TokenRotationFailed,
    TokenReuseDetected,
    AccessTokenRejected,
    SessionRevoked,
    AllSessionsRevoked,
    TenantResolutionFailed,
    CrossTenantAccess,
    MfaEnrollmentStarted,
    MfaDeviceVerified,
    MfaVerificationFailed,
    MfaChallengeSent,
    MfaLoginSucceeded,
    MfaLoginFailed,
    MfaDeviceDisabled,
    BackupCodeUsed,
    BackupCodesRegenerated,
    PermissionGranted,
    PermissionDenied,
    StepUpRequired,
    RoleCreated,
    RoleDeactivated,
    RoleAssigned,
    RoleRevoked,
    AuditTrailViewed,
    AlertResolved,
    PrivacyRequest,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSucceeded => "login_succeeded",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::TenantCreated => "tenant_created",
            AuditEventType::UserProvisioned => "user_provisioned",
            AuditEventType::TokenRotated => "token_rotated",
            AuditEventType::TokenRotationFailed => "token_rotation_failed",
            AuditEventType::TokenReuseDetected => "token_reuse_detected",
            AuditEventType::AccessTokenRejected => "access_token_rejected",
            AuditEventType::SessionRevoked => "session_revoked",
            AuditEventType::AllSessionsRevoked => "all_sessions_revoked",
            AuditEventType::TenantResolutionFailed => "tenant_resolution_failed",
            AuditEventType::CrossTenantAccess => "cross_tenant_access",
            AuditEventType::MfaEnrollmentStarted => "mfa_enrollment_started",
            AuditEventType::MfaDeviceVerified => "mfa_device_verified",
            AuditEventType::MfaVerificationFailed => "mfa_verification_failed",
            AuditEventType::MfaChallengeSent => "mfa_challenge_sent",
            AuditEventType::MfaLoginSucceeded => "mfa_login_succeeded",
            AuditEventType::MfaLoginFailed => "mfa_login_failed",
            AuditEventType::MfaDeviceDisabled => "mfa_device_disabled",
            AuditEventType::BackupCodeUsed => "backup_code_used",
            AuditEventType::BackupCodesRegenerated => "backup_codes_regenerated",
            AuditEventType::PermissionGranted => "permission_granted",
            AuditEventType::PermissionDenied => "permission_denied",
            AuditEventType::RoleCreated => "role_created",
            AuditEventType::RoleDeactivated => "role_deactivated",
            AuditEventType::RoleAssigned => "role_assigned",
            AuditEventType::RoleRevoked => "role_revoked",
            AuditEventType::AuditTrailViewed => "audit_trail_viewed",
            AuditEventType::AlertResolved => "alert_resolved",
            AuditEventType::PrivacyRequest => "privacy_request",
            AuditEventType::StepUpRequired => "step_up_required",
        }
    }

    /// Event types that record a failed authentication attempt.
    pub fn is_failed_auth(&self) -> bool {
        matches!(
            self,
            AuditEventType::LoginFailed
                | AuditEventType::TokenRotationFailed
                | AuditEventType::TokenReuseDetected
                | AuditEventType::AccessTokenRejected
                | AuditEventType::MfaVerificationFailed
                | AuditEventType::MfaLoginFailed
        )
    }
}

/// Persisted audit event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub category_code: String,
    pub risk_code: String,
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub resource: Option<String>,
    pub action: String,
    pub details: serde_json::Value,
    pub compliance_tags: Vec<String>,
    pub correlation_id: Option<String>,
    pub occurred_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn category(&self) -> Option<AuditCategory> {
        AuditCategory::parse(&self.category_code)
    }

    pub fn risk(&self) -> Option<RiskLevel> {
        RiskLevel::parse(&self.risk_code)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.compliance_tags.iter().any(|t| t == tag)
    }
}

/// Filter for audit searches. All fields are optional and combined with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub category: Option<AuditCategory>,
    pub risk: Option<RiskLevel>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id.map_or(true, |id| event.user_id == Some(id))
            && self.tenant_id.map_or(true, |id| event.tenant_id == Some(id))
            && self
                .category
                .map_or(true, |c| event.category_code == c.as_str())
            && self.risk.map_or(true, |r| event.risk_code == r.as_str())
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
            && self.from.map_or(true, |from| event.occurred_utc >= from)
            && self.to.map_or(true, |to| event.occurred_utc <= to)
            && self
                .ip_address
                .as_deref()
                .map_or(true, |ip| event.ip_address.as_deref() == Some(ip))
    }
}

/// Aggregate counts over a report window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub critical: usize,
    pub high_risk: usize,
    pub failed_logins: usize,
    pub data_access: usize,
    pub config_changes: usize,
}

/// Compliance report: time range, full event list, aggregate summary.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub tenant_id: Option<Uuid>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub generated_utc: DateTime<Utc>,
    pub summary: ReportSummary,
    pub events: Vec<AuditEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_round_trip() {
        for category in AuditCategory::ALL {
            assert_eq!(AuditCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }

    #[test]
    fn filter_limit_is_clamped() {
        let filter = AuditFilter {
            limit: Some(100_000),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), AuditFilter::MAX_LIMIT);
        assert_eq!(AuditFilter::default().effective_limit(), 50);
    }
}
