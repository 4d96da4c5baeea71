//! Compliance tagging and per-category retention.

use chrono::{DateTime, Duration, Utc};

use crate::models::{AuditCategory, AuditEventType, RiskLevel};

pub const TAG_GDPR: &str = "gdpr_relevant";
pub const TAG_SOC2: &str = "soc2_relevant";
pub const TAG_HIGH_RISK: &str = "high_risk";
pub const TAG_FAILED_AUTH: &str = "failed_auth";

/// Tags derived at write time so reports never re-derive them.
pub fn compliance_tags(
    category: AuditCategory,
    risk: RiskLevel,
    event_type: AuditEventType,
) -> Vec<String> {
    let mut tags = Vec::new();

    if matches!(
        category,
        AuditCategory::Privacy
            | AuditCategory::UserManagement
            | AuditCategory::DataAccess
            | AuditCategory::Compliance
    ) {
        tags.push(TAG_GDPR.to_string());
    }

    if matches!(
        category,
        AuditCategory::Authentication
            | AuditCategory::Authorization
            | AuditCategory::RoleManagement
            | AuditCategory::Configuration
            | AuditCategory::Security
            | AuditCategory::SecurityIncident
    ) {
        tags.push(TAG_SOC2.to_string());
    }

    if risk >= RiskLevel::High {
        tags.push(TAG_HIGH_RISK.to_string());
    }

    if event_type.is_failed_auth() {
        tags.push(TAG_FAILED_AUTH.to_string());
    }

    tags
}

pub fn retention_days(category: AuditCategory) -> i64 {
    match category {
        AuditCategory::System => 30,
        AuditCategory::DataAccess => 90,
        AuditCategory::Authentication
        | AuditCategory::Authorization
        | AuditCategory::UserManagement
        | AuditCategory::RoleManagement
        | AuditCategory::Configuration
        | AuditCategory::Security => 365,
        AuditCategory::SecurityIncident | AuditCategory::Privacy | AuditCategory::Compliance => {
            2555
        }
    }
}

/// Events of `category` that occurred before the returned instant are purgeable.
pub fn retention_cutoff(category: AuditCategory, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(retention_days(category))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_login_is_soc2_high_risk_failed_auth() {
        let tags = compliance_tags(
            AuditCategory::Authentication,
            RiskLevel::High,
            AuditEventType::LoginFailed,
        );
        assert_eq!(tags, vec![TAG_SOC2, TAG_HIGH_RISK, TAG_FAILED_AUTH]);
    }

    #[test]
    fn privacy_requests_are_gdpr_relevant() {
        let tags = compliance_tags(
            AuditCategory::Privacy,
            RiskLevel::Medium,
            AuditEventType::PrivacyRequest,
        );
        assert_eq!(tags, vec![TAG_GDPR]);
    }

    #[test]
    fn retention_windows_span_thirty_days_to_seven_years() {
        assert_eq!(retention_days(AuditCategory::System), 30);
        assert_eq!(retention_days(AuditCategory::DataAccess), 90);
        assert_eq!(retention_days(AuditCategory::Authentication), 365);
        assert_eq!(retention_days(AuditCategory::SecurityIncident), 2555);
        assert!(AuditCategory::ALL
            .iter()
            .all(|c| (30..=2555).contains(&retention_days(*c))));
    }
}
