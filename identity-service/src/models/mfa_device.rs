//! MFA device model - one enrolled second factor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Second-factor method of a device. Backup codes are tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaMethod {
    Totp,
    Sms,
    Email,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::Totp => "totp",
            MfaMethod::Sms => "sms",
            MfaMethod::Email => "email",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "totp" => Some(MfaMethod::Totp),
            "sms" => Some(MfaMethod::Sms),
            "email" => Some(MfaMethod::Email),
            _ => None,
        }
    }
}

/// Device lifecycle: `pending_verification -> enabled -> disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    PendingVerification,
    Enabled,
    Disabled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::PendingVerification => "pending_verification",
            DeviceStatus::Enabled => "enabled",
            DeviceStatus::Disabled => "disabled",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "pending_verification" => Some(DeviceStatus::PendingVerification),
            "enabled" => Some(DeviceStatus::Enabled),
            "disabled" => Some(DeviceStatus::Disabled),
            _ => None,
        }
    }
}

/// MFA device entity. `secret` holds the base32 TOTP seed; `contact_target`
/// the phone number or address for out-of-band codes.
#[derive(Debug, Clone, FromRow)]
pub struct MfaDevice {
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub method_code: String,
    pub device_name: String,
    pub secret: Option<String>,
    pub contact_target: Option<String>,
    pub device_status_code: String,
    pub failed_attempts: i32,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub verified_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl MfaDevice {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        method: MfaMethod,
        device_name: String,
        secret: Option<String>,
        contact_target: Option<String>,
    ) -> Self {
        Self {
            device_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            method_code: method.as_str().to_string(),
            device_name,
            secret,
            contact_target,
            device_status_code: DeviceStatus::PendingVerification.as_str().to_string(),
            failed_attempts: 0,
            last_used_utc: None,
            verified_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn method(&self) -> Option<MfaMethod> {
        MfaMethod::parse(&self.method_code)
    }

    pub fn status(&self) -> Option<DeviceStatus> {
        DeviceStatus::parse(&self.device_status_code)
    }

    pub fn is_enabled(&self) -> bool {
        self.status() == Some(DeviceStatus::Enabled)
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Some(DeviceStatus::PendingVerification)
    }
}

/// Device listing entry; never carries the secret.
#[derive(Debug, Clone, Serialize)]
pub struct MfaDeviceInfo {
    pub device_id: Uuid,
    pub method: String,
    pub device_name: String,
    pub contact_hint: Option<String>,
    pub status: String,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<&MfaDevice> for MfaDeviceInfo {
    fn from(d: &MfaDevice) -> Self {
        Self {
            device_id: d.device_id,
            method: d.method_code.clone(),
            device_name: d.device_name.clone(),
            contact_hint: d.contact_target.as_deref().map(mask_contact),
            status: d.device_status_code.clone(),
            last_used_utc: d.last_used_utc,
            created_utc: d.created_utc,
        }
    }
}

/// Keeps the last few characters of a phone number or the domain of an address.
fn mask_contact(target: &str) -> String {
    if let Some((_, domain)) = target.split_once('@') {
        return format!("***@{}", domain);
    }
    let visible: String = target
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_targets_are_masked() {
        assert_eq!(mask_contact("+15551234567"), "***4567");
        assert_eq!(mask_contact("ops@acme.io"), "***@acme.io");
    }

    #[test]
    fn new_device_starts_pending() {
        let device = MfaDevice::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            MfaMethod::Totp,
            "phone".to_string(),
            Some("JBSWY3DPEHPK3PXP".to_string()),
            None,
        );
        assert!(device.is_pending());
        assert_eq!(device.method(), Some(MfaMethod::Totp));
    }
}
