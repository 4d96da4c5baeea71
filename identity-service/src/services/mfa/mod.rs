//! Second factors: TOTP apps, SMS and email one-time codes, backup codes.
//!
//! Device lifecycle is `pending_verification -> enabled -> disabled`; a
//! disabled device is never re-enabled, the user enrolls a new one instead.

pub mod delivery;
pub mod totp;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

use self::delivery::CodeSender;
use self::totp::TotpParams;
use super::audit::{AuditContext, AuditLogger, AuditRecord};
use super::store::{MfaStore, UserStore};
use super::{metrics, ServiceError};
use crate::config::MfaConfig;
use crate::models::{
    AuditCategory, AuditEventType, BackupCode, CodePurpose, MfaDevice, MfaDeviceInfo, MfaMethod,
    RiskLevel, User, VerificationCode,
};
use crate::utils::base32;
use crate::utils::token::{constant_time_eq, numeric_code, random_bytes, random_salt, salted_hash};
use crate::utils::validation::validate_phone_number;

pub const BACKUP_CODE_BATCH: usize = 10;
const BACKUP_CODE_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// A device's verifier, decoded from its stored row.
#[derive(Debug, Clone)]
pub enum DeviceKind {
    Totp { secret: Vec<u8> },
    Sms { phone: String },
    Email { address: String },
}

impl DeviceKind {
    pub fn from_device(device: &MfaDevice) -> Option<Self> {
        match device.method()? {
            MfaMethod::Totp => {
                let secret = base32::decode(device.secret.as_deref()?)?;
                Some(DeviceKind::Totp { secret })
            }
            MfaMethod::Sms => Some(DeviceKind::Sms {
                phone: device.contact_target.clone()?,
            }),
            MfaMethod::Email => Some(DeviceKind::Email {
                address: device.contact_target.clone()?,
            }),
        }
    }

    pub fn method(&self) -> MfaMethod {
        match self {
            DeviceKind::Totp { .. } => MfaMethod::Totp,
            DeviceKind::Sms { .. } => MfaMethod::Sms,
            DeviceKind::Email { .. } => MfaMethod::Email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TotpEnrollment {
    pub device_id: Uuid,
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeEnrollment {
    pub device_id: Uuid,
    pub method: MfaMethod,
    pub expires_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MfaVerification {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl MfaVerification {
    fn failed() -> Self {
        Self {
            success: false,
            method: None,
        }
    }

    fn via(method: &str) -> Self {
        Self {
            success: true,
            method: Some(method.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct MfaManager {
    store: Arc<dyn MfaStore>,
    users: Arc<dyn UserStore>,
    sender: Arc<dyn CodeSender>,
    audit: AuditLogger,
    config: MfaConfig,
    pepper: Secret<String>,
}

impl MfaManager {
    pub fn new(
        store: Arc<dyn MfaStore>,
        users: Arc<dyn UserStore>,
        sender: Arc<dyn CodeSender>,
        audit: AuditLogger,
        config: MfaConfig,
        pepper: Secret<String>,
    ) -> Self {
        Self {
            store,
            users,
            sender,
            audit,
            config,
            pepper,
        }
    }

    fn params(&self) -> TotpParams {
        TotpParams::from(&self.config)
    }

    fn hash(&self, salt: &str, value: &str) -> String {
        salted_hash(self.pepper.expose_secret().as_bytes(), salt, value)
    }

    async fn active_user(&self, user_id: Uuid, tenant_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_user_by_id(user_id)
            .await?
            .filter(|u| u.tenant_id == tenant_id && u.is_active())
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    /// The device if it exists and belongs to `user_id`.
    async fn owned_device(
        &self,
        user_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<MfaDevice>, ServiceError> {
        Ok(self
            .store
            .find_device(device_id)
            .await?
            .filter(|d| d.user_id == user_id))
    }

    async fn record(
        &self,
        context: &AuditContext,
        event_type: AuditEventType,
        risk: RiskLevel,
        action: &str,
        user_id: Uuid,
        details: serde_json::Value,
    ) {
        self.audit
            .log(
                AuditRecord::new(event_type, AuditCategory::Authentication, risk, action)
                    .context(context)
                    .user(user_id)
                    .resource("mfa")
                    .details(details),
            )
            .await;
    }

    pub async fn enroll_totp(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        device_name: &str,
        context: &AuditContext,
    ) -> Result<TotpEnrollment, ServiceError> {
        let user = self.active_user(user_id, tenant_id).await?;

        let secret = random_bytes(totp::SECRET_BYTES);
        let encoded = base32::encode(&secret);
        let device = MfaDevice::new(
            user_id,
            tenant_id,
            MfaMethod::Totp,
            device_name.to_string(),
            Some(encoded.clone()),
            None,
        );
        self.store.insert_device(&device).await?;

        let backup_codes = self.issue_backup_codes(user_id, tenant_id).await?;
        let provisioning_uri =
            totp::provisioning_uri(&self.config.issuer, &user.email, &secret, &self.params());

        tracing::info!(user_id = %user_id, device_id = %device.device_id, "TOTP enrollment started");
        self.record(
            context,
            AuditEventType::MfaEnrollmentStarted,
            RiskLevel::Low,
            "enroll_totp",
            user_id,
            json!({ "device_id": device.device_id, "method": "totp" }),
        )
        .await;

        Ok(TotpEnrollment {
            device_id: device.device_id,
            secret: encoded,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Activates a pending TOTP device. Unknown, foreign or non-pending devices
    /// fail exactly like a wrong code.
    pub async fn confirm_totp(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        code: &str,
        context: &AuditContext,
    ) -> Result<bool, ServiceError> {
        self.confirm(user_id, device_id, code, MfaMethod::Totp, context)
            .await
    }

    pub async fn enroll_sms(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        phone: &str,
        device_name: &str,
        context: &AuditContext,
    ) -> Result<CodeEnrollment, ServiceError> {
        validate_phone_number(phone)
            .map_err(|_| ServiceError::validation("phone number must be in E.164 format"))?;
        self.enroll_code_device(user_id, tenant_id, MfaMethod::Sms, phone, device_name, context)
            .await
    }

    pub async fn enroll_email(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        address: &str,
        device_name: &str,
        context: &AuditContext,
    ) -> Result<CodeEnrollment, ServiceError> {
        let address = address.trim().to_lowercase();
        if !address.validate_email() {
            return Err(ServiceError::validation("invalid email address"));
        }
        self.enroll_code_device(
            user_id,
            tenant_id,
            MfaMethod::Email,
            &address,
            device_name,
            context,
        )
        .await
    }

    async fn enroll_code_device(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        method: MfaMethod,
        target: &str,
        device_name: &str,
        context: &AuditContext,
    ) -> Result<CodeEnrollment, ServiceError> {
        self.active_user(user_id, tenant_id).await?;

        let device = MfaDevice::new(
            user_id,
            tenant_id,
            method,
            device_name.to_string(),
            None,
            Some(target.to_string()),
        );
        self.store.insert_device(&device).await?;

        let kind = DeviceKind::from_device(&device)
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("device without verifier")))?;
        let expires_utc = self
            .issue_code(&device, &kind, CodePurpose::Enrollment)
            .await?;

        self.record(
            context,
            AuditEventType::MfaEnrollmentStarted,
            RiskLevel::Low,
            "enroll_code_device",
            user_id,
            json!({ "device_id": device.device_id, "method": method.as_str() }),
        )
        .await;

        Ok(CodeEnrollment {
            device_id: device.device_id,
            method,
            expires_utc,
        })
    }

    /// Activates a pending SMS or email device with the code it was sent.
    pub async fn confirm_code(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        code: &str,
        context: &AuditContext,
    ) -> Result<bool, ServiceError> {
        let method = self
            .owned_device(user_id, device_id)
            .await?
            .and_then(|d| d.method())
            .filter(|m| *m != MfaMethod::Totp);
        match method {
            Some(method) => self.confirm(user_id, device_id, code, method, context).await,
            None => {
                self.confirm_failed(user_id, device_id, context).await;
                Ok(false)
            }
        }
    }

    async fn confirm(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        code: &str,
        expected: MfaMethod,
        context: &AuditContext,
    ) -> Result<bool, ServiceError> {
        let device = self
            .owned_device(user_id, device_id)
            .await?
            .filter(|d| d.is_pending() && d.method() == Some(expected));
        let Some(device) = device else {
            self.confirm_failed(user_id, device_id, context).await;
            return Ok(false);
        };
        let Some(kind) = DeviceKind::from_device(&device) else {
            self.confirm_failed(user_id, device_id, context).await;
            return Ok(false);
        };

        let now = Utc::now();
        if self
            .verify(&device, &kind, code, CodePurpose::Enrollment, now)
            .await?
        {
            self.store.mark_device_verified(device_id, now).await?;
            tracing::info!(user_id = %user_id, device_id = %device_id, "MFA device verified");
            self.record(
                context,
                AuditEventType::MfaDeviceVerified,
                RiskLevel::Low,
                "confirm_device",
                user_id,
                json!({ "device_id": device_id, "method": kind.method().as_str() }),
            )
            .await;
            Ok(true)
        } else {
            self.store.record_device_failure(device_id).await?;
            self.confirm_failed(user_id, device_id, context).await;
            Ok(false)
        }
    }

    async fn confirm_failed(&self, user_id: Uuid, device_id: Uuid, context: &AuditContext) {
        metrics::record_decision("mfa_confirm", "deny");
        self.record(
            context,
            AuditEventType::MfaVerificationFailed,
            RiskLevel::Medium,
            "confirm_device",
            user_id,
            json!({ "device_id": device_id }),
        )
        .await;
    }

    /// Uniform verifier over device kinds.
    async fn verify(
        &self,
        device: &MfaDevice,
        kind: &DeviceKind,
        code: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let code = code.trim();
        match kind {
            DeviceKind::Totp { secret } => {
                Ok(totp::verify(secret, code, now.timestamp(), &self.params()))
            }
            DeviceKind::Sms { .. } | DeviceKind::Email { .. } => {
                let Some(stored) = self
                    .store
                    .find_open_verification_code(device.device_id, now)
                    .await?
                else {
                    return Ok(false);
                };
                if stored.purpose_code != purpose.as_str()
                    || !constant_time_eq(&self.hash(&stored.code_salt, code), &stored.code_hash)
                {
                    return Ok(false);
                }
                // Single use: a concurrent verifier that lost the race fails.
                Ok(self
                    .store
                    .consume_verification_code(stored.code_id, now)
                    .await?)
            }
        }
    }

    /// Stores a fresh code for the device (superseding older ones) and delivers it.
    async fn issue_code(
        &self,
        device: &MfaDevice,
        kind: &DeviceKind,
        purpose: CodePurpose,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let (length, ttl_seconds) = match kind {
            DeviceKind::Sms { .. } => (self.config.sms_code_length, self.config.sms_code_ttl_seconds),
            DeviceKind::Email { .. } => {
                (self.config.email_code_length, self.config.email_code_ttl_seconds)
            }
            DeviceKind::Totp { .. } => {
                return Err(ServiceError::validation("TOTP devices do not receive codes"))
            }
        };

        let code = numeric_code(length);
        let salt = random_salt();
        let record = VerificationCode::new(
            device.device_id,
            device.user_id,
            salt.clone(),
            self.hash(&salt, &code),
            purpose,
            ttl_seconds,
        );
        self.store
            .insert_verification_code(&record, Utc::now())
            .await?;

        let ttl_minutes = ttl_seconds / 60;
        match kind {
            DeviceKind::Sms { phone } => self.sender.send_sms_code(phone, &code, ttl_minutes).await?,
            DeviceKind::Email { address } => {
                self.sender
                    .send_email_code(address, &code, ttl_minutes)
                    .await?
            }
            DeviceKind::Totp { .. } => {}
        }
        Ok(record.expiry_utc)
    }

    /// Sends a login code to every enabled SMS/email device. Returns how many
    /// were delivered.
    pub async fn send_login_challenge(
        &self,
        user_id: Uuid,
        context: &AuditContext,
    ) -> Result<usize, ServiceError> {
        let devices = self.store.list_devices(user_id).await?;
        let mut attempted = 0;
        let mut delivered = 0;

        for device in devices.iter().filter(|d| d.is_enabled()) {
            let Some(kind) = DeviceKind::from_device(device) else {
                continue;
            };
            if matches!(kind, DeviceKind::Totp { .. }) {
                continue;
            }
            attempted += 1;
            match self.issue_code(device, &kind, CodePurpose::Login).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::warn!(device_id = %device.device_id, error = %e, "Failed to deliver login challenge")
                }
            }
        }

        if attempted > 0 && delivered == 0 {
            return Err(ServiceError::Delivery(
                "no challenge could be delivered".to_string(),
            ));
        }

        self.record(
            context,
            AuditEventType::MfaChallengeSent,
            RiskLevel::Low,
            "send_login_challenge",
            user_id,
            json!({ "delivered": delivered }),
        )
        .await;
        Ok(delivered)
    }

    /// Backup codes first, then every enabled device.
    pub async fn verify_login(
        &self,
        user_id: Uuid,
        code: &str,
        context: &AuditContext,
    ) -> Result<MfaVerification, ServiceError> {
        let now = Utc::now();

        match self.try_backup_code(user_id, code, now).await {
            Ok(true) => {
                let remaining = self.store.list_usable_backup_codes(user_id).await?.len();
                self.record(
                    context,
                    AuditEventType::BackupCodeUsed,
                    RiskLevel::Medium,
                    "verify_login",
                    user_id,
                    json!({ "remaining": remaining }),
                )
                .await;
                metrics::record_decision("mfa_login", "allow");
                return Ok(MfaVerification::via("backup_code"));
            }
            Ok(false) => {}
            Err(ServiceError::Conflict(reason)) => {
                tracing::warn!(user_id = %user_id, reason = %reason, "Backup code raced");
                self.login_failed(user_id, "backup_code_already_used", context)
                    .await;
                return Ok(MfaVerification::failed());
            }
            Err(e) => return Err(e),
        }

        let devices = self.store.list_devices(user_id).await?;
        let mut tried = Vec::new();
        for device in devices.iter().filter(|d| d.is_enabled()) {
            let Some(kind) = DeviceKind::from_device(device) else {
                continue;
            };
            if self
                .verify(device, &kind, code, CodePurpose::Login, now)
                .await?
            {
                self.store
                    .record_device_success(device.device_id, now)
                    .await?;
                let method = kind.method().as_str();
                self.record(
                    context,
                    AuditEventType::MfaLoginSucceeded,
                    RiskLevel::Low,
                    "verify_login",
                    user_id,
                    json!({ "device_id": device.device_id, "method": method }),
                )
                .await;
                metrics::record_decision("mfa_login", "allow");
                return Ok(MfaVerification::via(method));
            }
            tried.push(device.device_id);
        }

        for device_id in &tried {
            self.store.record_device_failure(*device_id).await?;
        }
        self.login_failed(user_id, "no_factor_matched", context)
            .await;
        Ok(MfaVerification::failed())
    }

    async fn login_failed(&self, user_id: Uuid, reason: &str, context: &AuditContext) {
        metrics::record_decision("mfa_login", "deny");
        self.record(
            context,
            AuditEventType::MfaLoginFailed,
            RiskLevel::High,
            "verify_login",
            user_id,
            json!({ "reason": reason }),
        )
        .await;
    }

    /// `Ok(false)` when no usable code matches; `Conflict` when a matching code
    /// was consumed concurrently.
    async fn try_backup_code(
        &self,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let normalized = normalize_backup_code(code);
        if normalized.len() != 9 {
            return Ok(false);
        }

        let codes = self.store.list_usable_backup_codes(user_id).await?;
        let mut matched = None;
        for candidate in &codes {
            if constant_time_eq(&self.hash(&candidate.code_salt, &normalized), &candidate.code_hash) {
                matched = Some(candidate.code_id);
            }
        }
        let Some(code_id) = matched else {
            return Ok(false);
        };

        if self.store.consume_backup_code(code_id, now).await? {
            Ok(true)
        } else {
            Err(ServiceError::conflict("Backup code already used"))
        }
    }

    /// Invalidates every unused code and returns a fresh batch in plaintext.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        context: &AuditContext,
    ) -> Result<Vec<String>, ServiceError> {
        self.active_user(user_id, tenant_id).await?;
        let codes = self.issue_backup_codes(user_id, tenant_id).await?;
        self.record(
            context,
            AuditEventType::BackupCodesRegenerated,
            RiskLevel::Medium,
            "regenerate_backup_codes",
            user_id,
            json!({ "count": codes.len() }),
        )
        .await;
        Ok(codes)
    }

    async fn issue_backup_codes(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<String>, ServiceError> {
        let batch_id = Uuid::new_v4();
        let salt = random_salt();
        let plaintext: Vec<String> = (0..BACKUP_CODE_BATCH).map(|_| generate_backup_code()).collect();
        let rows: Vec<BackupCode> = plaintext
            .iter()
            .map(|code| {
                BackupCode::new(user_id, tenant_id, batch_id, salt.clone(), self.hash(&salt, code))
            })
            .collect();

        self.store
            .replace_backup_codes(user_id, &rows, Utc::now())
            .await?;
        Ok(plaintext)
    }

    pub async fn disable_device(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        context: &AuditContext,
    ) -> Result<(), ServiceError> {
        self.owned_device(user_id, device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Device not found".to_string()))?;

        if !self.store.disable_device(device_id).await? {
            return Err(ServiceError::conflict("Device already disabled"));
        }

        self.record(
            context,
            AuditEventType::MfaDeviceDisabled,
            RiskLevel::Medium,
            "disable_device",
            user_id,
            json!({ "device_id": device_id }),
        )
        .await;
        Ok(())
    }

    /// Whether the user has at least one enabled second factor.
    pub async fn has_enabled_factor(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .store
            .list_devices(user_id)
            .await?
            .iter()
            .any(|d| d.is_enabled()))
    }

    pub async fn list_devices(&self, user_id: Uuid) -> Result<Vec<MfaDeviceInfo>, ServiceError> {
        Ok(self
            .store
            .list_devices(user_id)
            .await?
            .iter()
            .map(MfaDeviceInfo::from)
            .collect())
    }
}

/// `xxxx-xxxx` over an alphabet without look-alike characters.
pub fn generate_backup_code() -> String {
    let mut rng = OsRng;
    let mut pick = || BACKUP_CODE_ALPHABET[rng.gen_range(0..BACKUP_CODE_ALPHABET.len())] as char;
    let first: String = (0..4).map(|_| pick()).collect();
    let second: String = (0..4).map(|_| pick()).collect();
    format!("{}-{}", first, second)
}

/// Lowercases, strips whitespace and restores the dash users tend to omit.
pub fn normalize_backup_code(input: &str) -> String {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    if compact.len() == 8 && compact.is_ascii() {
        format!("{}-{}", &compact[..4], &compact[4..])
    } else {
        compact
    }
}
