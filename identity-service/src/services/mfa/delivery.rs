//! Out-of-band delivery of one-time codes.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{SmsGatewayConfig, SmtpConfig};
use crate::services::ServiceError;

#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_email_code(&self, to: &str, code: &str, ttl_minutes: i64)
        -> Result<(), ServiceError>;
    async fn send_sms_code(&self, to: &str, code: &str, ttl_minutes: i64)
        -> Result<(), ServiceError>;
}

#[derive(Clone)]
struct SmtpChannel {
    mailer: SmtpTransport,
    from_address: String,
}

#[derive(Clone)]
struct SmsChannel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Secret<String>,
}

/// SMTP for email codes, an HTTP gateway for SMS codes. Either channel may be
/// absent, in which case sends on it fail with a delivery error.
#[derive(Clone)]
pub struct GatewayCodeSender {
    smtp: Option<SmtpChannel>,
    sms: Option<SmsChannel>,
}

impl GatewayCodeSender {
    pub fn new(
        smtp: Option<&SmtpConfig>,
        sms: Option<&SmsGatewayConfig>,
    ) -> Result<Self, anyhow::Error> {
        let smtp = match smtp {
            Some(config) => {
                let creds = Credentials::new(
                    config.username.clone(),
                    config.password.expose_secret().clone(),
                );
                let mailer = SmtpTransport::relay(&config.host)?
                    .credentials(creds)
                    .port(config.port)
                    .timeout(Some(Duration::from_secs(10)))
                    .build();
                tracing::info!(host = %config.host, "SMTP code delivery configured");
                Some(SmtpChannel {
                    mailer,
                    from_address: config.from_address.clone(),
                })
            }
            None => None,
        };

        let sms = match sms {
            Some(config) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()?;
                tracing::info!(endpoint = %config.endpoint, "SMS gateway configured");
                Some(SmsChannel {
                    client,
                    endpoint: config.endpoint.clone(),
                    api_key: config.api_key.clone(),
                })
            }
            None => None,
        };

        Ok(Self { smtp, sms })
    }
}

#[async_trait]
impl CodeSender for GatewayCodeSender {
    async fn send_email_code(
        &self,
        to: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> Result<(), ServiceError> {
        let channel = self
            .smtp
            .as_ref()
            .ok_or_else(|| ServiceError::Delivery("email delivery is not configured".to_string()))?;

        let from = channel
            .from_address
            .parse()
            .map_err(|e: lettre::address::AddressError| ServiceError::Delivery(e.to_string()))?;
        let recipient = to
            .parse()
            .map_err(|e: lettre::address::AddressError| ServiceError::Delivery(e.to_string()))?;

        let email = Message::builder()
            .from(from)
            .to(recipient)
            .subject("Your verification code")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Your verification code is {}.\n\nIt expires in {} minutes. If you did not request it, you can ignore this message.",
                code, ttl_minutes
            ))
            .map_err(|e| ServiceError::Delivery(e.to_string()))?;

        // SmtpTransport is blocking.
        let mailer = channel.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!("Email verification code sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email verification code");
                Err(ServiceError::Delivery(e.to_string()))
            }
        }
    }

    async fn send_sms_code(&self, to: &str, code: &str, ttl_minutes: i64) -> Result<(), ServiceError> {
        let channel = self
            .sms
            .as_ref()
            .ok_or_else(|| ServiceError::Delivery("SMS delivery is not configured".to_string()))?;

        let response = channel
            .client
            .post(&channel.endpoint)
            .bearer_auth(channel.api_key.expose_secret())
            .json(&json!({
                "to": to,
                "message": format!("Your verification code is {}. It expires in {} minutes.", code, ttl_minutes),
            }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "SMS gateway request failed");
                ServiceError::Delivery(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "SMS gateway rejected message");
            return Err(ServiceError::Delivery(format!(
                "SMS gateway returned {}",
                response.status()
            )));
        }

        tracing::info!("SMS verification code sent");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Debug, Clone)]
pub struct SentCode {
    pub channel: Channel,
    pub to: String,
    pub code: String,
}

/// Keeps codes in memory instead of sending them.
#[derive(Default)]
pub struct MockCodeSender {
    sent: Mutex<Vec<SentCode>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MockCodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentCode> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recent code sent to `to`.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|s| s.to == to)
            .map(|s| s.code)
    }

    fn record(&self, channel: Channel, to: &str, code: &str) -> Result<(), ServiceError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ServiceError::Delivery("mock delivery failure".to_string()));
        }
        tracing::debug!(channel = ?channel, "Verification code captured by mock sender");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentCode {
                channel,
                to: to.to_string(),
                code: code.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CodeSender for MockCodeSender {
    async fn send_email_code(&self, to: &str, code: &str, _ttl_minutes: i64) -> Result<(), ServiceError> {
        self.record(Channel::Email, to, code)
    }

    async fn send_sms_code(&self, to: &str, code: &str, _ttl_minutes: i64) -> Result<(), ServiceError> {
        self.record(Channel::Sms, to, code)
    }
}
