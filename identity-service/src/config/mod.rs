use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub tokens: TokenConfig,
    pub tenancy: TenancyConfig,
    pub mfa: MfaConfig,
    pub audit: AuditConfig,
    pub rbac: RbacConfig,
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsGatewayConfig>,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout_ms: u64,
    /// Server-side `statement_timeout` applied to every connection.
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub signing_secret: Secret<String>,
    /// Server-side pepper mixed into refresh token hashes.
    pub refresh_pepper: Secret<String>,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub rotation_threshold_seconds: i64,
    pub blacklist_buffer_seconds: i64,
    pub blacklist_sweep_seconds: u64,
    pub revoke_family_on_reuse: bool,
}

/// Top-level route segments. A tenant named after one would shadow the route
/// in path addressing, so these are reserved whatever the configuration says.
pub const ROUTE_SEGMENTS: &[&str] = &[
    "auth", "authz", "audit", "health", "metrics", "mfa", "privacy", "roles",
];

#[derive(Debug, Clone)]
pub struct TenancyConfig {
    pub base_domain: String,
    pub dev_aliases: Vec<String>,
    pub dev_tenant_subdomain: String,
    pub reserved_subdomains: Vec<String>,
}

impl TenancyConfig {
    pub fn is_reserved(&self, label: &str) -> bool {
        ROUTE_SEGMENTS.contains(&label) || self.reserved_subdomains.iter().any(|r| r == label)
    }
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub issuer: String,
    pub totp_digits: u32,
    pub totp_period_seconds: u64,
    pub totp_skew_steps: i64,
    pub sms_code_length: usize,
    pub sms_code_ttl_seconds: i64,
    pub email_code_length: usize,
    pub email_code_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub flush_threshold: usize,
    pub flush_interval_ms: u64,
    pub max_buffered_events: usize,
    pub purge_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RbacConfig {
    pub cache_ttl_seconds: u64,
    pub decision_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    pub endpoint: String,
    pub api_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub session_cookie_name: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub mfa_verify_attempts: u32,
    pub mfa_verify_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "20", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "2", is_prod)?,
                acquire_timeout_ms: parse_env("DATABASE_ACQUIRE_TIMEOUT_MS", "2000", is_prod)?,
                statement_timeout_ms: parse_env("DATABASE_STATEMENT_TIMEOUT_MS", "5000", is_prod)?,
            },
            redis: env::var("REDIS_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|url| RedisConfig { url }),
            tokens: TokenConfig {
                signing_secret: Secret::new(get_env(
                    "TOKEN_SIGNING_SECRET",
                    Some("dev-only-signing-secret-change-me-0123456789"),
                    is_prod,
                )?),
                refresh_pepper: Secret::new(get_env(
                    "REFRESH_TOKEN_PEPPER",
                    Some("dev-only-refresh-pepper"),
                    is_prod,
                )?),
                access_token_ttl_minutes: parse_env("ACCESS_TOKEN_TTL_MINUTES", "15", is_prod)?,
                refresh_token_ttl_days: parse_env("REFRESH_TOKEN_TTL_DAYS", "7", is_prod)?,
                rotation_threshold_seconds: parse_env(
                    "TOKEN_ROTATION_THRESHOLD_SECONDS",
                    "300",
                    is_prod,
                )?,
                blacklist_buffer_seconds: parse_env("BLACKLIST_BUFFER_SECONDS", "60", is_prod)?,
                blacklist_sweep_seconds: parse_env("BLACKLIST_SWEEP_SECONDS", "60", is_prod)?,
                revoke_family_on_reuse: parse_env("REVOKE_FAMILY_ON_REUSE", "true", is_prod)?,
            },
            tenancy: TenancyConfig {
                base_domain: get_env("TENANT_BASE_DOMAIN", Some("localhost.test"), is_prod)?
                    .trim()
                    .to_lowercase(),
                dev_aliases: split_list(&get_env(
                    "TENANT_DEV_ALIASES",
                    Some("localhost,127.0.0.1,0.0.0.0"),
                    is_prod,
                )?),
                dev_tenant_subdomain: get_env("TENANT_DEV_SUBDOMAIN", Some("dev"), is_prod)?,
                reserved_subdomains: split_list(&get_env(
                    "TENANT_RESERVED_SUBDOMAINS",
                    Some("www,api,app,admin,auth,static"),
                    is_prod,
                )?),
            },
            mfa: MfaConfig {
                issuer: get_env("MFA_ISSUER", Some("Inventory Cloud"), is_prod)?,
                totp_digits: parse_env("MFA_TOTP_DIGITS", "6", is_prod)?,
                totp_period_seconds: parse_env("MFA_TOTP_PERIOD_SECONDS", "30", is_prod)?,
                totp_skew_steps: parse_env("MFA_TOTP_SKEW_STEPS", "1", is_prod)?,
                sms_code_length: parse_env("MFA_SMS_CODE_LENGTH", "6", is_prod)?,
                sms_code_ttl_seconds: parse_env("MFA_SMS_CODE_TTL_SECONDS", "300", is_prod)?,
                email_code_length: parse_env("MFA_EMAIL_CODE_LENGTH", "8", is_prod)?,
                email_code_ttl_seconds: parse_env("MFA_EMAIL_CODE_TTL_SECONDS", "600", is_prod)?,
            },
            audit: AuditConfig {
                flush_threshold: parse_env("AUDIT_FLUSH_THRESHOLD", "100", is_prod)?,
                flush_interval_ms: parse_env("AUDIT_FLUSH_INTERVAL_MS", "5000", is_prod)?,
                max_buffered_events: parse_env("AUDIT_MAX_BUFFERED_EVENTS", "10000", is_prod)?,
                purge_interval_seconds: parse_env("AUDIT_PURGE_INTERVAL_SECONDS", "86400", is_prod)?,
            },
            rbac: RbacConfig {
                cache_ttl_seconds: parse_env("RBAC_CACHE_TTL_SECONDS", "300", is_prod)?,
                decision_timeout_ms: parse_env("RBAC_DECISION_TIMEOUT_MS", "2500", is_prod)?,
            },
            smtp: match env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()) {
                Some(host) => Some(SmtpConfig {
                    host,
                    port: parse_env("SMTP_PORT", "587", is_prod)?,
                    username: get_env("SMTP_USERNAME", None, is_prod)?,
                    password: Secret::new(get_env("SMTP_PASSWORD", None, is_prod)?),
                    from_address: get_env("SMTP_FROM_ADDRESS", None, is_prod)?,
                }),
                None => None,
            },
            sms: match env::var("SMS_GATEWAY_URL").ok().filter(|s| !s.is_empty()) {
                Some(endpoint) => Some(SmsGatewayConfig {
                    endpoint,
                    api_key: Secret::new(get_env("SMS_GATEWAY_API_KEY", None, is_prod)?),
                }),
                None => None,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
                session_cookie_name: get_env("SESSION_COOKIE_NAME", Some("session"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                mfa_verify_attempts: parse_env("RATE_LIMIT_MFA_VERIFY_ATTEMPTS", "10", is_prod)?,
                mfa_verify_window_seconds: parse_env(
                    "RATE_LIMIT_MFA_VERIFY_WINDOW_SECONDS",
                    "300",
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "300", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.tokens.access_token_ttl_minutes <= 0 {
            return Err(config_error("ACCESS_TOKEN_TTL_MINUTES must be positive"));
        }

        if self.tokens.refresh_token_ttl_days <= 0 {
            return Err(config_error("REFRESH_TOKEN_TTL_DAYS must be positive"));
        }

        if self.tokens.rotation_threshold_seconds < 0
            || self.tokens.rotation_threshold_seconds >= self.tokens.access_token_ttl_minutes * 60
        {
            return Err(config_error(
                "TOKEN_ROTATION_THRESHOLD_SECONDS must be shorter than the access token lifetime",
            ));
        }

        if self.tenancy.base_domain.is_empty() || !self.tenancy.base_domain.contains('.') {
            return Err(config_error(
                "TENANT_BASE_DOMAIN must be a dotted domain name",
            ));
        }

        if !(6..=8).contains(&self.mfa.totp_digits) {
            return Err(config_error("MFA_TOTP_DIGITS must be between 6 and 8"));
        }

        if !(6..=8).contains(&self.mfa.sms_code_length)
            || !(6..=8).contains(&self.mfa.email_code_length)
        {
            return Err(config_error("MFA code lengths must be between 6 and 8"));
        }

        if self.audit.flush_threshold == 0
            || self.audit.max_buffered_events < self.audit.flush_threshold
        {
            return Err(config_error(
                "AUDIT_MAX_BUFFERED_EVENTS must be at least AUDIT_FLUSH_THRESHOLD",
            ));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error(
                    "Wildcard CORS origin not allowed in production",
                ));
            }

            if self.tokens.signing_secret.expose_secret().len() < 32 {
                return Err(config_error(
                    "TOKEN_SIGNING_SECRET must be at least 32 bytes in production",
                ));
            }

            if self.redis.is_none() {
                tracing::warn!(
                    "REDIS_URL not set: token blacklist is process-local and will not be shared across instances"
                );
            }
        }

        Ok(())
    }

    pub fn is_dev(&self) -> bool {
        self.environment == Environment::Dev
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    // Tunables keep their documented defaults even in production.
    let raw = match env::var(key) {
        Ok(val) => val,
        Err(_) if is_prod => default.to_string(),
        Err(_) => get_env(key, Some(default), false)?,
    };
    raw.trim().parse::<T>().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!(format!("{} is invalid: {}", key, e)))
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl IdentityConfig {
    /// Configuration used by tests and local tooling; never read from the environment.
    pub fn for_tests() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "error".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/identity_test".to_string(),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout_ms: 2000,
                statement_timeout_ms: 5000,
            },
            redis: None,
            tokens: TokenConfig {
                signing_secret: Secret::new("test-signing-secret-with-enough-entropy-000".to_string()),
                refresh_pepper: Secret::new("test-pepper".to_string()),
                access_token_ttl_minutes: 15,
                refresh_token_ttl_days: 7,
                rotation_threshold_seconds: 300,
                blacklist_buffer_seconds: 60,
                blacklist_sweep_seconds: 60,
                revoke_family_on_reuse: true,
            },
            tenancy: TenancyConfig {
                base_domain: "example.com".to_string(),
                dev_aliases: vec!["localhost".to_string(), "127.0.0.1".to_string()],
                dev_tenant_subdomain: "dev".to_string(),
                reserved_subdomains: vec!["www".to_string(), "api".to_string()],
            },
            mfa: MfaConfig {
                issuer: "Inventory Cloud".to_string(),
                totp_digits: 6,
                totp_period_seconds: 30,
                totp_skew_steps: 1,
                sms_code_length: 6,
                sms_code_ttl_seconds: 300,
                email_code_length: 8,
                email_code_ttl_seconds: 600,
            },
            audit: AuditConfig {
                flush_threshold: 100,
                flush_interval_ms: 5000,
                max_buffered_events: 10_000,
                purge_interval_seconds: 86_400,
            },
            rbac: RbacConfig {
                cache_ttl_seconds: 300,
                decision_timeout_ms: 2500,
            },
            smtp: None,
            sms: None,
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                session_cookie_name: "session".to_string(),
            },
            rate_limit: RateLimitConfig {
                mfa_verify_attempts: 1000,
                mfa_verify_window_seconds: 60,
                global_ip_limit: 10_000,
                global_ip_window_seconds: 60,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        assert!(IdentityConfig::for_tests().validate().is_ok());
    }

    #[test]
    fn rotation_threshold_must_fit_inside_access_ttl() {
        let mut config = IdentityConfig::for_tests();
        config.tokens.rotation_threshold_seconds = 15 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn prod_rejects_short_signing_secret() {
        let mut config = IdentityConfig::for_tests();
        config.environment = Environment::Prod;
        config.tokens.signing_secret = Secret::new("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn lists_are_trimmed_and_lowercased() {
        assert_eq!(
            split_list(" WWW, api ,,Admin"),
            vec!["www".to_string(), "api".to_string(), "admin".to_string()]
        );
    }
}
