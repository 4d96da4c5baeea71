//! RFC 6238 time-based one-time codes (HMAC-SHA1).

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::MfaConfig;
use crate::utils::{base32, token::constant_time_eq};

type HmacSha1 = Hmac<Sha1>;

pub const SECRET_BYTES: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct TotpParams {
    pub digits: u32,
    pub period_seconds: u64,
    pub skew_steps: i64,
}

impl From<&MfaConfig> for TotpParams {
    fn from(config: &MfaConfig) -> Self {
        Self {
            digits: config.totp_digits,
            period_seconds: config.totp_period_seconds,
            skew_steps: config.totp_skew_steps,
        }
    }
}

/// RFC 4226 HOTP with dynamic truncation.
pub fn hotp(secret: &[u8], counter: u64, digits: u32) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let modulus = 10u32.checked_pow(digits)?;
    Some(format!(
        "{:0width$}",
        binary % modulus,
        width = digits as usize
    ))
}

pub fn time_step(unix_seconds: i64, params: &TotpParams) -> Option<u64> {
    u64::try_from(unix_seconds)
        .ok()
        .map(|t| t / params.period_seconds.max(1))
}

pub fn code_at(secret: &[u8], unix_seconds: i64, params: &TotpParams) -> Option<String> {
    hotp(secret, time_step(unix_seconds, params)?, params.digits)
}

/// Accepts codes from `skew_steps` steps either side of the current one.
pub fn verify(secret: &[u8], code: &str, unix_seconds: i64, params: &TotpParams) -> bool {
    if code.len() != params.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Some(step) = time_step(unix_seconds, params) else {
        return false;
    };

    let mut matched = false;
    for offset in -params.skew_steps..=params.skew_steps {
        let Some(counter) = step.checked_add_signed(offset) else {
            continue;
        };
        if let Some(expected) = hotp(secret, counter, params.digits) {
            // No early return: every window is evaluated.
            matched |= constant_time_eq(&expected, code);
        }
    }
    matched
}

/// `otpauth://totp/{issuer}:{account}?secret=..&issuer=..&algorithm=SHA1&digits=..&period=..`
pub fn provisioning_uri(issuer: &str, account: &str, secret: &[u8], params: &TotpParams) -> String {
    let issuer = urlencoding::encode(issuer);
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={digits}&period={period}",
        issuer = issuer,
        account = urlencoding::encode(account),
        secret = base32::encode(secret),
        digits = params.digits,
        period = params.period_seconds,
    )
}
