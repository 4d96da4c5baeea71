//! Recursive redaction of sensitive fields in audit detail payloads.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Matched anywhere in the normalized key.
const CONTAINS_TERMS: &[&str] = &[
    "password",
    "passwd",
    "passphrase",
    "secret",
    "token",
    "apikey",
    "privatekey",
    "accesskey",
    "signingkey",
    "encryptionkey",
    "cardnumber",
    "creditcard",
    "socialsecurity",
    "authorization",
    "cookie",
    "backupcode",
    "otpcode",
    "mfacode",
    "verificationcode",
];

/// Matched only as the whole normalized key; too short to match safely inside words.
const EXACT_TERMS: &[&str] = &["key", "ssn", "pin", "cvv", "cvc", "otp", "code", "iban"];

/// Lowercases and strips everything but ASCII letters and digits,
/// so `Card-Number`, `card_number` and `cardNumber` compare equal.
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    EXACT_TERMS.contains(&normalized.as_str())
        || CONTAINS_TERMS.iter().any(|term| normalized.contains(term))
}

/// Returns a copy of `value` with every sensitive field replaced by [`REDACTED`],
/// at any depth of nested objects and arrays.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let redacted = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(v)
                    };
                    (k.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}
