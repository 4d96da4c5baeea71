use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::ErrorBody;
use validator::{Validate, ValidationError};

/// JSON body extractor that runs `validator` rules before the handler sees the value.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            let body = ErrorBody {
                error: "Invalid request body".to_string(),
                details: Some(e.body_text()),
            };
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        })?;

        value.validate().map_err(|e| {
            let body = ErrorBody {
                error: "Validation error".to_string(),
                details: Some(e.to_string()),
            };
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        })?;

        Ok(ValidatedJson(value))
    }
}

/// A single DNS label: 1-63 chars of `[a-z0-9-]`, not starting or ending with `-`.
pub fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Resource and action names: lowercase identifiers such as `inventory` or `bulk_export`.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && value.as_bytes()[0].is_ascii_lowercase()
}

pub fn validate_otp_code(code: &str) -> Result<(), ValidationError> {
    let trimmed = code.trim();
    if trimmed.is_empty() || trimmed.len() > 16 {
        return Err(ValidationError::new("code_length"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ' ')
    {
        return Err(ValidationError::new("code_charset"));
    }
    Ok(())
}

pub fn validate_phone_number(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if phone.starts_with('+') && (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("phone_e164"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_labels() {
        assert!(is_dns_label("famistore"));
        assert!(is_dns_label("shop-42"));
        assert!(!is_dns_label("-shop"));
        assert!(!is_dns_label("Shop"));
        assert!(!is_dns_label("shop.io"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("inventory"));
        assert!(is_identifier("bulk_export"));
        assert!(!is_identifier("9lives"));
        assert!(!is_identifier("drop table"));
    }

    #[test]
    fn phone_numbers_must_be_e164() {
        assert!(validate_phone_number("+15551234567").is_ok());
        assert!(validate_phone_number("5551234567").is_err());
        assert!(validate_phone_number("+1555abc4567").is_err());
    }
}
