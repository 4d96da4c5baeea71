use service_core::error::AppError;
use thiserror::Error;

/// Domain error taxonomy for the identity core.
///
/// `Unauthenticated` and `AccessDenied` carry the internal reason for logs and
/// the audit trail; the HTTP layer never echoes it.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Storage error: {0}")]
    Storage(#[from] AppError),

    #[error("Token blacklist error: {0}")]
    Blacklist(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No tenant resolved: {0}")]
    TenantNotResolved(String),

    #[error("Code delivery failed: {0}")]
    Delivery(String),
}

impl ServiceError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        ServiceError::Unauthenticated(reason.into())
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        ServiceError::AccessDenied(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        ServiceError::Validation(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        ServiceError::Conflict(reason.into())
    }

    /// Whether the failure came from an unavailable dependency rather than the caller.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            ServiceError::Storage(e) => matches!(
                e,
                AppError::DatabaseError(_)
                    | AppError::ServiceUnavailable(_)
                    | AppError::InternalError(_)
            ),
            ServiceError::Blacklist(_) | ServiceError::Internal(_) | ServiceError::Delivery(_) => {
                true
            }
            _ => false,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Storage(e) => e,
            ServiceError::Blacklist(e) => AppError::ServiceUnavailable(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Unauthenticated(reason) => {
                AppError::Unauthenticated(anyhow::anyhow!(reason))
            }
            ServiceError::AccessDenied(reason) => AppError::Forbidden(anyhow::anyhow!(reason)),
            ServiceError::Validation(reason) => AppError::BadRequest(anyhow::anyhow!(reason)),
            ServiceError::Conflict(reason) => AppError::Conflict(anyhow::anyhow!(reason)),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!(what)),
            ServiceError::TenantNotResolved(reason) => {
                tracing::debug!(reason = %reason, "No tenant resolved");
                AppError::NotFound(anyhow::anyhow!("Tenant not found"))
            }
            ServiceError::Delivery(reason) => {
                AppError::ServiceUnavailable(anyhow::anyhow!("Code delivery failed: {}", reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_outages_count_as_infrastructure() {
        let err = ServiceError::Storage(AppError::DatabaseError(anyhow::anyhow!("timeout")));
        assert!(err.is_infrastructure());
        assert!(!ServiceError::conflict("Role already assigned").is_infrastructure());
    }

    #[test]
    fn storage_conflicts_surface_as_conflicts() {
        let err = ServiceError::Storage(AppError::Conflict(anyhow::anyhow!("duplicate")));
        assert!(!err.is_infrastructure());
        assert!(matches!(AppError::from(err), AppError::Conflict(_)));
    }
}
