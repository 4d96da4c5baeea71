//! Maps an inbound request's host (or first path segment) to a tenant.
//!
//! Matching is exact on the stored subdomain. There is no default tenant
//! outside development, and no prefix or substring matching.

use std::sync::Arc;

use super::store::TenantDirectory;
use super::ServiceError;
use crate::config::TenancyConfig;
use crate::models::{Tenant, TenantStatus};
use crate::utils::validation::is_dns_label;

/// Where the candidate subdomain was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    DevAlias(String),
    Host(String),
    Path(String),
    Malformed(String),
    Missing,
}

/// Outcome of resolution. Everything but `Resolved` is a deny.
#[derive(Debug, Clone)]
pub enum TenantResolution {
    Resolved(Tenant),
    NotFound(String),
    Malformed(String),
    Inactive(Tenant, Option<TenantStatus>),
    Missing,
}

impl TenantResolution {
    pub fn tenant(&self) -> Option<&Tenant> {
        match self {
            TenantResolution::Resolved(t) => Some(t),
            _ => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            TenantResolution::Resolved(_) => "resolved",
            TenantResolution::NotFound(_) => "not_found",
            TenantResolution::Malformed(_) => "malformed",
            TenantResolution::Inactive(_, _) => "inactive",
            TenantResolution::Missing => "missing",
        }
    }

    /// Converts a deny outcome into the matching error.
    pub fn into_tenant(self) -> Result<Tenant, ServiceError> {
        match self {
            TenantResolution::Resolved(t) => Ok(t),
            TenantResolution::Malformed(raw) => Err(ServiceError::validation(format!(
                "Malformed tenant reference '{}'",
                raw
            ))),
            TenantResolution::NotFound(candidate) => Err(ServiceError::TenantNotResolved(
                format!("unknown subdomain '{}'", candidate),
            )),
            TenantResolution::Inactive(t, status) => {
                Err(ServiceError::TenantNotResolved(format!(
                    "tenant '{}' is {}",
                    t.subdomain,
                    status.map(|s| s.as_str()).unwrap_or("in an unknown state")
                )))
            }
            TenantResolution::Missing => Err(ServiceError::TenantNotResolved(
                "no tenant reference in request".to_string(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    config: TenancyConfig,
    dev_mode: bool,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, config: TenancyConfig, dev_mode: bool) -> Self {
        Self {
            directory,
            config,
            dev_mode,
        }
    }

    /// Resolves the tenant for a request. Storage failures propagate so the
    /// caller can fail closed.
    pub async fn resolve(
        &self,
        host: Option<&str>,
        path: &str,
    ) -> Result<TenantResolution, ServiceError> {
        let candidate = extract_candidate(host, path, &self.config, self.dev_mode);

        let subdomain = match candidate {
            Candidate::DevAlias(s) | Candidate::Host(s) | Candidate::Path(s) => s,
            Candidate::Malformed(raw) => return Ok(TenantResolution::Malformed(raw)),
            Candidate::Missing => return Ok(TenantResolution::Missing),
        };

        let resolution = match self.directory.find_tenant_by_subdomain(&subdomain).await? {
            Some(tenant) if tenant.is_active() => TenantResolution::Resolved(tenant),
            Some(tenant) => {
                let status = tenant.status();
                TenantResolution::Inactive(tenant, status)
            }
            None => TenantResolution::NotFound(subdomain),
        };

        tracing::debug!(outcome = resolution.outcome(), "Tenant resolution");
        Ok(resolution)
    }
}

/// Lowercases, trims, drops a trailing dot and any port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally followed by `:port`.
        rest.split(']').next().unwrap_or_default().to_string()
    } else if host.matches(':').count() == 1 {
        host.split(':').next().unwrap_or_default().to_string()
    } else {
        host
    };
    without_port.trim_end_matches('.').to_string()
}

/// Pure candidate extraction; no storage access.
pub fn extract_candidate(
    host: Option<&str>,
    path: &str,
    config: &TenancyConfig,
    dev_mode: bool,
) -> Candidate {
    if let Some(raw_host) = host {
        let host = normalize_host(raw_host);

        if dev_mode && config.dev_aliases.iter().any(|alias| alias == &host) {
            return Candidate::DevAlias(config.dev_tenant_subdomain.clone());
        }

        let suffix = format!(".{}", config.base_domain);
        if let Some(prefix) = host.strip_suffix(&suffix) {
            if prefix.contains('.') || !is_dns_label(prefix) {
                return Candidate::Malformed(prefix.to_string());
            }
            if !config.is_reserved(prefix) {
                return Candidate::Host(prefix.to_string());
            }
        }
    }

    // A route name in first position means the request is not path-addressed.
    match path.split('/').find(|segment| !segment.is_empty()) {
        Some(segment) => {
            let segment = segment.to_lowercase();
            if config.is_reserved(&segment) {
                Candidate::Missing
            } else if is_dns_label(&segment) {
                Candidate::Path(segment)
            } else {
                Candidate::Malformed(segment)
            }
        }
        None => Candidate::Missing,
    }
}
