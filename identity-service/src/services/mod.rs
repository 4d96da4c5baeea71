//! Services layer for the identity core.
//!
//! Tenant resolution, sessions, MFA, RBAC and auditing, each constructed
//! from injected storage handles.

pub mod audit;
pub mod blacklist;
mod database;
pub mod error;
pub mod identity;
mod jwt;
pub mod memory;
pub mod metrics;
pub mod mfa;
pub mod rbac;
pub mod redis;
pub mod session;
pub mod store;
pub mod tenant_resolver;

pub use audit::{AuditContext, AuditLogger, AuditRecord};
pub use blacklist::{InMemoryBlacklist, TokenBlacklist};
pub use database::Database;
pub use error::ServiceError;
pub use identity::{FederatedIdentity, IdentityService, SignInOutcome};
pub use jwt::{AccessTokenClaims, JwtService};
pub use memory::MemoryStore;
pub use mfa::MfaManager;
pub use rbac::{PermissionDecision, PermissionRequest, RbacEngine};
pub use redis::RedisService;
pub use session::{ElevatedAccess, SessionManager, TokenPair};
pub use store::IdentityStore;
pub use tenant_resolver::{TenantResolution, TenantResolver};
