//! HTTP handlers for the identity service.

pub mod audit;
pub mod authz;
pub mod metrics;
pub mod mfa;
pub mod roles;
pub mod session;
