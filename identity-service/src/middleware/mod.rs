pub mod guard;
pub mod metrics;
pub mod permission;

pub use guard::{access_token_from, anonymous_context, request_guard, RequestContext};
pub use metrics::metrics_middleware;
pub use permission::{require_permission, require_second_factor, RequiredPermission};
