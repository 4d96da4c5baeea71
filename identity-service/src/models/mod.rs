pub mod audit_event;
pub mod backup_code;
pub mod mfa_device;
pub mod permission;
pub mod refresh_session;
pub mod role;
pub mod role_assignment;
pub mod security_alert;
pub mod tenant;
pub mod user;
pub mod verification_code;

pub use audit_event::{
    AuditCategory, AuditEvent, AuditEventType, AuditFilter, AuditReport, ReportSummary, RiskLevel,
};
pub use backup_code::BackupCode;
pub use mfa_device::{DeviceStatus, MfaDevice, MfaDeviceInfo, MfaMethod};
pub use permission::{ContextScope, Permission, PermissionSpec};
pub use refresh_session::{DeviceMeta, RefreshSession, RevocationReason, SessionInfo};
pub use role::{Role, RoleWithPermissions};
pub use role_assignment::{AssignedRole, RoleAssignment, TeamMembership};
pub use security_alert::SecurityAlert;
pub use tenant::{Tenant, TenantResponse, TenantStatus};
pub use user::{SanitizedUser, User, UserStatus};
pub use verification_code::{CodePurpose, VerificationCode};
