//! Access/refresh token pairs bound to (user, tenant, device).
//!
//! Refresh tokens look like `<session id>.<64 hex>`; only a salted, peppered
//! hash is stored. Rotation retires the presented session and links it to its
//! replacement, so a second presentation of a rotated token is detectable as
//! reuse.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::audit::{AuditContext, AuditLogger, AuditRecord};
use super::blacklist::{access_key, refresh_key, session_key, TokenBlacklist};
use super::jwt::{AccessTokenClaims, JwtService};
use super::store::{SessionStore, UserStore};
use super::{metrics, ServiceError};
use crate::config::TokenConfig;
use crate::models::{
    AuditCategory, AuditEventType, DeviceMeta, RefreshSession, RevocationReason, RiskLevel,
    SessionInfo,
};
use crate::utils::token::{constant_time_eq, random_hex, random_salt, salted_hash, sha256_hex};

const REFRESH_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_utc: DateTime<Utc>,
    pub refresh_expires_utc: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Fresh access token for a session whose second factor was just verified.
#[derive(Debug, Clone, Serialize)]
pub struct ElevatedAccess {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_utc: DateTime<Utc>,
}

/// Why a rotation attempt was refused. Internal only; callers just see `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationFailure {
    Malformed,
    UnknownSession,
    HashMismatch,
    Revoked,
    Reused,
    Expired,
    UserInactive,
    LostRace,
    Unavailable,
}

impl RotationFailure {
    fn as_str(&self) -> &'static str {
        match self {
            RotationFailure::Malformed => "malformed_token",
            RotationFailure::UnknownSession => "unknown_session",
            RotationFailure::HashMismatch => "hash_mismatch",
            RotationFailure::Revoked => "session_revoked",
            RotationFailure::Reused => "rotated_token_reused",
            RotationFailure::Expired => "session_expired",
            RotationFailure::UserInactive => "user_inactive",
            RotationFailure::LostRace => "concurrent_rotation",
            RotationFailure::Unavailable => "storage_unavailable",
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    blacklist: Arc<dyn TokenBlacklist>,
    jwt: JwtService,
    audit: AuditLogger,
    config: TokenConfig,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        blacklist: Arc<dyn TokenBlacklist>,
        jwt: JwtService,
        audit: AuditLogger,
        config: TokenConfig,
    ) -> Self {
        Self {
            sessions,
            users,
            blacklist,
            jwt,
            audit,
            config,
        }
    }

    fn pepper(&self) -> &[u8] {
        self.config.refresh_pepper.expose_secret().as_bytes()
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::days(self.config.refresh_token_ttl_days)
    }

    fn session_blacklist_ttl(&self) -> i64 {
        self.jwt.access_token_expiry_seconds() + self.config.blacklist_buffer_seconds
    }

    /// New session row plus the plaintext refresh token, which is never stored.
    fn new_session(
        &self,
        family_id: Uuid,
        user_id: Uuid,
        tenant_id: Uuid,
        role: &str,
        device: &DeviceMeta,
        now: DateTime<Utc>,
    ) -> (RefreshSession, Secret<String>) {
        let session_id = Uuid::new_v4();
        let plaintext = format!("{}.{}", session_id, random_hex(REFRESH_SECRET_BYTES));
        let token_salt = random_salt();
        let token_hash = salted_hash(self.pepper(), &token_salt, &plaintext);

        let session = RefreshSession {
            session_id,
            family_id,
            user_id,
            tenant_id,
            token_salt,
            token_hash,
            role_name: role.to_string(),
            device_name: device.device_name.clone(),
            ip_address: device.ip_address.clone(),
            user_agent: device.user_agent.clone(),
            created_utc: now,
            last_used_utc: now,
            expiry_utc: now + self.refresh_ttl(),
            revoked_utc: None,
            revoked_reason: None,
            replaced_by: None,
            mfa_verified_utc: None,
        };
        (session, Secret::new(plaintext))
    }

    fn pair_for(
        &self,
        session: &RefreshSession,
        refresh_token: Secret<String>,
    ) -> Result<TokenPair, ServiceError> {
        let (access_token, access_expires_utc) = self.jwt.generate_access_token(
            session.user_id,
            session.tenant_id,
            &session.role_name,
            session.session_id,
            session.is_mfa_verified(),
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh_token.expose_secret().clone(),
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
            access_expires_utc,
            refresh_expires_utc: session.expiry_utc,
            session_id: session.session_id,
        })
    }

    /// Starts a new rotation family for a freshly authenticated user.
    pub async fn issue_token_pair(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        role: &str,
        device: &DeviceMeta,
    ) -> Result<TokenPair, ServiceError> {
        let (session, refresh_token) =
            self.new_session(Uuid::new_v4(), user_id, tenant_id, role, device, Utc::now());
        self.sessions.insert_session(&session).await?;

        tracing::info!(
            user_id = %user_id,
            tenant_id = %tenant_id,
            session_id = %session.session_id,
            "Issued token pair"
        );
        self.pair_for(&session, refresh_token)
    }

    /// Exchanges a refresh token for a new pair. Every failure, including
    /// storage outages, yields `None` after being audited.
    pub async fn rotate_token_pair(
        &self,
        refresh_token: &str,
        device: &DeviceMeta,
        context: &AuditContext,
    ) -> Option<TokenPair> {
        match self.try_rotate(refresh_token, device, context).await {
            Ok(pair) => {
                metrics::record_decision("session_rotation", "allow");
                Some(pair)
            }
            Err((failure, session)) => {
                metrics::record_decision("session_rotation", "deny");
                self.audit_rotation_failure(failure, session.as_ref(), context)
                    .await;
                None
            }
        }
    }

    async fn try_rotate(
        &self,
        refresh_token: &str,
        device: &DeviceMeta,
        context: &AuditContext,
    ) -> Result<TokenPair, (RotationFailure, Option<RefreshSession>)> {
        let session_id = parse_refresh_token(refresh_token)
            .ok_or((RotationFailure::Malformed, None))?;

        let session = match self.sessions.find_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return Err((RotationFailure::UnknownSession, None)),
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed during rotation");
                return Err((RotationFailure::Unavailable, None));
            }
        };

        let presented_hash = salted_hash(self.pepper(), &session.token_salt, refresh_token);
        if !constant_time_eq(&presented_hash, &session.token_hash) {
            return Err((RotationFailure::HashMismatch, Some(session)));
        }

        if session.is_revoked() {
            let failure = if session.revocation_reason() == Some(RevocationReason::Rotation) {
                RotationFailure::Reused
            } else {
                RotationFailure::Revoked
            };
            return Err((failure, Some(session)));
        }

        match self.blacklist.is_blacklisted(&refresh_key(&session.token_hash)).await {
            Ok(false) => {}
            Ok(true) => return Err((RotationFailure::Revoked, Some(session))),
            Err(e) => {
                tracing::error!(error = %e, "Blacklist lookup failed during rotation");
                return Err((RotationFailure::Unavailable, Some(session)));
            }
        }

        let now = Utc::now();
        if session.is_expired_at(now) {
            return Err((RotationFailure::Expired, Some(session)));
        }

        match self.users.find_user_by_id(session.user_id).await {
            Ok(Some(user)) if user.is_active() && user.tenant_id == session.tenant_id => {}
            Ok(_) => return Err((RotationFailure::UserInactive, Some(session))),
            Err(e) => {
                tracing::error!(error = %e, "User lookup failed during rotation");
                return Err((RotationFailure::Unavailable, Some(session)));
            }
        }

        let device = DeviceMeta {
            device_name: device.device_name.clone().or_else(|| session.device_name.clone()),
            ip_address: device.ip_address.clone().or_else(|| session.ip_address.clone()),
            user_agent: device.user_agent.clone().or_else(|| session.user_agent.clone()),
        };
        let (mut replacement, new_refresh_token) = self.new_session(
            session.family_id,
            session.user_id,
            session.tenant_id,
            &session.role_name,
            &device,
            now,
        );
        replacement.mfa_verified_utc = session.mfa_verified_utc;

        match self
            .sessions
            .rotate_session(session.session_id, &replacement, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err((RotationFailure::LostRace, Some(session))),
            Err(e) => {
                tracing::error!(error = %e, "Rotation write failed");
                return Err((RotationFailure::Unavailable, Some(session)));
            }
        }

        let remaining = (session.expiry_utc - now).num_seconds();
        if let Err(e) = self
            .blacklist
            .blacklist(
                &refresh_key(&session.token_hash),
                RevocationReason::Rotation,
                remaining + self.config.blacklist_buffer_seconds,
            )
            .await
        {
            // The session row is already revoked, which is what rotation checks first.
            tracing::warn!(error = %e, session_id = %session.session_id, "Failed to blacklist rotated token");
        }

        let pair = self
            .pair_for(&replacement, new_refresh_token)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to sign access token during rotation");
                (RotationFailure::Unavailable, Some(session.clone()))
            })?;

        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::TokenRotated,
                    AuditCategory::Authentication,
                    RiskLevel::Low,
                    "rotate_token_pair",
                )
                .context(context)
                .user(session.user_id)
                .tenant(session.tenant_id)
                .session(replacement.session_id)
                .details(json!({
                    "previous_session_id": session.session_id,
                    "family_id": session.family_id,
                })),
            )
            .await;

        Ok(pair)
    }

    async fn audit_rotation_failure(
        &self,
        failure: RotationFailure,
        session: Option<&RefreshSession>,
        context: &AuditContext,
    ) {
        let (event_type, category, risk) = match failure {
            RotationFailure::Reused => (
                AuditEventType::TokenReuseDetected,
                AuditCategory::Security,
                RiskLevel::Critical,
            ),
            RotationFailure::HashMismatch | RotationFailure::LostRace => (
                AuditEventType::TokenRotationFailed,
                AuditCategory::Authentication,
                RiskLevel::High,
            ),
            _ => (
                AuditEventType::TokenRotationFailed,
                AuditCategory::Authentication,
                RiskLevel::Medium,
            ),
        };

        let mut details = json!({ "reason": failure.as_str() });
        let mut record = AuditRecord::new(event_type, category, risk, "rotate_token_pair")
            .context(context);

        if let Some(session) = session {
            record = record
                .user(session.user_id)
                .tenant(session.tenant_id)
                .session(session.session_id);

            if failure == RotationFailure::Reused {
                let revoked = if self.config.revoke_family_on_reuse {
                    self.revoke_family(session.family_id).await
                } else {
                    0
                };
                details = json!({
                    "reason": failure.as_str(),
                    "family_id": session.family_id,
                    "replaced_by": session.replaced_by,
                    "family_sessions_revoked": revoked,
                });
            }
        }

        tracing::warn!(reason = failure.as_str(), "Refresh token rotation refused");
        self.audit.log(record.details(details)).await;
    }

    /// Revokes every live descendant of a compromised family.
    async fn revoke_family(&self, family_id: Uuid) -> usize {
        match self
            .sessions
            .revoke_family(family_id, RevocationReason::Compromise, Utc::now())
            .await
        {
            Ok(revoked) => {
                self.blacklist_sessions(&revoked, RevocationReason::Compromise)
                    .await;
                revoked.len()
            }
            Err(e) => {
                tracing::error!(error = %e, family_id = %family_id, "Failed to revoke compromised family");
                0
            }
        }
    }

    async fn blacklist_sessions(&self, sessions: &[RefreshSession], reason: RevocationReason) {
        let now = Utc::now();
        for session in sessions {
            let remaining = (session.expiry_utc - now).num_seconds().max(0);
            let entries = [
                (
                    refresh_key(&session.token_hash),
                    remaining + self.config.blacklist_buffer_seconds,
                ),
                (session_key(&session.session_id), self.session_blacklist_ttl()),
            ];
            for (key, ttl) in entries {
                if let Err(e) = self.blacklist.blacklist(&key, reason, ttl).await {
                    tracing::error!(error = %e, session_id = %session.session_id, "Failed to blacklist revoked session");
                }
            }
        }
    }

    /// Marks the caller's session MFA-verified and issues an access token that
    /// says so. Refresh tokens rotated from this session keep the mark.
    pub async fn elevate(&self, claims: &AccessTokenClaims) -> Result<ElevatedAccess, ServiceError> {
        if !self
            .sessions
            .mark_session_mfa_verified(claims.sid, Utc::now())
            .await?
        {
            return Err(ServiceError::unauthenticated("session no longer active"));
        }

        let (access_token, access_expires_utc) = self.jwt.generate_access_token(
            claims.sub,
            claims.tid,
            &claims.role,
            claims.sid,
            true,
        )?;

        tracing::info!(user_id = %claims.sub, session_id = %claims.sid, "Session elevated by second factor");
        Ok(ElevatedAccess {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
            access_expires_utc,
        })
    }

    /// Verifies signature and expiry, then consults the blacklist for both the
    /// token and its session. A blacklist outage denies.
    pub async fn authenticate(&self, access_token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let claims = self
            .jwt
            .validate_access_token(access_token)
            .map_err(|e| ServiceError::unauthenticated(e.to_string()))?;

        for key in [
            access_key(&sha256_hex(access_token)),
            session_key(&claims.sid),
        ] {
            let listed = self
                .blacklist
                .is_blacklisted(&key)
                .await
                .map_err(ServiceError::Blacklist)?;
            if listed {
                return Err(ServiceError::unauthenticated("access token revoked"));
            }
        }

        Ok(claims)
    }

    pub async fn validate_access_token(&self, access_token: &str) -> bool {
        match self.authenticate(access_token).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Access token rejected");
                false
            }
        }
    }

    /// Revokes a single access token until it would have expired anyway.
    pub async fn revoke_access_token(
        &self,
        access_token: &str,
        claims: &AccessTokenClaims,
    ) -> Result<(), ServiceError> {
        let remaining = (claims.expires_at() - Utc::now()).num_seconds();
        if remaining <= 0 {
            return Ok(());
        }
        self.blacklist
            .blacklist(
                &access_key(&sha256_hex(access_token)),
                RevocationReason::Logout,
                remaining + self.config.blacklist_buffer_seconds,
            )
            .await
            .map_err(ServiceError::Blacklist)
    }

    pub fn should_rotate(&self, expiry: DateTime<Utc>) -> bool {
        self.should_rotate_at(expiry, Utc::now())
    }

    pub fn should_rotate_at(&self, expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expiry - now < Duration::seconds(self.config.rotation_threshold_seconds)
    }

    /// Logout everywhere. Returns the number of sessions revoked.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        context: &AuditContext,
    ) -> Result<usize, ServiceError> {
        let revoked = self
            .sessions
            .revoke_user_sessions(user_id, reason, Utc::now())
            .await?;
        self.blacklist_sessions(&revoked, reason).await;

        tracing::info!(user_id = %user_id, count = revoked.len(), reason = reason.as_str(), "Revoked all sessions");
        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::AllSessionsRevoked,
                    AuditCategory::Authentication,
                    RiskLevel::Medium,
                    "revoke_all_sessions",
                )
                .context(context)
                .user(user_id)
                .details(json!({ "reason": reason.as_str(), "count": revoked.len() })),
            )
            .await;

        Ok(revoked.len())
    }

    /// Revokes one session owned by `user_id`. Sessions of other users look
    /// exactly like unknown ones.
    pub async fn revoke_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        reason: RevocationReason,
        context: &AuditContext,
    ) -> Result<(), ServiceError> {
        let session = self
            .sessions
            .find_session(session_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))?;

        if session.is_revoked() {
            return Err(ServiceError::conflict("Session already revoked"));
        }
        if !self
            .sessions
            .revoke_session(session_id, reason, Utc::now())
            .await?
        {
            return Err(ServiceError::conflict("Session already revoked"));
        }
        self.blacklist_sessions(std::slice::from_ref(&session), reason)
            .await;

        tracing::info!(user_id = %user_id, session_id = %session_id, reason = reason.as_str(), "Session revoked");
        self.audit
            .log(
                AuditRecord::new(
                    AuditEventType::SessionRevoked,
                    AuditCategory::Authentication,
                    RiskLevel::Low,
                    "revoke_session",
                )
                .context(context)
                .user(user_id)
                .tenant(session.tenant_id)
                .session(session_id)
                .details(json!({ "reason": reason.as_str() })),
            )
            .await;
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        current_session: Option<Uuid>,
    ) -> Result<Vec<SessionInfo>, ServiceError> {
        let sessions = self
            .sessions
            .list_active_sessions(user_id, Utc::now())
            .await?;
        Ok(sessions
            .iter()
            .map(|s| SessionInfo {
                is_current: Some(s.session_id) == current_session,
                ..SessionInfo::from(s)
            })
            .collect())
    }
}

/// Extracts the session id from `<uuid>.<64 hex>`.
pub fn parse_refresh_token(token: &str) -> Option<Uuid> {
    let (id, secret) = token.split_once('.')?;
    if secret.len() != REFRESH_SECRET_BYTES * 2 || !secret.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Uuid::parse_str(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::models::User;
    use crate::services::audit::alert::RecordingAlertSink;
    use crate::services::blacklist::InMemoryBlacklist;
    use crate::services::memory::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        blacklist: Arc<InMemoryBlacklist>,
        audit: AuditLogger,
        sessions: SessionManager,
        user: User,
    }

    fn fixture() -> Fixture {
        let config = IdentityConfig::for_tests();
        let store = Arc::new(MemoryStore::new());
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let audit = AuditLogger::new(
            store.clone(),
            Arc::new(RecordingAlertSink::new()),
            config.audit.clone(),
        );
        let user = User::new(
            Uuid::new_v4(),
            "owner@famistore.test".to_string(),
            None,
            "google".to_string(),
            "sub-1".to_string(),
        );
        store.put_user(user.clone()).unwrap();
        let sessions = SessionManager::new(
            store.clone(),
            store.clone(),
            blacklist.clone(),
            JwtService::new(&config.tokens).unwrap(),
            audit.clone(),
            config.tokens,
        );
        Fixture {
            store,
            blacklist,
            audit,
            sessions,
            user,
        }
    }

    async fn issue(f: &Fixture) -> TokenPair {
        f.sessions
            .issue_token_pair(f.user.user_id, f.user.tenant_id, "tenant_admin", &DeviceMeta::default())
            .await
            .unwrap()
    }

    #[test]
    fn refresh_token_shape_is_checked() {
        let id = Uuid::new_v4();
        assert_eq!(parse_refresh_token(&format!("{}.{}", id, "a".repeat(64))), Some(id));
        assert_eq!(parse_refresh_token(&format!("{}.{}", id, "a".repeat(63))), None);
        assert_eq!(parse_refresh_token(&format!("{}.{}", id, "z".repeat(64))), None);
        assert_eq!(parse_refresh_token("not-a-token"), None);
    }

    #[tokio::test]
    async fn issued_refresh_token_is_stored_only_as_hash() {
        let f = fixture();
        let pair = issue(&f).await;
        let stored = f.store.find_session(pair.session_id).await.unwrap().unwrap();
        assert_ne!(stored.token_hash, pair.refresh_token);
        assert!(!stored.token_hash.contains(&pair.refresh_token));
        assert!(f.sessions.validate_access_token(&pair.access_token).await);
    }

    #[tokio::test]
    async fn rotation_retires_the_presented_token() {
        let f = fixture();
        let first = issue(&f).await;
        let ctx = AuditContext::default();

        let second = f
            .sessions
            .rotate_token_pair(&first.refresh_token, &DeviceMeta::default(), &ctx)
            .await
            .unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let old = f.store.find_session(first.session_id).await.unwrap().unwrap();
        assert_eq!(old.revocation_reason(), Some(RevocationReason::Rotation));
        assert_eq!(old.replaced_by, Some(second.session_id));
        assert_eq!(
            f.blacklist.reason(&refresh_key(&old.token_hash)),
            Some(RevocationReason::Rotation)
        );
    }

    #[tokio::test]
    async fn replayed_token_fails_and_revokes_family() {
        let f = fixture();
        let ctx = AuditContext::default();
        let first = issue(&f).await;
        let second = f
            .sessions
            .rotate_token_pair(&first.refresh_token, &DeviceMeta::default(), &ctx)
            .await
            .unwrap();

        assert!(f
            .sessions
            .rotate_token_pair(&first.refresh_token, &DeviceMeta::default(), &ctx)
            .await
            .is_none());

        let descendant = f.store.find_session(second.session_id).await.unwrap().unwrap();
        assert_eq!(descendant.revocation_reason(), Some(RevocationReason::Compromise));
        assert!(!f.sessions.validate_access_token(&second.access_token).await);

        let reuse = f
            .audit
            .search(&crate::models::AuditFilter {
                event_type: Some(AuditEventType::TokenReuseDetected.as_str().to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(reuse.len(), 1);
        assert_eq!(reuse[0].risk_code, "critical");
    }

    #[tokio::test]
    async fn storage_outage_fails_closed() {
        let f = fixture();
        let pair = issue(&f).await;
        f.store.set_available(false);
        assert!(f
            .sessions
            .rotate_token_pair(&pair.refresh_token, &DeviceMeta::default(), &AuditContext::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn revoked_session_invalidates_access_token() {
        let f = fixture();
        let pair = issue(&f).await;
        f.sessions
            .revoke_session(pair.session_id, f.user.user_id, RevocationReason::Logout, &AuditContext::default())
            .await
            .unwrap();

        assert!(!f.sessions.validate_access_token(&pair.access_token).await);
        let again = f
            .sessions
            .revoke_session(pair.session_id, f.user.user_id, RevocationReason::Logout, &AuditContext::default())
            .await;
        assert!(matches!(again, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn other_users_sessions_look_unknown() {
        let f = fixture();
        let pair = issue(&f).await;
        let result = f
            .sessions
            .revoke_session(pair.session_id, Uuid::new_v4(), RevocationReason::Admin, &AuditContext::default())
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn revoke_all_lists_nothing_afterwards() {
        let f = fixture();
        let current = issue(&f).await;
        issue(&f).await;

        let listed = f
            .sessions
            .list_sessions(f.user.user_id, Some(current.session_id))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|s| s.is_current).count(), 1);

        let count = f
            .sessions
            .revoke_all_for_user(f.user.user_id, RevocationReason::Logout, &AuditContext::default())
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert!(f.sessions.list_sessions(f.user.user_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn elevation_marks_the_session_and_survives_rotation() {
        let f = fixture();
        let pair = issue(&f).await;
        let claims = f.sessions.authenticate(&pair.access_token).await.unwrap();
        assert!(!claims.mfa);

        let elevated = f.sessions.elevate(&claims).await.unwrap();
        let elevated_claims = f.sessions.authenticate(&elevated.access_token).await.unwrap();
        assert!(elevated_claims.mfa);
        assert_eq!(elevated_claims.sid, pair.session_id);

        let rotated = f
            .sessions
            .rotate_token_pair(&pair.refresh_token, &DeviceMeta::default(), &AuditContext::default())
            .await
            .unwrap();
        let rotated_claims = f.sessions.authenticate(&rotated.access_token).await.unwrap();
        assert!(rotated_claims.mfa);
    }

    #[tokio::test]
    async fn revoked_sessions_cannot_be_elevated() {
        let f = fixture();
        let pair = issue(&f).await;
        let claims = f.sessions.authenticate(&pair.access_token).await.unwrap();
        f.sessions
            .revoke_session(pair.session_id, f.user.user_id, RevocationReason::Logout, &AuditContext::default())
            .await
            .unwrap();

        let result = f.sessions.elevate(&claims).await;
        assert!(matches!(result, Err(ServiceError::Unauthenticated(_))));
    }

    #[test]
    fn rotation_threshold_is_five_minutes() {
        let f = fixture();
        let now = Utc::now();
        assert!(f.sessions.should_rotate_at(now + Duration::minutes(4), now));
        assert!(!f.sessions.should_rotate_at(now + Duration::minutes(6), now));
    }
}
