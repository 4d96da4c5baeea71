//! Token blacklist: retired refresh-token hashes, revoked session ids and
//! individually revoked access tokens.
//!
//! Entries only need to outlive the token they shadow; durable revocation
//! lives on the session row, so losing the in-process map on restart is safe.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::RevocationReason;

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn blacklist(
        &self,
        key: &str,
        reason: RevocationReason,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error>;
    async fn is_blacklisted(&self, key: &str) -> Result<bool, anyhow::Error>;
    /// Drops expired entries; returns how many were removed.
    async fn sweep_expired(&self) -> Result<usize, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

pub fn refresh_key(token_hash: &str) -> String {
    format!("refresh:{}", token_hash)
}

pub fn session_key(session_id: &uuid::Uuid) -> String {
    format!("session:{}", session_id)
}

pub fn access_key(token_digest: &str) -> String {
    format!("access:{}", token_digest)
}

#[derive(Debug, Clone)]
struct Entry {
    reason: RevocationReason,
    expires_at: DateTime<Utc>,
}

/// Process-local blacklist with lazy expiry on read plus a periodic sweep.
#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: DashMap<String, Entry>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reason(&self, key: &str) -> Option<RevocationReason> {
        self.entries.get(key).map(|e| e.reason)
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl TokenBlacklist for InMemoryBlacklist {
    async fn blacklist(
        &self,
        key: &str,
        reason: RevocationReason,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let expires_at = Utc::now() + Duration::seconds(ttl_seconds.max(1));
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if existing.expires_at < expires_at {
                    existing.expires_at = expires_at;
                    existing.reason = reason;
                }
            })
            .or_insert(Entry { reason, expires_at });
        Ok(())
    }

    async fn is_blacklisted(&self, key: &str) -> Result<bool, anyhow::Error> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(true),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        Ok(false)
    }

    async fn sweep_expired(&self) -> Result<usize, anyhow::Error> {
        Ok(self.sweep_at(Utc::now()))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Periodically drops expired entries until `cancel` fires.
pub fn spawn_sweeper(
    blacklist: std::sync::Arc<dyn TokenBlacklist>,
    interval_seconds: u64,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = std::time::Duration::from_secs(interval_seconds.max(1));
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match blacklist.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Swept expired blacklist entries"),
                Err(e) => tracing::warn!(error = %e, "Blacklist sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blacklisted_keys_are_reported() {
        let blacklist = InMemoryBlacklist::new();
        blacklist
            .blacklist("refresh:abc", RevocationReason::Rotation, 60)
            .await
            .unwrap();
        assert!(blacklist.is_blacklisted("refresh:abc").await.unwrap());
        assert!(!blacklist.is_blacklisted("refresh:def").await.unwrap());
        assert_eq!(blacklist.reason("refresh:abc"), Some(RevocationReason::Rotation));
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_entries() {
        let blacklist = InMemoryBlacklist::new();
        blacklist
            .blacklist("live", RevocationReason::Logout, 600)
            .await
            .unwrap();
        blacklist
            .blacklist("stale", RevocationReason::Logout, 1)
            .await
            .unwrap();

        let removed = blacklist.sweep_at(Utc::now() + Duration::seconds(5));
        assert_eq!(removed, 1);
        assert_eq!(blacklist.len(), 1);
        assert!(blacklist.is_blacklisted("live").await.unwrap());
    }

    #[tokio::test]
    async fn longer_ttl_wins_on_reinsert() {
        let blacklist = InMemoryBlacklist::new();
        blacklist
            .blacklist("k", RevocationReason::Rotation, 600)
            .await
            .unwrap();
        blacklist
            .blacklist("k", RevocationReason::Compromise, 1)
            .await
            .unwrap();
        assert_eq!(blacklist.reason("k"), Some(RevocationReason::Rotation));
    }
}
