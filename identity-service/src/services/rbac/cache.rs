//! Per (user, tenant) cache of effective roles and permissions.
//!
//! Every user carries a generation counter. A load records the generation it
//! started under and is only stored if no invalidation happened meanwhile, so
//! a slow load can never re-populate a grant that was just revoked.
//!
//! Generations are drawn from one monotonic counter. The sweeper forgets the
//! generation of users with nothing cached and raises a floor instead, so a
//! forgotten user never reads a generation older than their last invalidation.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{AssignedRole, Permission};

#[derive(Debug, Clone)]
pub struct CachedGrants {
    pub roles: Vec<AssignedRole>,
    pub permissions: Vec<Permission>,
    loaded_at: Instant,
}

impl CachedGrants {
    pub fn new(roles: Vec<AssignedRole>, permissions: Vec<Permission>) -> Self {
        Self {
            roles,
            permissions,
            loaded_at: Instant::now(),
        }
    }
}

pub struct PermissionCache {
    entries: DashMap<(Uuid, Uuid), Arc<CachedGrants>>,
    generations: DashMap<Uuid, u64>,
    epoch: AtomicU64,
    floor: AtomicU64,
    ttl: Duration,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
            floor: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn get(&self, user_id: Uuid, tenant_id: Uuid) -> Option<Arc<CachedGrants>> {
        let key = (user_id, tenant_id);
        let hit = self.entries.get(&key).map(|e| Arc::clone(e.value()))?;
        if hit.loaded_at.elapsed() < self.ttl {
            return Some(hit);
        }
        self.entries
            .remove_if(&key, |_, cached| cached.loaded_at.elapsed() >= self.ttl);
        None
    }

    pub fn generation(&self, user_id: Uuid) -> u64 {
        self.generations
            .get(&user_id)
            .map(|g| *g)
            .unwrap_or_else(|| self.floor.load(Ordering::SeqCst))
    }

    /// Stores `grants` unless the user was invalidated after `generation` was read.
    pub fn insert_if_current(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        grants: Arc<CachedGrants>,
        generation: u64,
    ) -> bool {
        // The generation entry stays locked across the insert so an
        // invalidation cannot slip between the check and the write.
        let current = self
            .generations
            .entry(user_id)
            .or_insert_with(|| self.floor.load(Ordering::SeqCst));
        if *current != generation {
            return false;
        }
        self.entries.insert((user_id, tenant_id), grants);
        drop(current);
        true
    }

    /// Drops every cached tenant entry of the user.
    pub fn invalidate_user(&self, user_id: Uuid) {
        {
            let mut generation = self.generations.entry(user_id).or_insert(0);
            *generation = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.entries.retain(|(user, _), _| *user != user_id);
        tracing::debug!(user_id = %user_id, "Permission cache invalidated");
    }

    /// Drops expired entries and the generations of users with nothing cached.
    /// Returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| cached.loaded_at.elapsed() < self.ttl);
        let removed = before.saturating_sub(self.entries.len());

        let live: HashSet<Uuid> = self.entries.iter().map(|e| e.key().0).collect();
        self.generations.retain(|user_id, generation| {
            if live.contains(user_id) {
                return true;
            }
            self.floor.fetch_max(*generation, Ordering::SeqCst);
            false
        });
        removed
    }

    /// Sweeps every `ttl` until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.ttl.max(Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let removed = self.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired permission cache entries");
                }
            }
        })
    }

    pub fn tracked_users(&self) -> usize {
        self.generations.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants() -> Arc<CachedGrants> {
        Arc::new(CachedGrants::new(Vec::new(), Vec::new()))
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = PermissionCache::new(Duration::from_millis(0));
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(cache.insert_if_current(user, tenant, grants(), 0));
        assert!(cache.get(user, tenant).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidation_removes_every_tenant_of_the_user() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        cache.insert_if_current(user, t1, grants(), 0);
        cache.insert_if_current(user, t2, grants(), 0);
        cache.insert_if_current(other, t1, grants(), 0);

        cache.invalidate_user(user);
        assert!(cache.get(user, t1).is_none());
        assert!(cache.get(user, t2).is_none());
        assert!(cache.get(other, t1).is_some());
    }

    #[test]
    fn sweep_forgets_idle_users() {
        let cache = PermissionCache::new(Duration::from_millis(0));
        for _ in 0..3 {
            let user = Uuid::new_v4();
            cache.insert_if_current(user, Uuid::new_v4(), grants(), 0);
            cache.invalidate_user(Uuid::new_v4());
        }
        assert_eq!(cache.tracked_users(), 6);

        assert_eq!(cache.sweep(), 3);
        assert!(cache.is_empty());
        assert_eq!(cache.tracked_users(), 0);
    }

    #[test]
    fn sweep_keeps_users_with_live_entries() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());
        cache.insert_if_current(user, tenant, grants(), 0);
        cache.invalidate_user(Uuid::new_v4());

        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.tracked_users(), 1);
        assert!(cache.get(user, tenant).is_some());
    }

    #[test]
    fn swept_invalidation_still_discards_older_loads() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());

        let generation = cache.generation(user);
        cache.invalidate_user(user);
        cache.sweep();
        assert_eq!(cache.tracked_users(), 0);

        assert!(!cache.insert_if_current(user, tenant, grants(), generation));
        assert!(cache.get(user, tenant).is_none());
        assert!(cache.insert_if_current(user, tenant, grants(), cache.generation(user)));
    }

    #[test]
    fn load_started_before_invalidation_is_discarded() {
        let cache = PermissionCache::new(Duration::from_secs(300));
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());

        let generation = cache.generation(user);
        cache.invalidate_user(user);
        assert!(!cache.insert_if_current(user, tenant, grants(), generation));
        assert!(cache.get(user, tenant).is_none());

        assert!(cache.insert_if_current(user, tenant, grants(), cache.generation(user)));
        assert!(cache.get(user, tenant).is_some());
    }
}
