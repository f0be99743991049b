// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Two-tier registry of permanently blocked identities.
//!
//! Every instance keeps a local set that answers [`BlockRegistry::is_blocked`]
//! without I/O. The shared [`BlockStore`] is the authoritative copy. Other
//! instances learn about a block only when they next refresh, so a block
//! reaches the whole fleet within one refresh interval (plus the store
//! timeout) of being written.
//!
//! Writes are read-modify-write without any lock across instances. Two
//! instances promoting different identities at the same moment can overwrite
//! each other. An identity whose store write failed stays *pending*; pending
//! identities are enforced locally regardless of the store's contents and are
//! written back on refresh until a write succeeds. Once a write is confirmed
//! the store is authoritative again, so a manual unblock made elsewhere
//! propagates here on the next refresh.

use crate::error::StoreError;
use crate::identity::ClientIdentity;
use crate::store::BlockStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LocalBlocks {
    /// Everything this instance denies.
    blocked: HashSet<ClientIdentity>,
    /// Promoted here but not yet observed in the store.
    pending: HashSet<ClientIdentity>,
}

/// Point-in-time view of the local cache.
#[derive(Debug, Clone, Serialize)]
pub struct BlocklistSnapshot {
    pub blocked: usize,
    pub pending: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

pub struct BlockRegistry {
    store: Arc<dyn BlockStore>,
    key: String,
    refresh_interval: Duration,
    local: RwLock<LocalBlocks>,
    /// When a refresh was last claimed, successful or not.
    refresh_claimed_at: Mutex<Option<Instant>>,
    last_success: RwLock<Option<DateTime<Utc>>>,
}

impl BlockRegistry {
    pub fn new(store: Arc<dyn BlockStore>, key: impl Into<String>, refresh_interval: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            refresh_interval,
            local: RwLock::new(LocalBlocks::default()),
            refresh_claimed_at: Mutex::new(None),
            last_success: RwLock::new(None),
        }
    }

    /// Local lookup only.
    pub async fn is_blocked(&self, identity: &ClientIdentity) -> bool {
        self.local.read().await.blocked.contains(identity)
    }

    /// Refresh if the interval has elapsed since the last claimed refresh.
    ///
    /// The claim is recorded before the store is contacted, so concurrent
    /// callers inside the same interval return `None` instead of fetching.
    /// A failed refresh still consumes the interval.
    pub async fn refresh_if_due(&self, now: Instant) -> Option<Result<usize, StoreError>> {
        {
            let mut claimed = self.refresh_claimed_at.lock().await;
            let due = match *claimed {
                None => true,
                Some(at) => now.saturating_duration_since(at) >= self.refresh_interval,
            };
            if !due {
                return None;
            }
            *claimed = Some(now);
        }
        Some(self.refresh().await)
    }

    /// Replace the local cache with the store's list.
    ///
    /// On failure the local cache is left exactly as it was. Returns the
    /// number of identities now blocked locally.
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let fetched: HashSet<ClientIdentity> = self
            .store
            .get(&self.key)
            .await?
            .iter()
            .map(|s| ClientIdentity::from(s.as_str()))
            .collect();

        let (size, unconfirmed) = {
            let mut local = self.local.write().await;
            local.pending.retain(|id| !fetched.contains(id));
            let mut blocked = fetched.clone();
            blocked.extend(local.pending.iter().cloned());
            local.blocked = blocked;
            (local.blocked.len(), local.pending.iter().cloned().collect::<Vec<_>>())
        };
        *self.last_success.write().await = Some(Utc::now());
        debug!(blocked = size, "Block list refreshed");

        if !unconfirmed.is_empty() {
            info!(count = unconfirmed.len(), "Re-persisting blocks missing from store");
            let mut merged: Vec<String> = fetched.iter().map(|id| id.to_string()).collect();
            merged.sort();
            merged.extend(unconfirmed.iter().map(|id| id.to_string()));
            match self.store.set(&self.key, &merged).await {
                Ok(()) => self.confirm(&unconfirmed).await,
                // The cache is already replaced; retry on the next refresh.
                Err(err) => warn!(error = %err, "Failed to re-persist pending blocks"),
            }
        }

        Ok(size)
    }

    /// The store now holds these identities; later refreshes own them.
    async fn confirm(&self, identities: &[ClientIdentity]) {
        let mut local = self.local.write().await;
        for identity in identities {
            local.pending.remove(identity);
        }
    }

    /// Block an identity here immediately, then persist it best-effort.
    ///
    /// The local block is in place before the store is contacted and stays in
    /// place if the store write fails. Only an unconfirmed write leaves the
    /// identity pending.
    pub async fn promote(&self, identity: &ClientIdentity) -> Result<(), StoreError> {
        {
            let mut local = self.local.write().await;
            local.blocked.insert(identity.clone());
            local.pending.insert(identity.clone());
        }
        warn!(%identity, "Identity blocked");

        let mut list = self.store.get(&self.key).await?;
        if list.iter().any(|entry| entry.trim() == identity.as_str()) {
            debug!(%identity, "Block already present in store");
        } else {
            list.push(identity.to_string());
            self.store.set(&self.key, &list).await?;
        }
        self.confirm(std::slice::from_ref(identity)).await;
        Ok(())
    }

    /// Lift a block locally and in the store.
    ///
    /// Returns whether the identity was blocked in either place.
    pub async fn unblock(&self, identity: &ClientIdentity) -> Result<bool, StoreError> {
        let was_local = {
            let mut local = self.local.write().await;
            local.pending.remove(identity);
            local.blocked.remove(identity)
        };

        let mut list = self.store.get(&self.key).await?;
        let before = list.len();
        list.retain(|entry| entry.trim() != identity.as_str());
        let was_stored = list.len() != before;
        if was_stored {
            self.store.set(&self.key, &list).await?;
        }

        if was_local || was_stored {
            info!(%identity, "Identity unblocked");
        }
        Ok(was_local || was_stored)
    }

    pub async fn snapshot(&self) -> BlocklistSnapshot {
        let local = self.local.read().await;
        BlocklistSnapshot {
            blocked: local.blocked.len(),
            pending: local.pending.len(),
            last_refresh: *self.last_success.read().await,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("key", &self.key)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const KEY: &str = "blocked_ips";

    /// Memory store that can be switched off (or made read-only) and counts reads.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        down: AtomicBool,
        fail_sets: AtomicBool,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl BlockStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".to_string()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, identities: &[String]) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) || self.fail_sets.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".to_string()));
            }
            self.inner.set(key, identities).await
        }
    }

    fn registry(store: Arc<FlakyStore>) -> BlockRegistry {
        BlockRegistry::new(store, KEY, Duration::from_secs(300))
    }

    fn id(s: &str) -> ClientIdentity {
        ClientIdentity::new(s)
    }

    #[tokio::test]
    async fn test_promote_blocks_locally_and_persists() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());

        registry.promote(&id("203.0.113.5")).await.unwrap();

        assert!(registry.is_blocked(&id("203.0.113.5")).await);
        assert_eq!(store.inner.get(KEY).await.unwrap(), vec!["203.0.113.5".to_string()]);
    }

    #[tokio::test]
    async fn test_promote_is_idempotent_in_store() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());

        assert_ok!(registry.promote(&id("x")).await);
        assert_ok!(registry.promote(&id("x")).await);

        assert_eq!(store.inner.get(KEY).await.unwrap(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_promote_appends_to_existing_list() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set(KEY, &["a".to_string()]).await.unwrap();
        let registry = registry(store.clone());

        registry.promote(&id("b")).await.unwrap();

        assert_eq!(
            store.inner.get(KEY).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_promote_with_store_down_still_blocks_locally() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        let registry = registry(store.clone());

        assert_err!(registry.promote(&id("x")).await);
        assert!(registry.is_blocked(&id("x")).await);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set(KEY, &["a".to_string()]).await.unwrap();
        let registry = registry(store.clone());

        assert_eq!(registry.refresh().await.unwrap(), 1);
        store.down.store(true, Ordering::SeqCst);

        assert_err!(registry.refresh().await);
        assert!(registry.is_blocked(&id("a")).await);
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set(KEY, &["a".to_string()]).await.unwrap();
        let registry = registry(store.clone());
        registry.refresh().await.unwrap();

        store.inner.set(KEY, &["b".to_string()]).await.unwrap();
        registry.refresh().await.unwrap();

        assert!(!registry.is_blocked(&id("a")).await);
        assert!(registry.is_blocked(&id("b")).await);
    }

    #[tokio::test]
    async fn test_failed_write_is_repaired_on_refresh() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set(KEY, &["y".to_string()]).await.unwrap();
        let registry = registry(store.clone());

        store.down.store(true, Ordering::SeqCst);
        assert_err!(registry.promote(&id("x")).await);
        assert_eq!(registry.snapshot().await.pending, 1);

        store.down.store(false, Ordering::SeqCst);
        assert_eq!(registry.refresh().await.unwrap(), 2);
        assert!(registry.is_blocked(&id("x")).await);
        assert!(registry.is_blocked(&id("y")).await);

        let mut stored = store.inner.get(KEY).await.unwrap();
        stored.sort();
        assert_eq!(stored, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(registry.snapshot().await.pending, 0);
    }

    #[tokio::test]
    async fn test_confirmed_promote_is_not_pending() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());

        registry.promote(&id("x")).await.unwrap();
        assert_eq!(registry.snapshot().await.pending, 0);

        // Already present in the store counts as confirmed too.
        let other = BlockRegistry::new(store.clone(), KEY, Duration::from_secs(300));
        other.promote(&id("x")).await.unwrap();
        assert_eq!(other.snapshot().await.pending, 0);
    }

    #[tokio::test]
    async fn test_unblock_on_another_instance_sticks() {
        let store = Arc::new(FlakyStore::default());
        let a = registry(store.clone());
        let b = registry(store.clone());

        a.promote(&id("x")).await.unwrap();
        assert!(b.unblock(&id("x")).await.unwrap());

        a.refresh().await.unwrap();
        assert!(!a.is_blocked(&id("x")).await);
        assert!(store.inner.get(KEY).await.unwrap().is_empty());

        b.refresh().await.unwrap();
        assert!(!b.is_blocked(&id("x")).await);
    }

    #[tokio::test]
    async fn test_failed_write_back_still_reports_refresh() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());

        store.down.store(true, Ordering::SeqCst);
        assert_err!(registry.promote(&id("x")).await);
        store.down.store(false, Ordering::SeqCst);
        store.fail_sets.store(true, Ordering::SeqCst);

        assert_eq!(assert_ok!(registry.refresh().await), 1);
        assert!(registry.snapshot().await.last_refresh.is_some());
        assert_eq!(registry.snapshot().await.pending, 1);
        assert!(store.inner.get(KEY).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_if_due_throttles() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());
        let start = Instant::now();

        assert!(registry.refresh_if_due(start).await.is_some());
        for secs in [0, 10, 299] {
            assert!(registry
                .refresh_if_due(start + Duration::from_secs(secs))
                .await
                .is_none());
        }
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        assert!(registry
            .refresh_if_due(start + Duration::from_secs(300))
            .await
            .is_some());
        assert_eq!(store.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unblock_clears_both_tiers() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());

        registry.promote(&id("x")).await.unwrap();
        registry.promote(&id("y")).await.unwrap();

        assert!(registry.unblock(&id("x")).await.unwrap());
        assert!(!registry.is_blocked(&id("x")).await);
        assert_eq!(store.inner.get(KEY).await.unwrap(), vec!["y".to_string()]);

        assert!(!registry.unblock(&id("x")).await.unwrap());
    }
}
