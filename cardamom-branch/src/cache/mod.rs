//! Branch-partitioned cache and live-feed subscription registry.
//!
//! Entries are keyed by `(branch, collection)` and only ever hold records
//! resolved for that exact branch. Every branch carries a generation counter:
//! eviction bumps it, and live-feed writes are rejected when their captured
//! generation is stale, so a delivery already in flight when its branch is
//! evicted can never repopulate the key.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::BranchId;
use crate::ports::Record;

/// Cancellation closure for a live feed.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle to one live feed, keyed like its cache entry.
pub struct SubscriptionHandle {
    cancel: Option<CancelFn>,
    pump: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Create a handle from a backend cancel closure and the pump task that
    /// forwards feed batches into the cache.
    #[must_use]
    pub fn new(cancel: CancelFn, pump: JoinHandle<()>) -> Self {
        Self {
            cancel: Some(cancel),
            pump: Some(pump),
        }
    }

    /// Cancel the feed at the backend and stop the pump.
    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Diagnostic counters over the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Branches with at least one cache entry or subscription.
    pub branch_count: usize,
    /// Cached `(branch, collection)` entries.
    pub collection_count: usize,
    /// Live subscriptions currently registered.
    pub subscription_count: usize,
}

/// Branch-partitioned cache with subscription lifecycle ownership.
#[derive(Default)]
pub struct BranchCache {
    entries: RwLock<HashMap<(BranchId, String), Vec<Record>>>,
    subscriptions: Mutex<HashMap<(BranchId, String), SubscriptionHandle>>,
    generations: RwLock<HashMap<BranchId, u64>>,
}

impl BranchCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation for a branch. Captured by subscription pumps so
    /// stale deliveries can be detected.
    #[must_use]
    pub fn generation(&self, branch_id: &BranchId) -> u64 {
        self.generations
            .read()
            .get(branch_id)
            .copied()
            .unwrap_or(0)
    }

    /// Pure lookup; no I/O.
    #[must_use]
    pub fn get(&self, branch_id: &BranchId, collection: &str) -> Option<Vec<Record>> {
        self.entries
            .read()
            .get(&(branch_id.clone(), collection.to_string()))
            .cloned()
    }

    /// Overwrite the entry for `(branch, collection)`.
    pub fn set(&self, branch_id: &BranchId, collection: &str, records: Vec<Record>) {
        self.entries
            .write()
            .insert((branch_id.clone(), collection.to_string()), records);
    }

    /// Overwrite the entry only if `generation` is still current for the
    /// branch. Returns whether the write was applied; stale batches from
    /// evicted feeds are dropped here.
    pub fn set_if_current(
        &self,
        branch_id: &BranchId,
        generation: u64,
        collection: &str,
        records: Vec<Record>,
    ) -> bool {
        if self.generation(branch_id) != generation {
            debug!(branch = %branch_id, collection, "Dropped stale feed batch");
            return false;
        }
        self.entries
            .write()
            .insert((branch_id.clone(), collection.to_string()), records);
        true
    }

    /// Register a live feed for `(branch, collection)`, cancelling any
    /// incumbent handle for the same key first. Exactly one feed per key.
    pub fn add_subscription(
        &self,
        branch_id: &BranchId,
        collection: &str,
        handle: SubscriptionHandle,
    ) {
        let key = (branch_id.clone(), collection.to_string());
        let mut subscriptions = self.subscriptions.lock();
        if let Some(mut old) = subscriptions.insert(key, handle) {
            debug!(branch = %branch_id, collection, "Replaced live subscription");
            old.cancel();
        }
    }

    /// Evict a branch: cancel its subscriptions first, then drop its cache
    /// entries, then bump its generation. Synchronous; must complete before
    /// any other branch's entries are treated as fresh.
    pub fn clear_branch(&self, branch_id: &BranchId) {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|(branch, _), handle| {
            if branch == branch_id {
                handle.cancel();
                false
            } else {
                true
            }
        });
        drop(subscriptions);

        self.entries.write().retain(|(branch, _), _| branch != branch_id);
        *self.generations.write().entry(branch_id.clone()).or_insert(0) += 1;
        debug!(branch = %branch_id, "Evicted branch from cache");
    }

    /// Cancel every subscription and drop every entry (logout/teardown).
    pub fn clear_all(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for (_, handle) in subscriptions.iter_mut() {
            handle.cancel();
        }
        subscriptions.clear();
        drop(subscriptions);

        let mut entries = self.entries.write();
        let mut generations = self.generations.write();
        for (branch, _) in entries.keys() {
            *generations.entry(branch.clone()).or_insert(0) += 1;
        }
        entries.clear();
        debug!("Cleared branch cache");
    }

    /// Read-only diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let subscriptions = self.subscriptions.lock();
        let mut branches: std::collections::HashSet<&BranchId> =
            entries.keys().map(|(b, _)| b).collect();
        branches.extend(subscriptions.keys().map(|(b, _)| b));
        CacheStats {
            branch_count: branches.len(),
            collection_count: entries.len(),
            subscription_count: subscriptions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn b(id: &str) -> BranchId {
        BranchId::new(id).unwrap()
    }

    fn record(tag: &str) -> Record {
        let mut r = Record::new();
        r.insert("tag".to_string(), tag.into());
        r
    }

    fn noop_handle() -> SubscriptionHandle {
        SubscriptionHandle::new(Box::new(|| {}), tokio::spawn(async {}))
    }

    fn counting_handle(cancelled: &Arc<AtomicUsize>) -> SubscriptionHandle {
        let cancelled = Arc::clone(cancelled);
        SubscriptionHandle::new(
            Box::new(move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            }),
            tokio::spawn(async {}),
        )
    }

    #[test]
    fn get_and_set_are_keyed_per_branch_and_collection() {
        let cache = BranchCache::new();
        cache.set(&b("b1"), "orders", vec![record("one")]);

        assert_eq!(cache.get(&b("b1"), "orders"), Some(vec![record("one")]));
        assert!(cache.get(&b("b1"), "inventory").is_none());
        assert!(cache.get(&b("b2"), "orders").is_none());
    }

    #[test]
    fn entries_never_merge_across_branches() {
        let cache = BranchCache::new();
        cache.set(&b("b1"), "orders", vec![record("b1-data")]);
        cache.set(&b("b2"), "orders", vec![record("b2-data")]);

        assert_eq!(cache.get(&b("b1"), "orders"), Some(vec![record("b1-data")]));
        assert_eq!(cache.get(&b("b2"), "orders"), Some(vec![record("b2-data")]));
    }

    #[tokio::test]
    async fn registering_a_second_feed_for_a_key_cancels_the_first() {
        let cache = BranchCache::new();
        let cancelled = Arc::new(AtomicUsize::new(0));

        cache.add_subscription(&b("b1"), "orders", counting_handle(&cancelled));
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);

        cache.add_subscription(&b("b1"), "orders", noop_handle());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().subscription_count, 1);
    }

    #[tokio::test]
    async fn clear_branch_cancels_feeds_and_drops_entries_for_that_branch_only() {
        let cache = BranchCache::new();
        let b1_cancelled = Arc::new(AtomicUsize::new(0));
        let b2_cancelled = Arc::new(AtomicUsize::new(0));

        cache.set(&b("b1"), "orders", vec![record("b1")]);
        cache.set(&b("b2"), "orders", vec![record("b2")]);
        cache.add_subscription(&b("b1"), "orders", counting_handle(&b1_cancelled));
        cache.add_subscription(&b("b2"), "orders", counting_handle(&b2_cancelled));

        cache.clear_branch(&b("b1"));

        assert_eq!(b1_cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(b2_cancelled.load(Ordering::SeqCst), 0);
        assert!(cache.get(&b("b1"), "orders").is_none());
        assert_eq!(cache.get(&b("b2"), "orders"), Some(vec![record("b2")]));
    }

    #[test]
    fn stale_generation_writes_are_dropped() {
        let cache = BranchCache::new();
        let generation = cache.generation(&b("b1"));

        cache.clear_branch(&b("b1"));

        // A batch captured before eviction must not repopulate the key.
        assert!(!cache.set_if_current(&b("b1"), generation, "orders", vec![record("late")]));
        assert!(cache.get(&b("b1"), "orders").is_none());

        // A batch captured after eviction is current again.
        let fresh = cache.generation(&b("b1"));
        assert!(cache.set_if_current(&b("b1"), fresh, "orders", vec![record("fresh")]));
        assert_eq!(cache.get(&b("b1"), "orders"), Some(vec![record("fresh")]));
    }

    #[tokio::test]
    async fn clear_all_cancels_everything() {
        let cache = BranchCache::new();
        let cancelled = Arc::new(AtomicUsize::new(0));

        cache.set(&b("b1"), "orders", vec![record("x")]);
        cache.set(&b("b2"), "inventory", vec![record("y")]);
        cache.add_subscription(&b("b1"), "orders", counting_handle(&cancelled));
        cache.add_subscription(&b("b2"), "inventory", counting_handle(&cancelled));

        cache.clear_all();

        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn stats_count_branches_collections_and_subscriptions() {
        let cache = BranchCache::new();
        cache.set(&b("b1"), "orders", vec![]);
        cache.set(&b("b1"), "inventory", vec![]);
        cache.set(&b("b2"), "orders", vec![]);
        cache.add_subscription(&b("b1"), "orders", noop_handle());

        let stats = cache.stats();
        assert_eq!(stats.branch_count, 2);
        assert_eq!(stats.collection_count, 3);
        assert_eq!(stats.subscription_count, 1);
    }
}
