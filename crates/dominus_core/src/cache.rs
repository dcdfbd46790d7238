//! Demand-paged node cache.
//!
//! Maps handles to shared hydrated nodes with least-recently-used eviction.
//! While a node is resident every lookup returns the same [`NodeRef`], so a
//! change made through one holder is visible to all of them. Eviction only
//! drops the cache's reference; neighbors refer to each other by handle and
//! never dangle.

use crate::error::CoreResult;
use crate::node::{Node, NodeRef};
use crate::record::NodeRecord;
use crate::stats::StoreStats;
use crate::types::Eid;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Bounded map from [`Eid`] to resident nodes.
pub struct NodeCache {
    entries: LruCache<Eid, NodeRef>,
    stats: Arc<StoreStats>,
}

impl NodeCache {
    /// Creates a cache holding at most `capacity` nodes.
    #[must_use]
    pub fn new(capacity: NonZeroUsize, stats: Arc<StoreStats>) -> Self {
        Self {
            entries: LruCache::new(capacity),
            stats,
        }
    }

    /// Returns the resident node for `eid`, hydrating it with `load` on a
    /// miss.
    ///
    /// Inserting may evict the least recently used node.
    ///
    /// # Errors
    ///
    /// Propagates the error of `load`; nothing is cached in that case.
    pub fn get_or_load<F>(&mut self, eid: Eid, load: F) -> CoreResult<NodeRef>
    where
        F: FnOnce() -> CoreResult<Node>,
    {
        if let Some(node) = self.entries.get(&eid) {
            self.stats.record_cache_hit();
            return Ok(Arc::clone(node));
        }

        self.stats.record_cache_miss();
        let node = Arc::new(load()?);
        if let Some((evicted, _)) = self.entries.push(eid, Arc::clone(&node)) {
            if evicted != eid {
                self.stats.record_cache_eviction();
                trace!(%evicted, "evicted node");
            }
        }
        Ok(node)
    }

    /// Returns the resident node without touching its recency.
    #[must_use]
    pub fn peek(&self, eid: Eid) -> Option<&NodeRef> {
        self.entries.peek(&eid)
    }

    /// Whether `eid` is resident.
    #[must_use]
    pub fn contains(&self, eid: Eid) -> bool {
        self.entries.contains(&eid)
    }

    /// Updates the record of a resident node in place.
    pub fn sync_record(&self, eid: Eid, record: &NodeRecord) {
        if let Some(node) = self.entries.peek(&eid) {
            node.set_record(*record);
        }
    }

    /// Drops `eid` from the cache, as if it had been evicted.
    ///
    /// Returns whether it was resident.
    pub fn evict(&mut self, eid: Eid) -> bool {
        let was_resident = self.entries.pop(&eid).is_some();
        if was_resident {
            self.stats.record_cache_eviction();
            trace!(%eid, "evicted node on request");
        }
        was_resident
    }

    /// Forgets `eid` because its slot was freed.
    pub fn remove(&mut self, eid: Eid) -> Option<NodeRef> {
        self.entries.pop(&eid)
    }

    /// Drops every resident node.
    pub fn clear(&mut self) {
        let count = self.entries.len() as u64;
        self.entries.clear();
        for _ in 0..count {
            self.stats.record_cache_eviction();
        }
    }

    /// Number of resident nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no node is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of resident nodes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Handles of resident nodes, most recently used first.
    pub fn resident(&self) -> impl Iterator<Item = Eid> + '_ {
        self.entries.iter().map(|(eid, _)| *eid)
    }
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::name_pool::NamePool;
    use crate::node::hydrate;
    use crate::text_pool::TextPool;
    use crate::types::{NameCode, NodeKind};
    use dominus_storage::InMemoryBackend;

    fn cache(capacity: usize) -> (NodeCache, Arc<StoreStats>) {
        let stats = Arc::new(StoreStats::new());
        let capacity = NonZeroUsize::new(capacity).unwrap();
        (NodeCache::new(capacity, Arc::clone(&stats)), stats)
    }

    fn comment(eid: u64) -> Node {
        let names = NamePool::create(Box::new(InMemoryBackend::new())).unwrap();
        let text = TextPool::create(Box::new(InMemoryBackend::new()), false).unwrap();
        let record = NodeRecord::new(NodeKind::Comment, NameCode::COMMENT);
        hydrate(Eid(eid), record, &names, &text).unwrap()
    }

    #[test]
    fn resident_node_keeps_identity() {
        let (mut cache, stats) = cache(4);
        let a = cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();
        let b = cache
            .get_or_load(Eid(1), || panic!("resident node must not reload"))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(stats.cache_misses(), 1);
        assert_eq!(stats.cache_hits(), 1);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let (mut cache, stats) = cache(2);
        cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();
        cache.get_or_load(Eid(2), || Ok(comment(2))).unwrap();
        // Touch 1 so 2 becomes the eviction candidate.
        cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();
        cache.get_or_load(Eid(3), || Ok(comment(3))).unwrap();

        assert!(cache.contains(Eid(1)));
        assert!(!cache.contains(Eid(2)));
        assert!(cache.contains(Eid(3)));
        assert_eq!(cache.len(), 2);
        assert_eq!(stats.cache_evictions(), 1);
    }

    #[test]
    fn evicted_node_is_reloaded_as_new_object() {
        let (mut cache, _) = cache(2);
        let before = cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();
        assert!(cache.evict(Eid(1)));
        assert!(!cache.evict(Eid(1)));

        let after = cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }

    #[test]
    fn failed_load_caches_nothing() {
        let (mut cache, _) = cache(2);
        let err = cache
            .get_or_load(Eid(5), || Err(CoreError::FreedHandle { eid: 5 }))
            .unwrap_err();
        assert!(matches!(err, CoreError::FreedHandle { eid: 5 }));
        assert!(cache.is_empty());
    }

    #[test]
    fn sync_record_reaches_all_holders() {
        let (mut cache, _) = cache(2);
        let held = cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();

        let mut record = held.record();
        record.parent = Eid(9);
        cache.sync_record(Eid(1), &record);

        assert_eq!(held.parent(), Eid(9));
        // Non-resident handles are ignored.
        cache.sync_record(Eid(2), &record);
        assert!(!cache.contains(Eid(2)));
    }

    #[test]
    fn peek_does_not_refresh_recency() {
        let (mut cache, _) = cache(2);
        cache.get_or_load(Eid(1), || Ok(comment(1))).unwrap();
        cache.get_or_load(Eid(2), || Ok(comment(2))).unwrap();
        assert!(cache.peek(Eid(1)).is_some());
        cache.get_or_load(Eid(3), || Ok(comment(3))).unwrap();
        assert!(!cache.contains(Eid(1)));
    }

    #[test]
    fn clear_counts_evictions() {
        let (mut cache, stats) = cache(4);
        for i in 1..=3 {
            cache.get_or_load(Eid(i), || Ok(comment(i))).unwrap();
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(stats.cache_evictions(), 3);
        assert_eq!(cache.capacity(), 4);
    }
}
