//! Store statistics.
//!
//! Counters are atomic so they can be read while the store is in use.
//! [`Store::stats`](crate::Store::stats) combines them with the current
//! file sizes into a [`StatsSnapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store operation counters.
#[derive(Debug, Default)]
pub struct StoreStats {
    // Cache counters
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,

    // Node counters
    nodes_created: AtomicU64,
    nodes_freed: AtomicU64,
    links: AtomicU64,
    unlinks: AtomicU64,

    // Text pool counters
    text_bytes_written: AtomicU64,
    text_bytes_freed: AtomicU64,
    compactions: AtomicU64,

    flushes: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_node_freed(&self) {
        self.nodes_freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_link(&self) {
        self.links.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unlink(&self) {
        self.unlinks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_text_written(&self, bytes: u64) {
        self.text_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_text_freed(&self, bytes: u64) {
        self.text_bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of cache misses (hydrations from disk).
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Returns the number of nodes dropped from the cache.
    pub fn cache_evictions(&self) -> u64 {
        self.cache_evictions.load(Ordering::Relaxed)
    }

    /// Returns the number of nodes created.
    pub fn nodes_created(&self) -> u64 {
        self.nodes_created.load(Ordering::Relaxed)
    }

    /// Returns the number of nodes freed.
    pub fn nodes_freed(&self) -> u64 {
        self.nodes_freed.load(Ordering::Relaxed)
    }

    /// Returns the total encoded text bytes stored.
    pub fn text_bytes_written(&self) -> u64 {
        self.text_bytes_written.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of the counters. Size gauges are left at zero.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            cache_evictions: self.cache_evictions(),
            nodes_created: self.nodes_created(),
            nodes_freed: self.nodes_freed(),
            links: self.links.load(Ordering::Relaxed),
            unlinks: self.unlinks.load(Ordering::Relaxed),
            text_bytes_written: self.text_bytes_written(),
            text_bytes_freed: self.text_bytes_freed.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            ..StatsSnapshot::default()
        }
    }
}

/// A point-in-time view of a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Cache evictions.
    pub cache_evictions: u64,
    /// Nodes created.
    pub nodes_created: u64,
    /// Nodes freed.
    pub nodes_freed: u64,
    /// Child links made.
    pub links: u64,
    /// Child links removed.
    pub unlinks: u64,
    /// Encoded text bytes stored.
    pub text_bytes_written: u64,
    /// Text bytes returned to the free list.
    pub text_bytes_freed: u64,
    /// Text pool compactions.
    pub compactions: u64,
    /// Flushes.
    pub flushes: u64,

    /// Directory slots, excluding the reserved slot 0.
    pub slots: u64,
    /// Slots on the free list.
    pub free_slots: u64,
    /// Nodes currently resident in the cache.
    pub cached_nodes: u64,
    /// Interned names.
    pub names: u64,
    /// Node directory size in bytes.
    pub directory_bytes: u64,
    /// Text pool size in bytes.
    pub text_pool_bytes: u64,
    /// Bytes held by free text chunks.
    pub text_free_bytes: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups served from the cache, if any happened.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        (total > 0).then(|| self.cache_hits as f64 / total as f64)
    }

    /// Slots holding live nodes.
    #[must_use]
    pub fn live_nodes(&self) -> u64 {
        self.slots.saturating_sub(self.free_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StoreStats::new();
        assert_eq!(stats.cache_hits(), 0);
        assert_eq!(stats.nodes_created(), 0);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = StoreStats::new();
        stats.record_cache_miss();
        stats.record_cache_hit();
        stats.record_cache_hit();
        stats.record_text_written(12);
        stats.record_text_written(3);
        stats.record_node_created();

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.text_bytes_written, 15);
        assert_eq!(snap.nodes_created, 1);
    }

    #[test]
    fn derived_values() {
        let snap = StatsSnapshot {
            cache_hits: 3,
            cache_misses: 1,
            slots: 10,
            free_slots: 4,
            ..StatsSnapshot::default()
        };
        assert_eq!(snap.cache_hit_ratio(), Some(0.75));
        assert_eq!(snap.live_nodes(), 6);
        assert_eq!(StatsSnapshot::default().cache_hit_ratio(), None);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StoreStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_cache_hit();
                    s.record_text_written(1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.cache_hits(), 1000);
        assert_eq!(stats.text_bytes_written(), 1000);
    }
}
