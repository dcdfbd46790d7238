//! Fault-injecting storage backends.
//!
//! [`FaultyBackend`] wraps another backend and fails growth, in-place
//! writes or syncs on command. The [`FaultSwitch`] stays with the test after the backend has
//! been boxed into a store, so faults can be armed mid-test.

use dominus_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared controls of a [`FaultyBackend`].
#[derive(Debug, Clone)]
pub struct FaultSwitch {
    growth_budget: Arc<AtomicU64>,
    write_countdown: Arc<AtomicU64>,
    keep_failing_writes: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_sync: Arc<AtomicBool>,
    appended: Arc<AtomicU64>,
}

/// Countdown value meaning no one-shot write failure is armed.
const DISARMED: u64 = u64::MAX;

impl Default for FaultSwitch {
    fn default() -> Self {
        Self {
            growth_budget: Arc::new(AtomicU64::new(u64::MAX)),
            write_countdown: Arc::new(AtomicU64::new(DISARMED)),
            keep_failing_writes: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_sync: Arc::new(AtomicBool::new(false)),
            appended: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl FaultSwitch {
    /// Creates a switch with no faults armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows only `bytes` more bytes of growth; later appends fail as if
    /// the device were full.
    pub fn limit_growth(&self, bytes: u64) {
        self.growth_budget.store(bytes, Ordering::SeqCst);
    }

    /// Removes the growth limit.
    pub fn unlimited(&self) {
        self.growth_budget.store(u64::MAX, Ordering::SeqCst);
    }

    /// Lets `skip` more in-place writes through, fails the one after, then
    /// disarms.
    pub fn fail_write_after(&self, skip: u64) {
        self.keep_failing_writes.store(false, Ordering::SeqCst);
        self.write_countdown.store(skip, Ordering::SeqCst);
    }

    /// Lets `skip` more in-place writes through and fails every one after.
    pub fn fail_writes_after(&self, skip: u64) {
        self.keep_failing_writes.store(true, Ordering::SeqCst);
        self.write_countdown.store(skip, Ordering::SeqCst);
    }

    /// Makes every in-place write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes `sync` fail (or succeed again).
    pub fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Total bytes appended through the backend.
    pub fn bytes_appended(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that fails on command.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    switch: FaultSwitch,
}

impl FaultyBackend {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn StorageBackend>, switch: FaultSwitch) -> Self {
        Self { inner, switch }
    }

    /// Wraps a fresh in-memory backend.
    pub fn in_memory(switch: FaultSwitch) -> Self {
        Self::new(Box::new(InMemoryBackend::new()), switch)
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.switch.fail_writes.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        let countdown = self.switch.write_countdown.load(Ordering::SeqCst);
        if countdown != DISARMED {
            if countdown == 0 {
                self.switch.write_countdown.store(DISARMED, Ordering::SeqCst);
                if self.switch.keep_failing_writes.load(Ordering::SeqCst) {
                    self.switch.fail_writes.store(true, Ordering::SeqCst);
                }
                return Err(write_failure());
            }
            self.switch
                .write_countdown
                .store(countdown - 1, Ordering::SeqCst);
        }
        self.inner.write_at(offset, data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let len = data.len() as u64;
        let budget = self.switch.growth_budget.load(Ordering::SeqCst);
        if len > budget {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::StorageFull,
                "simulated full device",
            )));
        }
        if budget != u64::MAX {
            self.switch.growth_budget.store(budget - len, Ordering::SeqCst);
        }
        self.switch.appended.fetch_add(len, Ordering::SeqCst);
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.fail_sync.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated sync failure",
            )));
        }
        self.inner.sync()
    }
}

fn write_failure() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, "simulated write failure"))
}

/// Switches for the three files of a store opened by [`faulty_store`].
#[derive(Debug, Clone, Default)]
pub struct StoreFaults {
    /// Node directory switch.
    pub nodes: FaultSwitch,
    /// Text pool switch.
    pub text: FaultSwitch,
    /// Name pool switch.
    pub names: FaultSwitch,
}

/// Opens an in-memory store whose files all go through [`FaultyBackend`]s.
pub fn faulty_store(config: dominus_core::Config) -> (dominus_core::Store, StoreFaults) {
    let faults = StoreFaults::default();
    let store = dominus_core::Store::open_with_backends(
        config,
        Box::new(FaultyBackend::in_memory(faults.nodes.clone())),
        Box::new(FaultyBackend::in_memory(faults.text.clone())),
        Box::new(FaultyBackend::in_memory(faults.names.clone())),
        Vec::new(),
    )
    .expect("Failed to open faulty store");
    (store, faults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominus_core::{Config, CoreError};

    #[test]
    fn full_text_pool_fails_creation_cleanly() {
        let (store, faults) = faulty_store(Config::default());
        let before = store.stats().unwrap();

        faults.text.limit_growth(3);
        let err = store.create_text("too long for the budget").unwrap_err();
        assert!(matches!(err, CoreError::Allocation { .. }), "got {err}");
        assert_eq!(store.stats().unwrap().slots, before.slots);

        faults.text.unlimited();
        let text = store.create_text("fits now").unwrap();
        assert_eq!(store.get(text).unwrap().text().as_deref(), Some("fits now"));
        assert!(store.verify().unwrap().is_ok());
    }

    #[test]
    fn full_directory_releases_the_text_chunk() {
        let (store, faults) = faulty_store(Config::default());
        faults.nodes.limit_growth(0);

        let err = store.create_text("hello").unwrap_err();
        assert!(matches!(err, CoreError::Allocation { .. }), "got {err}");
        let stats = store.stats().unwrap();
        assert_eq!(stats.slots, 0);
        assert_eq!(stats.text_free_bytes, 6);

        faults.nodes.unlimited();
        store.create_text("hello").unwrap();
        assert_eq!(store.stats().unwrap().text_free_bytes, 0);
    }

    #[test]
    fn sync_failure_is_reported_and_store_stays_open() {
        let (store, faults) = faulty_store(Config::default());
        store.create_comment("c").unwrap();

        faults.nodes.set_fail_sync(true);
        assert!(matches!(store.flush(), Err(CoreError::Storage(_))));
        assert!(store.is_open());

        faults.nodes.set_fail_sync(false);
        store.flush().unwrap();
    }

    /// Three text nodes; freeing the first makes compaction move the other
    /// two.
    fn store_with_movable_text(store: &dominus_core::Store) -> Vec<dominus_core::Eid> {
        let doomed = store.create_text("freed before compaction").unwrap();
        let kept = vec![
            store.create_text("first survivor").unwrap(),
            store.create_text("second survivor").unwrap(),
        ];
        store.free_node(doomed).unwrap();
        kept
    }

    #[test]
    fn failed_repoint_is_rolled_back() {
        let (store, faults) = faulty_store(Config::default());
        let kept = store_with_movable_text(&store);
        let before: Vec<_> = kept.iter().map(|&e| store.record(e).unwrap()).collect();

        // The first record is repointed, the second write fails, and the
        // first is written back.
        faults.nodes.fail_write_after(1);
        let err = store.compact_text_pool().unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)), "got {err}");

        assert!(store.is_open());
        for (&eid, record) in kept.iter().zip(&before) {
            assert_eq!(&store.record(eid).unwrap(), record);
        }
        assert_eq!(store.get(kept[0]).unwrap().text().as_deref(), Some("first survivor"));
        assert_eq!(store.get(kept[1]).unwrap().text().as_deref(), Some("second survivor"));
        assert!(store.verify().unwrap().is_ok());

        let result = store.compact_text_pool().unwrap();
        assert_eq!(result.payloads, 2);
        assert_eq!(store.get(kept[1]).unwrap().text().as_deref(), Some("second survivor"));
    }

    #[test]
    fn unrecoverable_repoint_closes_the_store() {
        let (store, faults) = faulty_store(Config::default());
        let kept = store_with_movable_text(&store);

        // The second repoint fails, and so does writing the first one back.
        faults.nodes.fail_writes_after(1);
        let err = store.compact_text_pool().unwrap_err();
        assert!(matches!(err, CoreError::StoreDamaged { .. }), "got {err}");
        assert!(err.is_fatal());

        assert!(!store.is_open());
        assert!(matches!(store.get(kept[0]), Err(CoreError::StoreClosed)));
        assert!(matches!(store.compact_text_pool(), Err(CoreError::StoreClosed)));
    }

    #[test]
    fn appended_bytes_are_counted() {
        let switch = FaultSwitch::new();
        let mut backend = FaultyBackend::in_memory(switch.clone());
        backend.append(b"abc").unwrap();
        backend.append(b"de").unwrap();
        assert_eq!(switch.bytes_appended(), 5);
    }
}
