//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store underneath one Dominus file.
///
/// A store opens three of these: the node directory, the text pool and the
/// name pool. Backends see plain bytes; record layout, payload framing and
/// free lists are owned by `dominus_core`.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `write_at` never leaves a hole: `offset` must be `<= size()`
/// - `read_at` returns exactly the bytes last written at that range
/// - Backends must be `Send + Sync` so a store can be moved across threads
///   behind an external lock
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ReadPastEnd` if the range extends beyond the current size,
    /// or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Overwrites bytes starting at `offset`.
    ///
    /// Writing past the current end grows the store, as long as the write
    /// starts at or before the end.
    ///
    /// # Errors
    ///
    /// Returns `WritePastEnd` if `offset > size()`, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}
