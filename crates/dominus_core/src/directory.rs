//! The node directory file.
//!
//! A [`StoreHeader`] followed by a flat array of fixed-size
//! [`NodeRecord`]s. Record `eid` lives at `HEADER_SIZE + eid * record_size`.
//! Slot 0 is written on creation and never handed out, so the NULL handle
//! still has a well-defined offset.
//!
//! ## Free list
//!
//! Freed slots form a singly linked list starting at
//! `header.free_list_head`. A freed record keeps the next pointer in its
//! `parent` field; there is no second on-disk structure.

use crate::error::{CoreError, CoreResult};
use crate::header::{StoreHeader, HEADER_SIZE};
use crate::record::NodeRecord;
use crate::types::{Eid, HandleWidth};
use dominus_storage::StorageBackend;
use tracing::{debug, trace};

/// Random-access array of node records behind a header.
pub struct NodeDirectory {
    backend: Box<dyn StorageBackend>,
    header: StoreHeader,
}

impl NodeDirectory {
    /// Initializes an empty directory on `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the backend is not empty, or an I/O
    /// error.
    pub fn create(mut backend: Box<dyn StorageBackend>, width: HandleWidth) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "cannot create a node directory over existing data",
            ));
        }

        let header = StoreHeader::new(width);
        backend.append(&header.encode())?;
        backend.append(&NodeRecord::zeroed().encode(width)?)?;
        debug!(%width, "created node directory");

        Ok(Self { backend, header })
    }

    /// Opens an existing directory.
    ///
    /// Only the header is read; records are decoded on demand.
    ///
    /// # Errors
    ///
    /// Returns `Format` if the header is invalid, or `CorruptRecord` if the
    /// file does not end on a record boundary or the free list head points
    /// outside the file.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < HEADER_SIZE as u64 {
            return Err(CoreError::format(format!(
                "node directory is {size} bytes, smaller than its header"
            )));
        }

        let header = StoreHeader::decode(&backend.read_at(0, HEADER_SIZE)?)?;
        let record_size = header.width.record_size() as u64;
        let body = size - HEADER_SIZE as u64;

        if body == 0 || body % record_size != 0 {
            return Err(CoreError::corrupt(format!(
                "node directory body of {body} bytes is not a whole number of {record_size}-byte records"
            )));
        }

        let directory = Self { backend, header };
        let slots = directory.slot_count()?;
        for (what, eid) in [("free list head", header.free_list_head), ("root", header.root)] {
            if eid.as_u64() >= slots {
                return Err(CoreError::corrupt(format!(
                    "{what} {eid} beyond {slots} slots"
                )));
            }
        }

        debug!(width = %header.width, slots, "opened node directory");
        Ok(directory)
    }

    /// Returns the decoded header.
    #[must_use]
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Returns the handle width.
    #[must_use]
    pub fn width(&self) -> HandleWidth {
        self.header.width
    }

    /// Byte offset of a record.
    #[must_use]
    pub fn offset_of(&self, eid: Eid) -> u64 {
        HEADER_SIZE as u64 + eid.as_u64() * self.header.width.record_size() as u64
    }

    /// Number of slots in the file, including the reserved slot 0.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file size cannot be read.
    pub fn slot_count(&self) -> CoreResult<u64> {
        let size = self.backend.size()?;
        Ok(size.saturating_sub(HEADER_SIZE as u64) / self.header.width.record_size() as u64)
    }

    /// Reads and decodes one record.
    ///
    /// # Errors
    ///
    /// Returns `NullHandle` for handle 0, `HandleOutOfRange` past the end of
    /// the file, and `CorruptRecord` for undecodable bytes.
    pub fn read_record(&self, eid: Eid) -> CoreResult<NodeRecord> {
        self.check_handle(eid)?;
        let data = self
            .backend
            .read_at(self.offset_of(eid), self.header.width.record_size())?;
        trace!(%eid, "read record");
        NodeRecord::decode(&data, self.header.width).map_err(|e| match e {
            CoreError::CorruptRecord { message } => {
                CoreError::corrupt(format!("{eid}: {message}"))
            }
            other => other,
        })
    }

    /// Encodes and writes one record in place.
    ///
    /// # Errors
    ///
    /// Same handle checks as [`read_record`](Self::read_record), plus
    /// `ValueOutOfRange` if a field overflows the width.
    pub fn write_record(&mut self, eid: Eid, record: &NodeRecord) -> CoreResult<()> {
        self.check_handle(eid)?;
        let data = record.encode(self.header.width)?;
        let offset = self.offset_of(eid);
        self.backend.write_at(offset, &data)?;
        trace!(%eid, kind = %record.kind, "wrote record");
        Ok(())
    }

    /// Returns a fresh slot, reusing the free list before growing the file.
    ///
    /// The returned slot holds a zeroed record; the caller writes the real
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the handle space of the width is exhausted or
    /// the device is full, and `CorruptRecord` if the free list is damaged.
    pub fn allocate(&mut self) -> CoreResult<Eid> {
        let head = self.header.free_list_head;
        if !head.is_null() {
            let record = self.read_record(head)?;
            if !record.is_free() {
                return Err(CoreError::corrupt(format!(
                    "free list head {head} holds a live {} node",
                    record.kind
                )));
            }
            self.write_record(head, &NodeRecord::zeroed())?;
            self.set_free_list_head(record.next_free())?;
            trace!(eid = %head, "reused free slot");
            return Ok(head);
        }

        let eid = Eid(self.slot_count()?);
        if eid.as_u64() > self.header.width.max_value() {
            return Err(CoreError::allocation(format!(
                "{} handles exhausted at {eid}",
                self.header.width
            )));
        }

        let data = NodeRecord::zeroed().encode(self.header.width)?;
        self.backend
            .append(&data)
            .map_err(|e| CoreError::from_growth("node directory", e))?;
        trace!(%eid, "appended slot");
        Ok(eid)
    }

    /// Pushes a detached record onto the free list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFree` if the record still has a parent, siblings or
    /// children, or is already free.
    pub fn free(&mut self, eid: Eid) -> CoreResult<()> {
        let record = self.read_record(eid)?;
        if record.is_free() {
            return Err(CoreError::invalid_free(format!("{eid} is already free")));
        }
        if !record.is_detached() {
            return Err(CoreError::invalid_free(format!(
                "{eid} is still linked (parent {}, siblings {}/{}, first child {})",
                record.parent, record.previous_sibling, record.next_sibling, record.first_child
            )));
        }

        let next = self.header.free_list_head;
        self.write_record(eid, &NodeRecord::free_marker(next))?;
        self.set_free_list_head(eid)?;
        if self.header.root == eid {
            self.set_root(Eid::NULL)?;
        }
        trace!(%eid, "freed slot");
        Ok(())
    }

    /// Records the document root in the header.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the header cannot be written.
    pub fn set_root(&mut self, root: Eid) -> CoreResult<()> {
        self.header.root = root;
        self.write_header()
    }

    /// Walks the free list and returns its slots in order.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` on a cycle or a live record in the list.
    pub fn free_slots(&self) -> CoreResult<Vec<Eid>> {
        let mut slots = Vec::new();
        let mut current = self.header.free_list_head;
        let limit = self.slot_count()?;

        while !current.is_null() {
            if slots.len() as u64 >= limit {
                return Err(CoreError::corrupt("free list contains a cycle"));
            }
            let record = self.read_record(current)?;
            if !record.is_free() {
                return Err(CoreError::corrupt(format!(
                    "free list entry {current} holds a live {} node",
                    record.kind
                )));
            }
            slots.push(current);
            current = record.next_free();
        }

        Ok(slots)
    }

    /// Iterates over every non-reserved handle, live or free.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file size cannot be read.
    pub fn handles(&self) -> CoreResult<impl Iterator<Item = Eid>> {
        Ok((1..self.slot_count()?).map(Eid))
    }

    /// Flushes pending writes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Syncs the file to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Size of the directory file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    fn check_handle(&self, eid: Eid) -> CoreResult<()> {
        if eid.is_null() {
            return Err(CoreError::NullHandle);
        }
        let slots = self.slot_count()?;
        if eid.as_u64() >= slots {
            return Err(CoreError::HandleOutOfRange {
                eid: eid.as_u64(),
                slots,
            });
        }
        Ok(())
    }

    fn set_free_list_head(&mut self, head: Eid) -> CoreResult<()> {
        self.header.free_list_head = head;
        self.write_header()
    }

    fn write_header(&mut self) -> CoreResult<()> {
        self.backend.write_at(0, &self.header.encode())?;
        Ok(())
    }
}

impl std::fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("header", &self.header)
            .field("slots", &self.slot_count().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NameCode, NodeKind};
    use dominus_storage::{FileBackend, InMemoryBackend, StorageError, StorageResult};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn directory(width: HandleWidth) -> NodeDirectory {
        NodeDirectory::create(Box::new(InMemoryBackend::new()), width).unwrap()
    }

    /// Memory backend whose `size` can be made to fail.
    struct SizeFailing {
        inner: InMemoryBackend,
        fail: Arc<AtomicBool>,
    }

    impl StorageBackend for SizeFailing {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
            self.inner.write_at(offset, data)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "size unavailable",
                )));
            }
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }
    }

    #[test]
    fn size_errors_propagate() {
        let fail = Arc::new(AtomicBool::new(false));
        let backend = SizeFailing {
            inner: InMemoryBackend::new(),
            fail: Arc::clone(&fail),
        };
        let mut dir = NodeDirectory::create(Box::new(backend), HandleWidth::Four).unwrap();
        let eid = dir.allocate().unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(dir.slot_count(), Err(CoreError::Storage(_))));
        assert!(dir.handles().is_err());
        assert!(matches!(dir.read_record(eid), Err(CoreError::Storage(_))));
        assert!(matches!(dir.allocate(), Err(CoreError::Storage(_))));

        fail.store(false, Ordering::SeqCst);
        assert_eq!(dir.slot_count().unwrap(), 2);
    }

    #[test]
    fn create_writes_header_and_reserved_slot() {
        let dir = directory(HandleWidth::Four);
        assert_eq!(dir.slot_count().unwrap(), 1);
        assert_eq!(dir.size().unwrap(), (HEADER_SIZE + 30) as u64);
        assert_eq!(dir.handles().unwrap().count(), 0);
    }

    #[test]
    fn offsets_follow_record_size() {
        for width in HandleWidth::ALL {
            let dir = directory(width);
            let expected = HEADER_SIZE as u64 + 7 * width.record_size() as u64;
            assert_eq!(dir.offset_of(Eid(7)), expected);
        }
    }

    #[test]
    fn allocate_is_sequential() {
        let mut dir = directory(HandleWidth::Two);
        assert_eq!(dir.allocate().unwrap(), Eid(1));
        assert_eq!(dir.allocate().unwrap(), Eid(2));
        assert_eq!(dir.allocate().unwrap(), Eid(3));
        assert_eq!(dir.slot_count().unwrap(), 4);
    }

    #[test]
    fn write_then_read_record() {
        let mut dir = directory(HandleWidth::Four);
        let eid = dir.allocate().unwrap();
        let record = NodeRecord::new(NodeKind::Element, NameCode(16));
        dir.write_record(eid, &record).unwrap();
        assert_eq!(dir.read_record(eid).unwrap(), record);
    }

    #[test]
    fn null_handle_is_rejected() {
        let dir = directory(HandleWidth::Four);
        let err = dir.read_record(Eid::NULL).unwrap_err();
        assert!(matches!(err, CoreError::NullHandle));
        assert!(err.is_out_of_range());
    }

    #[test]
    fn handle_beyond_extent_is_out_of_range() {
        let mut dir = directory(HandleWidth::Four);
        dir.allocate().unwrap();
        let err = dir.read_record(Eid(2)).unwrap_err();
        assert!(matches!(err, CoreError::HandleOutOfRange { eid: 2, slots: 2 }));
        assert!(err.is_out_of_range());
    }

    #[test]
    fn damaged_bytes_in_range_are_corrupt() {
        let mut data = StoreHeader::new(HandleWidth::Two).encode().to_vec();
        data.extend(NodeRecord::zeroed().encode(HandleWidth::Two).unwrap());
        let mut bad = NodeRecord::new(NodeKind::Text, NameCode::TEXT)
            .encode(HandleWidth::Two)
            .unwrap();
        bad[10] = 0x63;
        data.extend(bad);

        let dir = NodeDirectory::open(Box::new(InMemoryBackend::with_data(data))).unwrap();
        let err = dir.read_record(Eid(1)).unwrap_err();
        assert!(matches!(err, CoreError::CorruptRecord { .. }));
        assert!(!err.is_out_of_range());
    }

    #[test]
    fn free_requires_detached_record() {
        let mut dir = directory(HandleWidth::Four);
        let a = dir.allocate().unwrap();
        let b = dir.allocate().unwrap();
        let mut record = NodeRecord::new(NodeKind::Element, NameCode(16));
        record.first_child = b;
        dir.write_record(a, &record).unwrap();

        assert!(matches!(dir.free(a), Err(CoreError::InvalidFree { .. })));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut dir = directory(HandleWidth::Four);
        let a = dir.allocate().unwrap();
        dir.write_record(a, &NodeRecord::new(NodeKind::Text, NameCode::TEXT))
            .unwrap();
        dir.free(a).unwrap();
        assert!(matches!(dir.free(a), Err(CoreError::InvalidFree { .. })));
    }

    #[test]
    fn freed_slots_are_reused_lifo() {
        let mut dir = directory(HandleWidth::Four);
        let handles: Vec<Eid> = (0..4).map(|_| dir.allocate().unwrap()).collect();
        for &eid in &handles {
            dir.write_record(eid, &NodeRecord::new(NodeKind::Comment, NameCode::COMMENT))
                .unwrap();
        }

        dir.free(handles[1]).unwrap();
        dir.free(handles[3]).unwrap();
        assert_eq!(dir.header().free_list_head, handles[3]);
        assert_eq!(dir.free_slots().unwrap(), vec![handles[3], handles[1]]);

        // The freed record carries the next pointer in its parent field.
        let marker = dir.read_record(handles[3]).unwrap();
        assert!(marker.is_free());
        assert_eq!(marker.parent, handles[1]);

        assert_eq!(dir.allocate().unwrap(), handles[3]);
        assert_eq!(dir.allocate().unwrap(), handles[1]);
        assert_eq!(dir.allocate().unwrap(), Eid(5));
        assert!(dir.header().free_list_head.is_null());
        assert_eq!(dir.read_record(handles[3]).unwrap(), NodeRecord::zeroed());
    }

    #[test]
    fn handle_space_exhaustion_is_allocation_error() {
        let mut data = StoreHeader::new(HandleWidth::Two).encode().to_vec();
        data.resize(HEADER_SIZE + 65_536 * HandleWidth::Two.record_size(), 0);
        let mut dir = NodeDirectory::open(Box::new(InMemoryBackend::with_data(data))).unwrap();

        assert_eq!(dir.slot_count().unwrap(), 65_536);
        assert!(matches!(dir.allocate(), Err(CoreError::Allocation { .. })));
    }

    #[test]
    fn open_rejects_bad_magic_without_reading_records() {
        let mut data = StoreHeader::new(HandleWidth::Four).encode().to_vec();
        data[..8].copy_from_slice(b"NOTEDIR!");
        // Garbage where the records would be.
        data.extend(std::iter::repeat(0xEE).take(30 * 3));

        let err = NodeDirectory::open(Box::new(InMemoryBackend::with_data(data))).unwrap_err();
        assert!(matches!(err, CoreError::Format { .. }));
    }

    #[test]
    fn open_rejects_partial_trailing_record() {
        let mut dir_bytes = StoreHeader::new(HandleWidth::Four).encode().to_vec();
        dir_bytes.extend(vec![0u8; 30 + 7]);
        let err = NodeDirectory::open(Box::new(InMemoryBackend::with_data(dir_bytes))).unwrap_err();
        assert!(matches!(err, CoreError::CorruptRecord { .. }));
    }

    #[test]
    fn reopen_preserves_records_and_free_list() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nodes.edir");

        let (a, b) = {
            let backend = FileBackend::open(&path).unwrap();
            let mut dir = NodeDirectory::create(Box::new(backend), HandleWidth::Eight).unwrap();
            let a = dir.allocate().unwrap();
            let b = dir.allocate().unwrap();
            dir.write_record(a, &NodeRecord::new(NodeKind::Document, NameCode::DOCUMENT))
                .unwrap();
            dir.write_record(b, &NodeRecord::new(NodeKind::Text, NameCode::TEXT))
                .unwrap();
            dir.set_root(a).unwrap();
            dir.free(b).unwrap();
            dir.sync().unwrap();
            (a, b)
        };

        let dir = NodeDirectory::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
        assert_eq!(dir.width(), HandleWidth::Eight);
        assert_eq!(dir.header().root, a);
        assert_eq!(dir.header().free_list_head, b);
        assert_eq!(dir.read_record(a).unwrap().kind, NodeKind::Document);
    }
}
