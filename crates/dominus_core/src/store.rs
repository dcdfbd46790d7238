//! Store facade.

use crate::cache::NodeCache;
use crate::compaction::{CompactionResult, TextCompactor};
use crate::config::Config;
use crate::dir::StoreDir;
use crate::directory::NodeDirectory;
use crate::error::{CoreError, CoreResult};
use crate::header::StoreHeader;
use crate::name_pool::NamePool;
use crate::node::{encode_attributes, hydrate, Attribute, NodeRef, Payload};
use crate::record::{NodeRecord, ORDINAL_UNKNOWN};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::text_pool::{FreeChunk, TextPool};
use crate::types::{Eid, HandleWidth, NameCode, NodeKind};
use crate::verify::{verify, VerifyReport};
use dominus_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// The main store handle.
///
/// `Store` ties the node directory, text pool, name pool and node cache
/// together. All cross-node references are [`Eid`] handles resolved through
/// [`Store::get`].
///
/// # Opening a Store
///
/// ```rust,ignore
/// use dominus_core::{NodeKind, Payload, Store};
/// use std::path::Path;
///
/// let store = Store::open(Path::new("book.dominus"))?;
/// let doc = store.create_document()?;
/// store.set_root(doc)?;
/// let title = store.create_element("title", Vec::new())?;
/// store.append_child(doc, title)?;
/// store.flush()?;
/// ```
///
/// # Concurrency
///
/// One writer. Every operation takes the same internal lock, so a cache
/// lookup can never interleave with a relink or an eviction.
pub struct Store {
    config: Config,
    /// Store directory (holds the lock). None for in-memory stores.
    dir: Option<StoreDir>,
    inner: Mutex<StoreInner>,
    stats: Arc<StoreStats>,
    is_open: RwLock<bool>,
}

struct StoreInner {
    directory: NodeDirectory,
    text: TextPool,
    names: NamePool,
    cache: NodeCache,
}

impl Store {
    /// Opens or creates a store in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the store locked (`StoreLocked`)
    /// - A file has the wrong magic or an incompatible version (`Format`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a store with custom configuration.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), plus `InvalidOperation` for an invalid
    /// configuration or when `create_if_missing`/`error_if_exists` forbid
    /// the open.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let is_new = dir.is_new_store();

        if is_new && !config.create_if_missing {
            return Err(CoreError::invalid_operation(
                "store does not exist and create_if_missing is false",
            ));
        }
        if !is_new && config.error_if_exists {
            return Err(CoreError::invalid_operation(
                "store already exists and error_if_exists is true",
            ));
        }

        let zero_fill = config.zero_fill_freed_text;
        let (directory, text, names) = if is_new {
            dir.remove_text_pool_temp()?;
            let text = TextPool::create(
                Box::new(FileBackend::create(&dir.text_pool_path())?),
                zero_fill,
            )?;
            let names = NamePool::create(Box::new(FileBackend::create(&dir.names_path())?))?;
            dir.save_free_list(&[])?;
            // The node directory goes last: its presence marks a complete store.
            let directory = NodeDirectory::create(
                Box::new(FileBackend::create(&dir.nodes_path())?),
                config.handle_width,
            )?;
            (directory, text, names)
        } else {
            let directory = NodeDirectory::open(Box::new(FileBackend::open(&dir.nodes_path())?))?;
            if directory.width() != config.handle_width {
                debug!(
                    stored = %directory.width(),
                    configured = %config.handle_width,
                    "using handle width from the store header"
                );
            }
            let text = TextPool::open(
                Box::new(FileBackend::open(&dir.text_pool_path())?),
                dir.load_free_list()?,
                zero_fill,
            )?;
            let names = NamePool::open(Box::new(FileBackend::open(&dir.names_path())?))?;
            (directory, text, names)
        };

        debug!(path = %path.display(), created = is_new, "opened store");
        let store = Self::from_parts(config, Some(dir), directory, text, names)?;
        if is_new {
            store.flush()?;
        }
        Ok(store)
    }

    /// Opens a store over the given backends.
    ///
    /// An empty node directory backend creates a new store; the other two
    /// backends must then be empty as well.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus the locking.
    pub fn open_with_backends(
        config: Config,
        nodes: Box<dyn StorageBackend>,
        text: Box<dyn StorageBackend>,
        names: Box<dyn StorageBackend>,
        free_text: Vec<FreeChunk>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let zero_fill = config.zero_fill_freed_text;
        let (directory, text, names) = if nodes.size()? == 0 {
            (
                NodeDirectory::create(nodes, config.handle_width)?,
                TextPool::create(text, zero_fill)?,
                NamePool::create(names)?,
            )
        } else {
            (
                NodeDirectory::open(nodes)?,
                TextPool::open(text, free_text, zero_fill)?,
                NamePool::open(names)?,
            )
        };
        Self::from_parts(config, None, directory, text, names)
    }

    /// Opens a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error only if the configuration is invalid.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a fresh in-memory store with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the configuration is invalid.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        Self::open_with_backends(
            config,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Vec::new(),
        )
    }

    fn from_parts(
        config: Config,
        dir: Option<StoreDir>,
        directory: NodeDirectory,
        text: TextPool,
        names: NamePool,
    ) -> CoreResult<Self> {
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| CoreError::invalid_operation("cache capacity must be at least one node"))?;
        let stats = Arc::new(StoreStats::new());
        let cache = NodeCache::new(capacity, Arc::clone(&stats));

        Ok(Self {
            config,
            dir,
            inner: Mutex::new(StoreInner {
                directory,
                text,
                names,
                cache,
            }),
            stats,
            is_open: RwLock::new(true),
        })
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Returns the hydrated node for `eid`.
    ///
    /// While the node stays resident, repeated calls return the same shared
    /// object. After eviction the next call hydrates a new object from disk.
    ///
    /// # Errors
    ///
    /// Returns `NullHandle`/`HandleOutOfRange` for bad handles,
    /// `FreedHandle` for a reclaimed slot, and `CorruptRecord` if the record
    /// or its payload cannot be decoded.
    pub fn get(&self, eid: Eid) -> CoreResult<NodeRef> {
        self.ensure_open()?;
        self.inner.lock().load(eid)
    }

    /// Reads the raw record of any slot, including free ones.
    ///
    /// # Errors
    ///
    /// Returns handle range errors and `CorruptRecord`.
    pub fn record(&self, eid: Eid) -> CoreResult<NodeRecord> {
        self.ensure_open()?;
        self.inner.lock().directory.read_record(eid)
    }

    /// Returns the registered document root, if any.
    #[must_use]
    pub fn root(&self) -> Option<Eid> {
        self.inner.lock().directory.header().root.non_null()
    }

    /// Returns a copy of the node directory header.
    #[must_use]
    pub fn header(&self) -> StoreHeader {
        *self.inner.lock().directory.header()
    }

    /// Returns the handle width of this store.
    #[must_use]
    pub fn width(&self) -> HandleWidth {
        self.inner.lock().directory.width()
    }

    /// Byte offset of a record in the node directory.
    #[must_use]
    pub fn offset_of(&self, eid: Eid) -> u64 {
        self.inner.lock().directory.offset_of(eid)
    }

    /// Every non-reserved handle, live or free.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed`, or an I/O error if the directory size cannot
    /// be read.
    pub fn handles(&self) -> CoreResult<Vec<Eid>> {
        self.ensure_open()?;
        Ok(self.inner.lock().directory.handles()?.collect())
    }

    /// Returns the children of `eid` in order.
    ///
    /// # Errors
    ///
    /// Returns handle errors, or `CorruptRecord` if the sibling chain does
    /// not terminate.
    pub fn children(&self, eid: Eid) -> CoreResult<Vec<Eid>> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        let record = inner.live_record(eid)?;
        inner.children_of(eid, &record)
    }

    /// Returns the position of `eid` among its siblings, or `None` for a
    /// node without a parent.
    ///
    /// A cached ordinal is returned directly. Otherwise the previous
    /// siblings are walked back to the nearest known ordinal and every
    /// position computed on the way is written back.
    ///
    /// # Errors
    ///
    /// Returns handle errors, or `CorruptRecord` for a broken sibling chain.
    pub fn child_ordinal(&self, eid: Eid) -> CoreResult<Option<u64>> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let record = inner.live_record(eid)?;
        if record.parent.is_null() {
            return Ok(None);
        }
        if let Some(ordinal) = record.ordinal() {
            return Ok(Some(u64::from(ordinal)));
        }

        let limit = inner.directory.slot_count()?;
        let mut path = vec![(eid, record)];
        let mut base = 0u64;
        let mut current = record.previous_sibling;
        while !current.is_null() {
            if path.len() as u64 > limit {
                return Err(CoreError::corrupt(format!(
                    "sibling chain before {eid} does not terminate"
                )));
            }
            let sibling = inner.live_record(current)?;
            if let Some(ordinal) = sibling.ordinal() {
                base = u64::from(ordinal) + 1;
                break;
            }
            path.push((current, sibling));
            current = sibling.previous_sibling;
        }

        let mut position = base;
        for (sibling, mut record) in path.into_iter().rev() {
            record.child_ordinal = cached_ordinal(position);
            if record.child_ordinal != ORDINAL_UNKNOWN {
                inner.put(sibling, &record)?;
            }
            position += 1;
        }
        trace!(%eid, ordinal = position - 1, "computed child ordinal");
        Ok(Some(position - 1))
    }

    /// Returns the name bound to `code`.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed`, or `UnknownNameCode` if the code was never
    /// assigned.
    pub fn name_of(&self, code: NameCode) -> CoreResult<String> {
        self.ensure_open()?;
        Ok(self.inner.lock().names.name_of(code)?.to_string())
    }

    /// Every interned name in code order.
    #[must_use]
    pub fn names(&self) -> Vec<(NameCode, String)> {
        self.inner
            .lock()
            .names
            .iter()
            .map(|(code, name)| (code, name.to_string()))
            .collect()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Creates an unlinked node and returns its handle.
    ///
    /// Elements and processing instructions need a `name` (the element name
    /// or the instruction target). Other kinds take their pseudo-name and
    /// accept either no name or that pseudo-name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a missing or unexpected name, a
    /// payload that does not suit the kind, or `NodeKind::Free`, and
    /// `Allocation` when a file cannot grow or handles run out.
    pub fn create_node(&self, kind: NodeKind, name: Option<&str>, payload: Payload) -> CoreResult<Eid> {
        self.ensure_open()?;
        if kind == NodeKind::Free {
            return Err(CoreError::invalid_operation("cannot create a free node"));
        }
        payload.check_kind(kind)?;
        let mut inner = self.inner.lock();

        let name_code = match (kind.pseudo_name(), name) {
            (Some(code), None) => code,
            (Some(code), Some(given)) => {
                if inner.names.lookup(given) != Some(code) {
                    return Err(CoreError::invalid_operation(format!(
                        "{kind} nodes cannot be named {given:?}"
                    )));
                }
                code
            }
            (None, Some(given)) => inner.names.code_of(given)?,
            (None, None) => {
                return Err(CoreError::invalid_operation(format!("{kind} node needs a name")))
            }
        };

        let text_start = inner.store_payload(&payload, &self.stats)?;
        let eid = match inner.directory.allocate() {
            Ok(eid) => eid,
            Err(e) => {
                inner.release_text(text_start, &self.stats)?;
                return Err(e);
            }
        };

        let mut record = NodeRecord::new(kind, name_code);
        record.text_start = text_start;
        inner.directory.write_record(eid, &record)?;
        self.stats.record_node_created();
        trace!(%eid, %kind, "created node");
        Ok(eid)
    }

    /// Creates a document node.
    ///
    /// # Errors
    ///
    /// Same as [`create_node`](Self::create_node).
    pub fn create_document(&self) -> CoreResult<Eid> {
        self.create_node(NodeKind::Document, None, Payload::None)
    }

    /// Creates an element with the given attributes.
    ///
    /// # Errors
    ///
    /// Same as [`create_node`](Self::create_node).
    pub fn create_element(&self, name: &str, attributes: Vec<Attribute>) -> CoreResult<Eid> {
        let payload = if attributes.is_empty() {
            Payload::None
        } else {
            Payload::Attributes(attributes)
        };
        self.create_node(NodeKind::Element, Some(name), payload)
    }

    /// Creates a text node.
    ///
    /// # Errors
    ///
    /// Same as [`create_node`](Self::create_node).
    pub fn create_text(&self, text: &str) -> CoreResult<Eid> {
        self.create_node(NodeKind::Text, None, Payload::text(text))
    }

    /// Creates a CDATA section.
    ///
    /// # Errors
    ///
    /// Same as [`create_node`](Self::create_node).
    pub fn create_cdata(&self, text: &str) -> CoreResult<Eid> {
        self.create_node(NodeKind::CData, None, Payload::text(text))
    }

    /// Creates a comment.
    ///
    /// # Errors
    ///
    /// Same as [`create_node`](Self::create_node).
    pub fn create_comment(&self, text: &str) -> CoreResult<Eid> {
        self.create_node(NodeKind::Comment, None, Payload::text(text))
    }

    /// Creates a processing instruction.
    ///
    /// # Errors
    ///
    /// Same as [`create_node`](Self::create_node).
    pub fn create_pi(&self, target: &str, data: &str) -> CoreResult<Eid> {
        self.create_node(NodeKind::ProcessingInstruction, Some(target), Payload::text(data))
    }

    /// Registers a document node as the store root.
    ///
    /// # Errors
    ///
    /// Returns `Hierarchy` if `eid` is not a parentless document node.
    pub fn set_root(&self, eid: Eid) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let record = inner.live_record(eid)?;
        if record.kind != NodeKind::Document {
            return Err(CoreError::hierarchy(format!(
                "root must be a document node, {eid} is a {} node",
                record.kind
            )));
        }
        if !record.parent.is_null() {
            return Err(CoreError::hierarchy(format!("document {eid} has a parent")));
        }
        inner.directory.set_root(eid)
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Links `child` under `parent` at position `index`.
    ///
    /// `index` may equal the current child count to append.
    ///
    /// # Errors
    ///
    /// Returns `Hierarchy` if the child already has a parent, the link would
    /// create a cycle, the parent cannot have children, the child is a
    /// document, or `index` is past the end.
    pub fn link_child(&self, parent: Eid, child: Eid, index: usize) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let (parent_record, _) = inner.check_link(parent, child)?;
        let children = inner.children_of(parent, &parent_record)?;

        if index > children.len() {
            return Err(CoreError::hierarchy(format!(
                "index {index} out of bounds: {parent} has {} children",
                children.len()
            )));
        }

        let prev = index.checked_sub(1).map_or(Eid::NULL, |i| children[i]);
        let next = children.get(index).copied().unwrap_or(Eid::NULL);
        inner.splice(parent, child, prev, next, cached_ordinal(index as u64))?;
        self.stats.record_link();
        Ok(())
    }

    /// Links `child` as the last child of `parent`.
    ///
    /// # Errors
    ///
    /// Same as [`link_child`](Self::link_child).
    pub fn append_child(&self, parent: Eid, child: Eid) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let (parent_record, _) = inner.check_link(parent, child)?;
        let children = inner.children_of(parent, &parent_record)?;
        let prev = children.last().copied().unwrap_or(Eid::NULL);
        inner.splice(parent, child, prev, Eid::NULL, cached_ordinal(children.len() as u64))?;
        self.stats.record_link();
        Ok(())
    }

    /// Links `child` under `parent` directly after `reference`, or as the
    /// first child when `reference` is NULL.
    ///
    /// Runs in constant time, which makes it the building block for
    /// streaming construction.
    ///
    /// # Errors
    ///
    /// Same as [`link_child`](Self::link_child), plus `Hierarchy` if
    /// `reference` is not a child of `parent`.
    pub fn insert_after(&self, parent: Eid, reference: Eid, child: Eid) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let (parent_record, _) = inner.check_link(parent, child)?;

        let (prev, next, ordinal) = if reference.is_null() {
            (Eid::NULL, parent_record.first_child, 0)
        } else {
            let reference_record = inner.live_record(reference)?;
            if reference_record.parent != parent {
                return Err(CoreError::hierarchy(format!(
                    "{reference} is not a child of {parent}"
                )));
            }
            let ordinal = reference_record
                .ordinal()
                .map_or(ORDINAL_UNKNOWN, |o| cached_ordinal(u64::from(o) + 1));
            (reference, reference_record.next_sibling, ordinal)
        };

        inner.splice(parent, child, prev, next, ordinal)?;
        self.stats.record_link();
        Ok(())
    }

    /// Detaches `eid` from its parent and siblings.
    ///
    /// The node keeps its own children. Unlinking is the only way to make a
    /// linked node freeable.
    ///
    /// # Errors
    ///
    /// Returns `Hierarchy` if the node has no parent.
    pub fn unlink(&self, eid: Eid) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        inner.detach(eid)?;
        self.stats.record_unlink();
        Ok(())
    }

    // ========================================================================
    // Mutation and reclamation
    // ========================================================================

    /// Replaces the payload of `eid`.
    ///
    /// The new payload is written to a fresh chunk before the old chunk is
    /// freed. A resident node is updated in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the payload does not suit the node's
    /// kind, plus handle and allocation errors.
    pub fn set_payload(&self, eid: Eid, payload: Payload) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let mut record = inner.live_record(eid)?;
        payload.check_kind(record.kind)?;

        let old = record.text_start;
        record.text_start = inner.store_payload(&payload, &self.stats)?;
        if let Err(e) = inner.directory.write_record(eid, &record) {
            inner.release_text(record.text_start, &self.stats)?;
            return Err(e);
        }
        inner.release_text(old, &self.stats)?;

        if let Some(node) = inner.cache.peek(eid) {
            node.set_record(record);
            node.set_payload(payload);
        }
        Ok(())
    }

    /// Frees an unlinked, childless node: its text chunk, then its slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFree` if the node is still linked or already free.
    pub fn free_node(&self, eid: Eid) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let record = inner.directory.read_record(eid)?;
        if record.is_free() {
            return Err(CoreError::invalid_free(format!("{eid} is already free")));
        }
        if !record.is_detached() {
            return Err(CoreError::invalid_free(format!(
                "{eid} must be unlinked and childless before it is freed"
            )));
        }
        inner.reclaim(eid, &record, &self.stats)
    }

    /// Unlinks `eid` if needed and frees it with all its descendants.
    ///
    /// Returns the number of nodes freed.
    ///
    /// # Errors
    ///
    /// Returns handle errors and `CorruptRecord` for a broken subtree.
    pub fn free_subtree(&self, eid: Eid) -> CoreResult<u64> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        if !inner.live_record(eid)?.parent.is_null() {
            inner.detach(eid)?;
            self.stats.record_unlink();
        }

        let mut order = Vec::new();
        let mut stack = vec![eid];
        let limit = inner.directory.slot_count()?;
        while let Some(current) = stack.pop() {
            if order.len() as u64 > limit {
                return Err(CoreError::corrupt(format!("subtree of {eid} contains a cycle")));
            }
            let record = inner.live_record(current)?;
            stack.extend(inner.children_of(current, &record)?);
            order.push(current);
        }

        // Descendants follow their ancestors in pre-order; reversed, every
        // node is freed after its children.
        for &node in order.iter().rev() {
            let mut record = inner.live_record(node)?;
            record.parent = Eid::NULL;
            record.previous_sibling = Eid::NULL;
            record.next_sibling = Eid::NULL;
            record.first_child = Eid::NULL;
            inner.directory.write_record(node, &record)?;
            inner.reclaim(node, &record, &self.stats)?;
        }
        debug!(%eid, nodes = order.len(), "freed subtree");
        Ok(order.len() as u64)
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Drops `eid` from the node cache. Returns whether it was resident.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` after [`close`](Self::close).
    pub fn evict(&self, eid: Eid) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.lock().cache.evict(eid))
    }

    /// Drops every resident node.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` after [`close`](Self::close).
    pub fn clear_cache(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.inner.lock().cache.clear();
        Ok(())
    }

    /// Whether `eid` is currently resident.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` after [`close`](Self::close).
    pub fn is_resident(&self, eid: Eid) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.lock().cache.contains(eid))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Scans the whole store for broken invariants.
    ///
    /// # Errors
    ///
    /// Returns only I/O failures; problems are listed in the report.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        verify(&inner.directory, &inner.text, &inner.names)
    }

    /// Returns counters and current sizes.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` if the free list is damaged, or an I/O error.
    pub fn stats(&self) -> CoreResult<StatsSnapshot> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        let mut snapshot = self.stats.snapshot();
        snapshot.slots = inner.directory.slot_count()?.saturating_sub(1);
        snapshot.free_slots = inner.directory.free_slots()?.len() as u64;
        snapshot.cached_nodes = inner.cache.len() as u64;
        snapshot.names = inner.names.len() as u64;
        snapshot.directory_bytes = inner.directory.size()?;
        snapshot.text_pool_bytes = inner.text.size()?;
        snapshot.text_free_bytes = inner.text.free_bytes();
        Ok(snapshot)
    }

    /// Computes what [`compact_text_pool`](Self::compact_text_pool) would
    /// reclaim without changing anything.
    ///
    /// # Errors
    ///
    /// Returns read errors from the directory or the text pool.
    pub fn estimate_compaction(&self) -> CoreResult<CompactionResult> {
        self.ensure_open()?;
        let inner = self.inner.lock();
        TextCompactor::new(&inner.directory, &inner.text).plan()
    }

    /// Rewrites the text pool in document order and swaps it in.
    ///
    /// Records are repointed at their new offsets while the old pool is
    /// still in place. For a store on disk the new pool is written to a
    /// temp file, synced, and renamed over the old one, so either the old or
    /// the new pool is visible, never a partial one. The free list is
    /// emptied.
    ///
    /// # Errors
    ///
    /// Returns read errors from the old pool and write errors from the new
    /// one. A failure before the swap restores the repointed records and
    /// leaves the store unchanged. If the records cannot be restored, or the
    /// swapped pool cannot be reopened, the store is closed and
    /// `StoreDamaged` is returned.
    pub fn compact_text_pool(&self) -> CoreResult<CompactionResult> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        let StoreInner {
            directory,
            text,
            cache,
            ..
        } = &mut *inner;
        let zero_fill = self.config.zero_fill_freed_text;

        let backend: Box<dyn StorageBackend> = match &self.dir {
            Some(dir) => {
                dir.remove_text_pool_temp()?;
                Box::new(FileBackend::create(&dir.text_pool_temp_path())?)
            }
            None => Box::new(InMemoryBackend::new()),
        };
        let mut fresh = TextPool::create(backend, zero_fill)?;
        let (moved, result) = TextCompactor::new(directory, text).copy_into(&mut fresh)?;
        fresh.sync()?;

        let mut repointed = Vec::with_capacity(moved.len());
        if let Err(e) = repoint_records(directory, &moved, &mut repointed) {
            return Err(self.undo_repoint(directory, &repointed, e));
        }

        *text = match &self.dir {
            Some(dir) => {
                drop(fresh);
                if let Err(e) = dir.install_text_pool() {
                    return Err(self.undo_repoint(directory, &repointed, e));
                }
                let reopened = FileBackend::open(&dir.text_pool_path())
                    .map_err(CoreError::from)
                    .and_then(|backend| TextPool::open(Box::new(backend), Vec::new(), zero_fill));
                match reopened {
                    Ok(pool) => pool,
                    Err(e) => {
                        return Err(
                            self.mark_damaged(format!("compacted text pool cannot be reopened: {e}"))
                        )
                    }
                }
            }
            None => fresh,
        };

        for ((eid, _), (_, offset)) in repointed.iter().zip(&moved) {
            if let Some(node) = cache.peek(*eid) {
                let mut record = node.record();
                record.text_start = *offset;
                node.set_record(record);
            }
        }

        if let Some(dir) = &self.dir {
            dir.save_free_list(&[])?;
            directory.sync()?;
        }

        self.stats.record_compaction();
        debug!(
            payloads = result.payloads,
            saved = result.bytes_saved(),
            "compacted text pool"
        );
        Ok(result)
    }

    /// Flushes every file and persists the text pool free list.
    ///
    /// Also syncs to disk when `sync_on_flush` is set.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any step fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        inner.directory.flush()?;
        inner.text.flush()?;
        inner.names.flush()?;

        if let Some(dir) = &self.dir {
            dir.save_free_list(&inner.text.free_chunks())?;
        }
        if self.config.sync_on_flush {
            inner.directory.sync()?;
            inner.text.sync()?;
            inner.names.sync()?;
        }

        self.stats.record_flush();
        trace!("flushed store");
        Ok(())
    }

    /// Flushes and closes the store. Later calls fail with `StoreClosed`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.flush()?;
        *self.is_open.write() = false;
        debug!("closed store");
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store directory, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Restores the records of a compaction that could not finish.
    ///
    /// Returns `cause`, or `StoreDamaged` (closing the store) if a record
    /// cannot be written back.
    fn undo_repoint(
        &self,
        directory: &mut NodeDirectory,
        repointed: &[(Eid, NodeRecord)],
        cause: CoreError,
    ) -> CoreError {
        for (eid, record) in repointed.iter().rev() {
            if let Err(e) = directory.write_record(*eid, record) {
                return self.mark_damaged(format!(
                    "compaction failed ({cause}) and {eid} could not be restored: {e}"
                ));
            }
        }
        if let Some(dir) = &self.dir {
            if let Err(e) = dir.remove_text_pool_temp() {
                warn!(error = %e, "could not remove compaction temp pool");
            }
        }
        warn!(error = %cause, restored = repointed.len(), "text pool compaction rolled back");
        cause
    }

    /// Closes the store because its files no longer agree.
    fn mark_damaged(&self, message: String) -> CoreError {
        *self.is_open.write() = false;
        error!(%message, "store closed");
        CoreError::StoreDamaged { message }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::StoreClosed)
        }
    }
}

impl StoreInner {
    fn load(&mut self, eid: Eid) -> CoreResult<NodeRef> {
        let Self {
            directory,
            text,
            names,
            cache,
        } = self;
        cache.get_or_load(eid, || {
            let record = directory.read_record(eid)?;
            hydrate(eid, record, names, text)
        })
    }

    /// Reads a record that must not be free.
    fn live_record(&self, eid: Eid) -> CoreResult<NodeRecord> {
        let record = self.directory.read_record(eid)?;
        if record.is_free() {
            return Err(CoreError::FreedHandle { eid: eid.as_u64() });
        }
        Ok(record)
    }

    /// Writes a record and mirrors it into the resident node.
    fn put(&mut self, eid: Eid, record: &NodeRecord) -> CoreResult<()> {
        self.directory.write_record(eid, record)?;
        self.cache.sync_record(eid, record);
        Ok(())
    }

    fn children_of(&self, eid: Eid, record: &NodeRecord) -> CoreResult<Vec<Eid>> {
        let limit = self.directory.slot_count()?;
        let mut children = Vec::new();
        let mut child = record.first_child;
        while !child.is_null() {
            if children.len() as u64 >= limit {
                return Err(CoreError::corrupt(format!(
                    "child list of {eid} does not terminate"
                )));
            }
            children.push(child);
            child = self.live_record(child)?.next_sibling;
        }
        Ok(children)
    }

    /// Validates a prospective link and returns both records.
    fn check_link(&self, parent: Eid, child: Eid) -> CoreResult<(NodeRecord, NodeRecord)> {
        let parent_record = self.live_record(parent)?;
        let child_record = self.live_record(child)?;

        if parent == child {
            return Err(CoreError::hierarchy(format!("cannot link {child} under itself")));
        }
        if !parent_record.kind.is_container() {
            return Err(CoreError::hierarchy(format!(
                "{parent} is a {} node and cannot have children",
                parent_record.kind
            )));
        }
        if child_record.kind == NodeKind::Document {
            return Err(CoreError::hierarchy(format!(
                "document {child} cannot be a child"
            )));
        }
        if !child_record.parent.is_null() {
            return Err(CoreError::hierarchy(format!(
                "{child} already has parent {}",
                child_record.parent
            )));
        }
        if !child_record.previous_sibling.is_null() || !child_record.next_sibling.is_null() {
            return Err(CoreError::hierarchy(format!(
                "{child} still has siblings"
            )));
        }

        let limit = self.directory.slot_count()?;
        let mut ancestor = parent_record.parent;
        let mut steps = 0u64;
        while !ancestor.is_null() {
            if ancestor == child {
                return Err(CoreError::hierarchy(format!(
                    "linking {child} under {parent} would create a cycle"
                )));
            }
            steps += 1;
            if steps > limit {
                return Err(CoreError::corrupt(format!(
                    "ancestry of {parent} does not terminate"
                )));
            }
            ancestor = self.live_record(ancestor)?.parent;
        }

        Ok((parent_record, child_record))
    }

    /// Inserts `child` between `prev` and `next` under `parent`.
    fn splice(&mut self, parent: Eid, child: Eid, prev: Eid, next: Eid, ordinal: u16) -> CoreResult<()> {
        let mut record = self.live_record(child)?;
        record.parent = parent;
        record.previous_sibling = prev;
        record.next_sibling = next;
        record.child_ordinal = ordinal;
        self.put(child, &record)?;

        if prev.is_null() {
            let mut parent_record = self.live_record(parent)?;
            parent_record.first_child = child;
            self.put(parent, &parent_record)?;
        } else {
            let mut prev_record = self.live_record(prev)?;
            prev_record.next_sibling = child;
            self.put(prev, &prev_record)?;
        }

        if !next.is_null() {
            let mut next_record = self.live_record(next)?;
            next_record.previous_sibling = child;
            self.put(next, &next_record)?;
            self.forget_ordinals_from(next)?;
        }
        trace!(%parent, %child, "linked child");
        Ok(())
    }

    /// Unlinks `eid` from its parent and siblings.
    fn detach(&mut self, eid: Eid) -> CoreResult<()> {
        let mut record = self.live_record(eid)?;
        if record.parent.is_null() {
            return Err(CoreError::hierarchy(format!("{eid} has no parent")));
        }

        let (parent, prev, next) = (record.parent, record.previous_sibling, record.next_sibling);
        if prev.is_null() {
            let mut parent_record = self.live_record(parent)?;
            parent_record.first_child = next;
            self.put(parent, &parent_record)?;
        } else {
            let mut prev_record = self.live_record(prev)?;
            prev_record.next_sibling = next;
            self.put(prev, &prev_record)?;
        }
        if !next.is_null() {
            let mut next_record = self.live_record(next)?;
            next_record.previous_sibling = prev;
            self.put(next, &next_record)?;
            self.forget_ordinals_from(next)?;
        }

        record.parent = Eid::NULL;
        record.previous_sibling = Eid::NULL;
        record.next_sibling = Eid::NULL;
        record.child_ordinal = ORDINAL_UNKNOWN;
        self.put(eid, &record)?;
        trace!(%eid, %parent, "unlinked node");
        Ok(())
    }

    /// Marks `start` and every later sibling as having no cached ordinal.
    fn forget_ordinals_from(&mut self, start: Eid) -> CoreResult<()> {
        let limit = self.directory.slot_count()?;
        let mut current = start;
        let mut steps = 0u64;
        while !current.is_null() {
            steps += 1;
            if steps > limit {
                return Err(CoreError::corrupt(format!(
                    "sibling chain from {start} does not terminate"
                )));
            }
            let mut record = self.live_record(current)?;
            if record.child_ordinal != ORDINAL_UNKNOWN {
                record.child_ordinal = ORDINAL_UNKNOWN;
                self.put(current, &record)?;
            }
            current = record.next_sibling;
        }
        Ok(())
    }

    /// Writes a payload to the text pool. Returns 0 for no payload.
    fn store_payload(&mut self, payload: &Payload, stats: &StoreStats) -> CoreResult<u64> {
        let raw = match payload {
            Payload::None => return Ok(0),
            Payload::Text(text) => text.clone(),
            Payload::Attributes(attrs) => encode_attributes(attrs, &mut self.names)?,
        };

        let width = self.directory.width();
        let offset = self
            .text
            .add_string_within(&raw, width.max_value())
            .map_err(|e| match e {
                CoreError::Allocation { message } => {
                    CoreError::allocation(format!("{message} for {width} handles"))
                }
                other => other,
            })?;
        stats.record_text_written(raw.len() as u64 + 1);
        Ok(offset)
    }

    fn release_text(&mut self, offset: u64, stats: &StoreStats) -> CoreResult<()> {
        if offset != 0 {
            stats.record_text_freed(self.text.free_string_at(offset)?);
        }
        Ok(())
    }

    /// Frees a detached node's text and slot and forgets it.
    fn reclaim(&mut self, eid: Eid, record: &NodeRecord, stats: &StoreStats) -> CoreResult<()> {
        self.release_text(record.text_start, stats)?;
        self.directory.free(eid)?;
        self.cache.remove(eid);
        stats.record_node_freed();
        trace!(%eid, "freed node");
        Ok(())
    }
}

/// Points each moved node at its payload's new offset, remembering the
/// record it had before.
fn repoint_records(
    directory: &mut NodeDirectory,
    moved: &[(Eid, u64)],
    repointed: &mut Vec<(Eid, NodeRecord)>,
) -> CoreResult<()> {
    for &(eid, offset) in moved {
        let record = directory.read_record(eid)?;
        repointed.push((eid, record));
        directory.write_record(
            eid,
            &NodeRecord {
                text_start: offset,
                ..record
            },
        )?;
    }
    Ok(())
}

/// Ordinal to cache for `position`, or the sentinel when it does not fit.
fn cached_ordinal(position: u64) -> u16 {
    u16::try_from(position)
        .ok()
        .filter(|&o| o != ORDINAL_UNKNOWN)
        .unwrap_or(ORDINAL_UNKNOWN)
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
