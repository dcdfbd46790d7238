//! Offline text pool compaction.
//!
//! The text pool never compacts in place. Compaction copies every live
//! payload into a fresh pool in document order (a pre-order walk from the
//! root, then any live nodes outside the document tree by handle) and the
//! store swaps the new pool in once it is fully written.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change any payload
//! - Every live node with a payload ends up with exactly one chunk
//! - The new pool has no free chunks

use crate::directory::NodeDirectory;
use crate::error::{CoreError, CoreResult};
use crate::record::NodeRecord;
use crate::text_pool::{TextPool, TEXT_POOL_MAGIC};
use crate::types::Eid;
use serde::Serialize;
use tracing::debug;

/// Result of a compaction, or of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionResult {
    /// Payloads copied.
    pub payloads: u64,
    /// Pool size before compaction.
    pub bytes_before: u64,
    /// Pool size after compaction.
    pub bytes_after: u64,
    /// Free chunks the old pool held.
    pub free_chunks_dropped: u64,
    /// Whether the pool was left untouched.
    pub dry_run: bool,
}

impl CompactionResult {
    /// Bytes reclaimed (input size - output size).
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Copies live payloads from one pool into another.
pub struct TextCompactor<'a> {
    directory: &'a NodeDirectory,
    source: &'a TextPool,
}

impl<'a> TextCompactor<'a> {
    /// Creates a compactor reading records from `directory` and payloads
    /// from `source`.
    #[must_use]
    pub fn new(directory: &'a NodeDirectory, source: &'a TextPool) -> Self {
        Self { directory, source }
    }

    /// Live nodes that carry a payload, in the order they are copied.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` if the tree reaches a node twice, plus any
    /// error from reading records.
    pub fn order(&self) -> CoreResult<Vec<(Eid, NodeRecord)>> {
        let slots = usize::try_from(self.directory.slot_count()?)
            .map_err(|_| CoreError::allocation("node directory too large to compact"))?;
        let mut visited = vec![false; slots];
        let mut ordered = Vec::new();

        let root = self.directory.header().root;
        let mut stack = Vec::new();
        if !root.is_null() {
            stack.push(root);
        }

        while let Some(eid) = stack.pop() {
            let record = self.directory.read_record(eid)?;
            let index = eid.as_u64() as usize;
            if visited[index] {
                return Err(CoreError::corrupt(format!(
                    "{eid} reached twice while walking the document"
                )));
            }
            visited[index] = true;

            if record.text_start != 0 {
                ordered.push((eid, record));
            }

            let mut children = Vec::new();
            let mut child = record.first_child;
            while !child.is_null() {
                if children.len() >= slots {
                    return Err(CoreError::corrupt(format!(
                        "sibling chain under {eid} does not terminate"
                    )));
                }
                children.push(child);
                child = self.directory.read_record(child)?.next_sibling;
            }
            stack.extend(children.into_iter().rev());
        }

        for eid in self.directory.handles()? {
            if visited[eid.as_u64() as usize] {
                continue;
            }
            let record = self.directory.read_record(eid)?;
            if !record.is_free() && record.text_start != 0 {
                ordered.push((eid, record));
            }
        }

        Ok(ordered)
    }

    /// Computes what a compaction would do without writing anything.
    ///
    /// # Errors
    ///
    /// Same as [`order`](Self::order), plus text pool read errors.
    pub fn plan(&self) -> CoreResult<CompactionResult> {
        let ordered = self.order()?;
        let mut bytes_after = TEXT_POOL_MAGIC.len() as u64;
        for (_, record) in &ordered {
            bytes_after += self.source.chunk_len_at(record.text_start)?;
        }
        Ok(CompactionResult {
            payloads: ordered.len() as u64,
            bytes_before: self.source.size()?,
            bytes_after,
            free_chunks_dropped: self.source.free_chunks().len() as u64,
            dry_run: true,
        })
    }

    /// Copies every live payload into `target`, which must be empty.
    ///
    /// Returns the new offset of each node's payload alongside the result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `target` already holds payloads, plus
    /// read and write errors of either pool.
    pub fn copy_into(&self, target: &mut TextPool) -> CoreResult<(Vec<(Eid, u64)>, CompactionResult)> {
        if target.size()? != TEXT_POOL_MAGIC.len() as u64 {
            return Err(CoreError::invalid_operation(
                "compaction target must be an empty text pool",
            ));
        }

        let ordered = self.order()?;
        let mut moved = Vec::with_capacity(ordered.len());
        for (eid, record) in &ordered {
            let payload = self.source.read_string_at(record.text_start)?;
            moved.push((*eid, target.add_string(&payload)?));
        }

        let result = CompactionResult {
            payloads: ordered.len() as u64,
            bytes_before: self.source.size()?,
            bytes_after: target.size()?,
            free_chunks_dropped: self.source.free_chunks().len() as u64,
            dry_run: false,
        };
        debug!(
            payloads = result.payloads,
            bytes_before = result.bytes_before,
            bytes_after = result.bytes_after,
            "copied live text"
        );
        Ok((moved, result))
    }
}
