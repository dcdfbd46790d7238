//! Variable-length payload store.
//!
//! ## Pool Format
//!
//! ```text
//! | "EDTP1\n" | payload\n | payload\n | ...
//! ```
//!
//! Each payload has its literal newlines replaced by [`NEWLINE_PROXY`] and
//! ends with one real newline, so a payload is recovered with a single line
//! read from its offset. The magic line keeps offset 0 free to mean "no
//! payload".
//!
//! ## Free space
//!
//! Freed chunks are kept in memory as `(offset, size)` and handed out
//! best-fit: the smallest chunk that is large enough, lowest offset on ties.
//! The pool never compacts in place; see [`crate::compaction`].

use crate::error::{CoreError, CoreResult};
use dominus_storage::StorageBackend;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Magic line at the start of every text pool.
pub const TEXT_POOL_MAGIC: &[u8; 6] = b"EDTP1\n";

/// Stand-in for `\n` inside a payload. Never occurs in UTF-8.
pub const NEWLINE_PROXY: u8 = 0xFF;

/// Magic bytes of the persisted free list.
pub const FREE_LIST_MAGIC: [u8; 4] = *b"EDFL";

/// Current persisted free list version.
pub const FREE_LIST_VERSION: u16 = 1;

const READ_CHUNK: usize = 256;

/// A reclaimed byte range of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FreeChunk {
    /// Start of the chunk.
    pub offset: u64,
    /// Length of the chunk in bytes.
    pub size: u64,
}

/// Append/free-list byte store for node payloads.
pub struct TextPool {
    backend: Box<dyn StorageBackend>,
    /// Free chunks ordered for best-fit lookup.
    by_size: BTreeSet<(u64, u64)>,
    /// Free chunks ordered by position.
    by_offset: BTreeMap<u64, u64>,
    zero_fill: bool,
}

impl TextPool {
    /// Initializes an empty pool on `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the backend is not empty, or an I/O
    /// error.
    pub fn create(mut backend: Box<dyn StorageBackend>, zero_fill: bool) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "cannot create a text pool over existing data",
            ));
        }
        backend.append(TEXT_POOL_MAGIC)?;
        Ok(Self {
            backend,
            by_size: BTreeSet::new(),
            by_offset: BTreeMap::new(),
            zero_fill,
        })
    }

    /// Opens an existing pool with a previously persisted free list.
    ///
    /// # Errors
    ///
    /// Returns `Format` if the magic line is missing or a free chunk lies
    /// outside the pool or overlaps another one.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        free: Vec<FreeChunk>,
        zero_fill: bool,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        let magic_len = TEXT_POOL_MAGIC.len() as u64;
        if size < magic_len || backend.read_at(0, TEXT_POOL_MAGIC.len())? != TEXT_POOL_MAGIC {
            return Err(CoreError::format("not a text pool (bad magic)"));
        }

        let mut pool = Self {
            backend,
            by_size: BTreeSet::new(),
            by_offset: BTreeMap::new(),
            zero_fill,
        };

        let mut end_of_previous = magic_len;
        let mut sorted = free;
        sorted.sort();
        for chunk in sorted {
            if chunk.size == 0 || chunk.offset < end_of_previous || chunk.offset + chunk.size > size
            {
                return Err(CoreError::format(format!(
                    "free chunk {}+{} is invalid for a {size}-byte pool",
                    chunk.offset, chunk.size
                )));
            }
            end_of_previous = chunk.offset + chunk.size;
            pool.insert_free(chunk);
        }

        debug!(size, free_chunks = pool.by_offset.len(), "opened text pool");
        Ok(pool)
    }

    /// Stores a payload and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the pool cannot grow, or an I/O error.
    pub fn add_string(&mut self, payload: &str) -> CoreResult<u64> {
        self.add_string_within(payload, u64::MAX)
    }

    /// Stores a payload at an offset no greater than `max_offset`.
    ///
    /// Best fit is taken among the free chunks that start within the limit;
    /// the pool only grows if its end is within the limit too.
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if no chunk fits within the limit and the pool
    /// cannot grow within it, or an I/O error.
    pub fn add_string_within(&mut self, payload: &str, max_offset: u64) -> CoreResult<u64> {
        let encoded = encode_payload(payload);
        let needed = encoded.len() as u64;

        let fit = self
            .by_size
            .range((needed, 0)..)
            .find(|&&(_, offset)| offset <= max_offset)
            .copied();
        if let Some((size, offset)) = fit {
            self.by_size.remove(&(size, offset));
            self.by_offset.remove(&offset);
            self.backend.write_at(offset, &encoded)?;
            if size > needed {
                self.insert_free(FreeChunk {
                    offset: offset + needed,
                    size: size - needed,
                });
            }
            trace!(offset, needed, chunk = size, "reused text chunk");
            return Ok(offset);
        }

        let end = self.backend.size()?;
        if end > max_offset {
            return Err(CoreError::allocation(format!(
                "text pool end {end} is beyond addressable offset {max_offset}"
            )));
        }
        let offset = self
            .backend
            .append(&encoded)
            .map_err(|e| CoreError::from_growth("text pool", e))?;
        trace!(offset, needed, "appended text chunk");
        Ok(offset)
    }

    /// Reads the payload stored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `TextOffsetOutOfRange` for offsets outside the payload area,
    /// and `CorruptRecord` for a freed offset, a missing terminator or
    /// invalid UTF-8.
    pub fn read_string_at(&self, offset: u64) -> CoreResult<String> {
        self.check_offset(offset)?;
        if self.by_offset.contains_key(&offset) {
            return Err(CoreError::corrupt(format!(
                "text offset {offset} points into a freed chunk"
            )));
        }
        let line = self.read_line(offset)?;
        decode_payload(&line).map_err(|e| match e {
            CoreError::CorruptRecord { message } => {
                CoreError::corrupt(format!("text at {offset}: {message}"))
            }
            other => other,
        })
    }

    /// Releases the chunk at `offset` and returns its length.
    ///
    /// The chunk is zero-filled first when configured to.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFree` if the offset lies in an already freed chunk,
    /// plus the errors of [`read_string_at`](Self::read_string_at).
    pub fn free_string_at(&mut self, offset: u64) -> CoreResult<u64> {
        self.check_offset(offset)?;
        if let Some((&start, &size)) = self.by_offset.range(..=offset).next_back() {
            if offset < start + size {
                return Err(CoreError::invalid_free(format!(
                    "text offset {offset} is already free"
                )));
            }
        }

        let size = self.chunk_len_at(offset)?;
        if self.zero_fill {
            let zeros = vec![0u8; size as usize];
            self.backend.write_at(offset, &zeros)?;
        }
        self.insert_free(FreeChunk { offset, size });
        trace!(offset, size, "freed text chunk");
        Ok(size)
    }

    /// Length of the encoded chunk at `offset`, terminator included.
    ///
    /// # Errors
    ///
    /// Same as [`read_string_at`](Self::read_string_at).
    pub fn chunk_len_at(&self, offset: u64) -> CoreResult<u64> {
        self.check_offset(offset)?;
        Ok(self.read_line(offset)?.len() as u64 + 1)
    }

    /// Free chunks ordered by offset.
    #[must_use]
    pub fn free_chunks(&self) -> Vec<FreeChunk> {
        self.by_offset
            .iter()
            .map(|(&offset, &size)| FreeChunk { offset, size })
            .collect()
    }

    /// Total bytes held by free chunks.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.by_offset.values().sum()
    }

    /// Size of the pool file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
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

    /// Syncs the pool to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    fn check_offset(&self, offset: u64) -> CoreResult<()> {
        let size = self.backend.size()?;
        if offset < TEXT_POOL_MAGIC.len() as u64 || offset >= size {
            return Err(CoreError::TextOffsetOutOfRange { offset, size });
        }
        Ok(())
    }

    /// Reads from `offset` up to (not including) the next newline.
    fn read_line(&self, offset: u64) -> CoreResult<Vec<u8>> {
        let size = self.backend.size()?;
        let mut line = Vec::new();
        let mut pos = offset;

        while pos < size {
            let len = READ_CHUNK.min((size - pos) as usize);
            let block = self.backend.read_at(pos, len)?;
            if let Some(end) = memchr::memchr(b'\n', &block) {
                line.extend_from_slice(&block[..end]);
                return Ok(line);
            }
            line.extend_from_slice(&block);
            pos += len as u64;
        }

        Err(CoreError::corrupt(format!(
            "text at {offset} runs to end of pool without a terminator"
        )))
    }

    fn insert_free(&mut self, chunk: FreeChunk) {
        self.by_size.insert((chunk.size, chunk.offset));
        self.by_offset.insert(chunk.offset, chunk.size);
    }
}

impl std::fmt::Debug for TextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextPool")
            .field("free_chunks", &self.by_offset.len())
            .field("zero_fill", &self.zero_fill)
            .finish()
    }
}

/// Encodes a payload: newlines proxied, one real newline appended.
#[must_use]
pub fn encode_payload(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend(
        payload
            .bytes()
            .map(|b| if b == b'\n' { NEWLINE_PROXY } else { b }),
    );
    out.push(b'\n');
    out
}

/// Decodes a payload line (without its terminator).
///
/// # Errors
///
/// Returns `CorruptRecord` if the bytes are not UTF-8 once the proxy is
/// reversed.
pub fn decode_payload(line: &[u8]) -> CoreResult<String> {
    let bytes: Vec<u8> = line
        .iter()
        .map(|&b| if b == NEWLINE_PROXY { b'\n' } else { b })
        .collect();
    String::from_utf8(bytes).map_err(|e| CoreError::corrupt(format!("invalid UTF-8: {e}")))
}

/// Serializes a free list for the `text.free` sidecar.
#[must_use]
pub fn encode_free_list(chunks: &[FreeChunk]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(14 + chunks.len() * 16);
    buf.extend_from_slice(&FREE_LIST_MAGIC);
    buf.extend_from_slice(&FREE_LIST_VERSION.to_le_bytes());
    buf.extend_from_slice(&(chunks.len() as u64).to_le_bytes());
    for chunk in chunks {
        buf.extend_from_slice(&chunk.offset.to_le_bytes());
        buf.extend_from_slice(&chunk.size.to_le_bytes());
    }
    buf
}

/// Parses a `text.free` sidecar.
///
/// # Errors
///
/// Returns `Format` on bad magic, an unknown version or a length mismatch.
pub fn decode_free_list(data: &[u8]) -> CoreResult<Vec<FreeChunk>> {
    if data.len() < 14 || data[0..4] != FREE_LIST_MAGIC {
        return Err(CoreError::format("invalid free list magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > FREE_LIST_VERSION {
        return Err(CoreError::format(format!(
            "unsupported free list version: {version}"
        )));
    }

    let u64_at = |i: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[i..i + 8]);
        u64::from_le_bytes(raw)
    };

    let count = u64_at(6);
    let body = &data[14..];
    if body.len() as u64 != count.saturating_mul(16) {
        return Err(CoreError::format(format!(
            "free list declares {count} chunks but holds {} bytes",
            body.len()
        )));
    }

    Ok((0..count as usize)
        .map(|i| FreeChunk {
            offset: u64_at(14 + i * 16),
            size: u64_at(22 + i * 16),
        })
        .collect())
}
