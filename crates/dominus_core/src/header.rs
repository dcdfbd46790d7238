//! Node directory header.
//!
//! ## Header Format
//!
//! The first 64 bytes of every node directory, little-endian:
//!
//! ```text
//! offset  size  field
//!      0     8  magic "DMNSEDIR"
//!      8     4  endianness tag 0x01020304
//!     12     2  format major
//!     14     2  format minor
//!     16     2  oldest readable major
//!     18     2  oldest readable minor
//!     20     2  encoding tag (1 = UTF-8)
//!     22     2  handle width
//!     24     2  record size
//!     26     4  free list head, low 32 bits
//!     30     4  free list head, high 32 bits
//!     34     8  document root handle
//!     42    22  zero padding
//! ```
//!
//! The header size never depends on the handle width; record size does.

use crate::error::{CoreError, CoreResult};
use crate::types::{Eid, HandleWidth};
use serde::Serialize;

/// Size of the header block.
pub const HEADER_SIZE: usize = 64;

/// Magic bytes at offset 0.
pub const MAGIC: [u8; 8] = *b"DMNSEDIR";

/// Endianness tag, written little-endian.
pub const ENDIAN_TAG: u32 = 0x0102_0304;

/// Format version written by this library.
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

/// Oldest format version this library can read.
pub const OLDEST_READABLE: (u16, u16) = (1, 0);

/// Encoding tag for UTF-8 payloads.
pub const ENCODING_UTF8: u16 = 1;

const _: () = assert!(HEADER_SIZE >= 42, "header fields overflow the block");

/// Decoded node directory header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreHeader {
    /// Format version of the file.
    pub version: (u16, u16),
    /// Oldest reader version able to open the file.
    pub oldest_readable: (u16, u16),
    /// Payload encoding tag.
    pub encoding: u16,
    /// Handle width.
    #[serde(serialize_with = "serialize_width")]
    pub width: HandleWidth,
    /// Size of one node record.
    pub record_size: u16,
    /// First reclaimed slot, or NULL.
    #[serde(serialize_with = "serialize_eid")]
    pub free_list_head: Eid,
    /// Document root, or NULL.
    #[serde(serialize_with = "serialize_eid")]
    pub root: Eid,
}

impl StoreHeader {
    /// Creates the header of a fresh store.
    #[must_use]
    pub fn new(width: HandleWidth) -> Self {
        Self {
            version: FORMAT_VERSION,
            oldest_readable: OLDEST_READABLE,
            encoding: ENCODING_UTF8,
            width,
            record_size: width.record_size() as u16,
            free_list_head: Eid::NULL,
            root: Eid::NULL,
        }
    }

    /// Encodes the header into its fixed block.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let head = self.free_list_head.as_u64();

        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&ENDIAN_TAG.to_le_bytes());
        buf[12..14].copy_from_slice(&self.version.0.to_le_bytes());
        buf[14..16].copy_from_slice(&self.version.1.to_le_bytes());
        buf[16..18].copy_from_slice(&self.oldest_readable.0.to_le_bytes());
        buf[18..20].copy_from_slice(&self.oldest_readable.1.to_le_bytes());
        buf[20..22].copy_from_slice(&self.encoding.to_le_bytes());
        buf[22..24].copy_from_slice(&(self.width as u16).to_le_bytes());
        buf[24..26].copy_from_slice(&self.record_size.to_le_bytes());
        buf[26..30].copy_from_slice(&(head as u32).to_le_bytes());
        buf[30..34].copy_from_slice(&((head >> 32) as u32).to_le_bytes());
        buf[34..42].copy_from_slice(&self.root.as_u64().to_le_bytes());

        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Returns `Format` for a short block, wrong magic or byte order, a
    /// version outside the readable range, an unknown encoding, or a record
    /// size that disagrees with the handle width.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::format(format!(
                "header truncated: {} of {HEADER_SIZE} bytes",
                data.len()
            )));
        }

        if data[0..8] != MAGIC {
            return Err(CoreError::format("not a node directory (bad magic)"));
        }

        let tag = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if tag != ENDIAN_TAG {
            return Err(CoreError::format(format!(
                "unexpected byte order tag {tag:#010x}"
            )));
        }

        let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let version = (u16_at(12), u16_at(14));
        let oldest_readable = (u16_at(16), u16_at(18));

        if version.0 < OLDEST_READABLE.0 || version.0 > FORMAT_VERSION.0 {
            return Err(CoreError::format(format!(
                "unsupported format version {}.{}",
                version.0, version.1
            )));
        }
        if oldest_readable > FORMAT_VERSION {
            return Err(CoreError::format(format!(
                "store requires reader version {}.{} or newer",
                oldest_readable.0, oldest_readable.1
            )));
        }

        let encoding = u16_at(20);
        if encoding != ENCODING_UTF8 {
            return Err(CoreError::format(format!("unknown encoding tag {encoding}")));
        }

        let width = HandleWidth::from_bytes(u16_at(22))?;
        let record_size = u16_at(24);
        if usize::from(record_size) != width.record_size() {
            return Err(CoreError::format(format!(
                "record size {record_size} does not match {width} handles"
            )));
        }

        let head = u64::from(u32_at(26)) | (u64::from(u32_at(30)) << 32);
        let root = u64::from_le_bytes([
            data[34], data[35], data[36], data[37], data[38], data[39], data[40], data[41],
        ]);

        Ok(Self {
            version,
            oldest_readable,
            encoding,
            width,
            record_size,
            free_list_head: Eid(head),
            root: Eid(root),
        })
    }
}

fn serialize_width<S: serde::Serializer>(width: &HandleWidth, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(*width as u16)
}

fn serialize_eid<S: serde::Serializer>(eid: &Eid, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(eid.as_u64())
}
