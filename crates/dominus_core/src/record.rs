//! Fixed-size node records and their binary codec.
//!
//! ## Record Format
//!
//! Every field is little-endian. `w` is the store's handle width.
//!
//! ```text
//! | parent (w) | prev_sibling (w) | next_sibling (w) | first_child (w) |
//! | text_start (w) | kind (2) | name_code (2) | child_ordinal (2) | flags (4) |
//! ```
//!
//! A freed slot has kind [`NodeKind::Free`], the [`NodeFlags::FREED`] bit,
//! and its `parent` field holds the next slot on the free list.

use crate::error::{CoreError, CoreResult};
use crate::types::{Eid, HandleWidth, NameCode, NodeKind};

/// Child ordinal sentinel: "not cached, walk previous siblings".
pub const ORDINAL_UNKNOWN: u16 = 0xFFFF;

/// Structural marker bits of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NodeFlags(u32);

impl NodeFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Slot is on the directory free list.
    pub const FREED: Self = Self(0x0000_0001);

    /// Creates flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with the bits of `other` set.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// The persisted shape of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    /// Parent handle; for a freed slot, the next free slot.
    pub parent: Eid,
    /// Previous sibling handle.
    pub previous_sibling: Eid,
    /// Next sibling handle.
    pub next_sibling: Eid,
    /// First child handle.
    pub first_child: Eid,
    /// Offset of the payload in the text pool, `0` for none.
    pub text_start: u64,
    /// Node kind.
    pub kind: NodeKind,
    /// Interned name, or the kind's pseudo-name.
    pub name_code: NameCode,
    /// Position among siblings, or [`ORDINAL_UNKNOWN`].
    pub child_ordinal: u16,
    /// Structural marker bits.
    pub flags: NodeFlags,
}

impl NodeRecord {
    /// Creates an unlinked record without payload.
    #[must_use]
    pub const fn new(kind: NodeKind, name_code: NameCode) -> Self {
        Self {
            parent: Eid::NULL,
            previous_sibling: Eid::NULL,
            next_sibling: Eid::NULL,
            first_child: Eid::NULL,
            text_start: 0,
            kind,
            name_code,
            child_ordinal: ORDINAL_UNKNOWN,
            flags: NodeFlags::NONE,
        }
    }

    /// The all-zero record written into fresh and reserved slots.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            child_ordinal: 0,
            ..Self::new(NodeKind::Free, NameCode::NONE)
        }
    }

    /// A free-list entry pointing at `next`.
    #[must_use]
    pub const fn free_marker(next: Eid) -> Self {
        Self {
            parent: next,
            flags: NodeFlags::FREED,
            ..Self::zeroed()
        }
    }

    /// Next slot on the free list (only meaningful for freed slots).
    #[must_use]
    pub const fn next_free(&self) -> Eid {
        self.parent
    }

    /// Whether this record is a free-list entry.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.kind, NodeKind::Free)
    }

    /// Cached child ordinal, if known.
    #[must_use]
    pub const fn ordinal(&self) -> Option<u16> {
        if self.child_ordinal == ORDINAL_UNKNOWN {
            None
        } else {
            Some(self.child_ordinal)
        }
    }

    /// Whether the record has no parent, siblings or children.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.parent.is_null()
            && self.previous_sibling.is_null()
            && self.next_sibling.is_null()
            && self.first_child.is_null()
    }

    /// Encodes the record to exactly `width.record_size()` bytes.
    ///
    /// # Errors
    ///
    /// Returns `ValueOutOfRange` if a handle or the text offset does not
    /// fit the width.
    pub fn encode(&self, width: HandleWidth) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(width.record_size());

        put_handle(&mut buf, "parent", self.parent.as_u64(), width)?;
        put_handle(
            &mut buf,
            "previous_sibling",
            self.previous_sibling.as_u64(),
            width,
        )?;
        put_handle(&mut buf, "next_sibling", self.next_sibling.as_u64(), width)?;
        put_handle(&mut buf, "first_child", self.first_child.as_u64(), width)?;
        put_handle(&mut buf, "text_start", self.text_start, width)?;

        buf.extend_from_slice(&self.kind.code().to_le_bytes());
        buf.extend_from_slice(&self.name_code.as_u16().to_le_bytes());
        buf.extend_from_slice(&self.child_ordinal.to_le_bytes());
        buf.extend_from_slice(&self.flags.bits().to_le_bytes());

        debug_assert_eq!(buf.len(), width.record_size());
        Ok(buf)
    }

    /// Decodes a record from exactly `width.record_size()` bytes.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` if the buffer has the wrong length or holds an
    /// unknown node kind.
    pub fn decode(data: &[u8], width: HandleWidth) -> CoreResult<Self> {
        if data.len() != width.record_size() {
            return Err(CoreError::corrupt(format!(
                "record is {} bytes, expected {} for {} handles",
                data.len(),
                width.record_size(),
                width
            )));
        }

        let w = width.bytes();
        let handle = |i: usize| get_handle(&data[i * w..(i + 1) * w]);

        let fixed = &data[5 * w..];
        let kind = NodeKind::try_from(u16::from_le_bytes([fixed[0], fixed[1]]))?;

        Ok(Self {
            parent: Eid(handle(0)),
            previous_sibling: Eid(handle(1)),
            next_sibling: Eid(handle(2)),
            first_child: Eid(handle(3)),
            text_start: handle(4),
            kind,
            name_code: NameCode(u16::from_le_bytes([fixed[2], fixed[3]])),
            child_ordinal: u16::from_le_bytes([fixed[4], fixed[5]]),
            flags: NodeFlags::from_bits(u32::from_le_bytes([
                fixed[6], fixed[7], fixed[8], fixed[9],
            ])),
        })
    }
}

fn put_handle(
    buf: &mut Vec<u8>,
    field: &'static str,
    value: u64,
    width: HandleWidth,
) -> CoreResult<()> {
    if value > width.max_value() {
        return Err(CoreError::ValueOutOfRange {
            field,
            value,
            width: width as u16,
        });
    }
    buf.extend_from_slice(&value.to_le_bytes()[..width.bytes()]);
    Ok(())
}

fn get_handle(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> NodeRecord {
        NodeRecord {
            parent: Eid(1),
            previous_sibling: Eid(2),
            next_sibling: Eid(3),
            first_child: Eid(4),
            text_start: 6,
            kind: NodeKind::Element,
            name_code: NameCode(16),
            child_ordinal: 1,
            flags: NodeFlags::NONE,
        }
    }

    #[test]
    fn encoded_length_matches_record_size() {
        for width in HandleWidth::ALL {
            let bytes = sample().encode(width).unwrap();
            assert_eq!(bytes.len(), width.record_size());
        }
    }

    #[test]
    fn field_layout_is_little_endian() {
        let bytes = sample().encode(HandleWidth::Two).unwrap();
        assert_eq!(&bytes[0..2], &[1, 0]);
        assert_eq!(&bytes[6..8], &[4, 0]);
        assert_eq!(&bytes[8..10], &[6, 0]);
        // kind, name code, ordinal, flags
        assert_eq!(&bytes[10..12], &[1, 0]);
        assert_eq!(&bytes[12..14], &[16, 0]);
        assert_eq!(&bytes[14..16], &[1, 0]);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
    }

    #[test]
    fn overflowing_handle_is_rejected() {
        let record = NodeRecord {
            next_sibling: Eid(70_000),
            ..sample()
        };
        let err = record.encode(HandleWidth::Two).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ValueOutOfRange {
                field: "next_sibling",
                value: 70_000,
                width: 2
            }
        ));
        assert!(record.encode(HandleWidth::Four).is_ok());
    }

    #[test]
    fn overflowing_text_offset_is_rejected() {
        let record = NodeRecord {
            text_start: u64::from(u32::MAX) + 1,
            ..sample()
        };
        assert!(matches!(
            record.encode(HandleWidth::Four),
            Err(CoreError::ValueOutOfRange {
                field: "text_start",
                ..
            })
        ));
    }

    #[test]
    fn wrong_length_is_corrupt() {
        let mut bytes = sample().encode(HandleWidth::Four).unwrap();
        bytes.pop();
        assert!(matches!(
            NodeRecord::decode(&bytes, HandleWidth::Four),
            Err(CoreError::CorruptRecord { .. })
        ));

        let bytes = sample().encode(HandleWidth::Four).unwrap();
        assert!(matches!(
            NodeRecord::decode(&bytes, HandleWidth::Eight),
            Err(CoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let mut bytes = sample().encode(HandleWidth::Four).unwrap();
        bytes[20] = 0x2A;
        assert!(matches!(
            NodeRecord::decode(&bytes, HandleWidth::Four),
            Err(CoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn zeroed_record_decodes_as_free() {
        let bytes = vec![0u8; HandleWidth::Eight.record_size()];
        let record = NodeRecord::decode(&bytes, HandleWidth::Eight).unwrap();
        assert_eq!(record, NodeRecord::zeroed());
        assert!(record.is_free());
        assert!(record.is_detached());
    }

    #[test]
    fn free_marker_reuses_parent_field() {
        let marker = NodeRecord::free_marker(Eid(9));
        assert_eq!(marker.next_free(), Eid(9));
        assert_eq!(marker.parent, Eid(9));
        assert!(marker.flags.contains(NodeFlags::FREED));
    }

    #[test]
    fn ordinal_sentinel() {
        let record = NodeRecord::new(NodeKind::Text, NameCode::TEXT);
        assert_eq!(record.ordinal(), None);
        let record = NodeRecord {
            child_ordinal: 3,
            ..record
        };
        assert_eq!(record.ordinal(), Some(3));
    }

    fn kind_strategy() -> impl Strategy<Value = NodeKind> {
        prop_oneof![
            Just(NodeKind::Free),
            Just(NodeKind::Element),
            Just(NodeKind::Text),
            Just(NodeKind::CData),
            Just(NodeKind::ProcessingInstruction),
            Just(NodeKind::Comment),
            Just(NodeKind::Document),
        ]
    }

    fn record_strategy(width: HandleWidth) -> impl Strategy<Value = NodeRecord> {
        let max = width.max_value();
        (
            prop::array::uniform5(0..=max),
            kind_strategy(),
            any::<u16>(),
            any::<u16>(),
            any::<u32>(),
        )
            .prop_map(|(h, kind, name, ordinal, flags)| NodeRecord {
                parent: Eid(h[0]),
                previous_sibling: Eid(h[1]),
                next_sibling: Eid(h[2]),
                first_child: Eid(h[3]),
                text_start: h[4],
                kind,
                name_code: NameCode(name),
                child_ordinal: ordinal,
                flags: NodeFlags::from_bits(flags),
            })
    }

    fn width_and_record() -> impl Strategy<Value = (HandleWidth, NodeRecord)> {
        prop_oneof![
            record_strategy(HandleWidth::Two).prop_map(|r| (HandleWidth::Two, r)),
            record_strategy(HandleWidth::Four).prop_map(|r| (HandleWidth::Four, r)),
            record_strategy(HandleWidth::Eight).prop_map(|r| (HandleWidth::Eight, r)),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode((width, record) in width_and_record()) {
            let bytes = record.encode(width).unwrap();
            prop_assert_eq!(NodeRecord::decode(&bytes, width).unwrap(), record);
        }
    }
}
