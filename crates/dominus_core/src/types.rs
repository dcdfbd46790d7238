//! Core type definitions for the node store.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Handle of a node: its slot number in the node directory.
///
/// Handles are assigned monotonically and address a record by arithmetic
/// offset. Handle `0` is reserved and means "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Eid(pub u64);

impl Eid {
    /// The NULL handle.
    pub const NULL: Self = Self(0);

    /// Creates a handle from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the NULL handle.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns `None` for the NULL handle.
    #[must_use]
    pub const fn non_null(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eid:{}", self.0)
    }
}

/// Bytes taken by the fixed-width fields of a node record:
/// kind (2) + name code (2) + child ordinal (2) + flags (4).
pub const FIXED_FIELD_BYTES: usize = 10;

/// Number of handle-width fields in a node record: parent, previous
/// sibling, next sibling, first child and text start.
pub const HANDLE_FIELDS: usize = 5;

/// Byte width of every handle (and text offset) stored in a directory.
///
/// Chosen when a store is created and fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HandleWidth {
    /// 2-byte handles, at most 65,535 nodes.
    Two = 2,
    /// 4-byte handles, about 4.29 billion nodes.
    Four = 4,
    /// 8-byte handles.
    Eight = 8,
}

impl HandleWidth {
    /// All supported widths.
    pub const ALL: [Self; 3] = [Self::Two, Self::Four, Self::Eight];

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Largest value a field of this width can hold.
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::Two => u16::MAX as u64,
            Self::Four => u32::MAX as u64,
            Self::Eight => u64::MAX,
        }
    }

    /// Size of one encoded node record at this width.
    #[must_use]
    pub const fn record_size(self) -> usize {
        HANDLE_FIELDS * self.bytes() + FIXED_FIELD_BYTES
    }

    /// Parses a width stored in a header or given in configuration.
    ///
    /// # Errors
    ///
    /// Returns a format error for anything other than 2, 4 or 8.
    pub fn from_bytes(bytes: u16) -> CoreResult<Self> {
        match bytes {
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(CoreError::format(format!(
                "unsupported handle width: {other} bytes"
            ))),
        }
    }
}

impl Default for HandleWidth {
    fn default() -> Self {
        Self::Four
    }
}

impl fmt::Display for HandleWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", self.bytes())
    }
}

/// Code of an interned name in the name pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NameCode(pub u16);

impl NameCode {
    /// No name.
    pub const NONE: Self = Self(0);
    /// `#text`
    pub const TEXT: Self = Self(1);
    /// `#cdata-section`
    pub const CDATA: Self = Self(2);
    /// `#comment`
    pub const COMMENT: Self = Self(3);
    /// `#document`
    pub const DOCUMENT: Self = Self(4);
    /// `#processing-instruction`
    pub const PROCESSING_INSTRUCTION: Self = Self(5);

    /// Creates a name code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the raw code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name:{}", self.0)
    }
}

/// Kind of a stored node.
///
/// Codes follow the DOM `nodeType` numbering so dumps read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NodeKind {
    /// Reclaimed (or never used) directory slot.
    Free = 0,
    /// Element node.
    Element = 1,
    /// Text node.
    Text = 3,
    /// CDATA section.
    CData = 4,
    /// Processing instruction.
    ProcessingInstruction = 7,
    /// Comment.
    Comment = 8,
    /// Document root.
    Document = 9,
}

impl NodeKind {
    /// Returns the on-disk code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Name code this kind carries regardless of the pool, if any.
    ///
    /// Elements and processing instructions carry an interned name instead.
    #[must_use]
    pub const fn pseudo_name(self) -> Option<NameCode> {
        match self {
            Self::Text => Some(NameCode::TEXT),
            Self::CData => Some(NameCode::CDATA),
            Self::Comment => Some(NameCode::COMMENT),
            Self::Document => Some(NameCode::DOCUMENT),
            Self::Element | Self::ProcessingInstruction | Self::Free => None,
        }
    }

    /// Whether nodes of this kind carry an interned name.
    #[must_use]
    pub const fn has_interned_name(self) -> bool {
        matches!(self, Self::Element | Self::ProcessingInstruction)
    }

    /// Whether nodes of this kind carry a single text payload.
    #[must_use]
    pub const fn carries_text(self) -> bool {
        matches!(
            self,
            Self::Text | Self::CData | Self::Comment | Self::ProcessingInstruction
        )
    }

    /// Whether nodes of this kind may have children.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Element | Self::Document)
    }
}

impl TryFrom<u16> for NodeKind {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::Element),
            3 => Ok(Self::Text),
            4 => Ok(Self::CData),
            7 => Ok(Self::ProcessingInstruction),
            8 => Ok(Self::Comment),
            9 => Ok(Self::Document),
            other => Err(CoreError::corrupt(format!("unknown node kind {other}"))),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Element => "element",
            Self::Text => "text",
            Self::CData => "cdata",
            Self::ProcessingInstruction => "processing-instruction",
            Self::Comment => "comment",
            Self::Document => "document",
        };
        f.write_str(name)
    }
}
