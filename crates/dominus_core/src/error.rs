//! Error types for the Dominus node store.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in node store operations.
///
/// Every error is scoped to the operation that produced it and leaves the
/// store usable, except the ones [`CoreError::is_fatal`] reports.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dominus_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad magic, incompatible version, or an otherwise unreadable file
    /// layout. The store refuses to open.
    #[error("invalid store format: {message}")]
    Format {
        /// Description of the format issue.
        message: String,
    },

    /// Bytes within range that do not decode to a consistent record.
    #[error("corrupt record: {message}")]
    CorruptRecord {
        /// Description of the corruption.
        message: String,
    },

    /// The NULL handle (0) was used where a real node is required.
    #[error("null handle used where a node is required")]
    NullHandle,

    /// A handle beyond the current extent of the node directory.
    #[error("handle {eid} out of range: directory holds {slots} slots")]
    HandleOutOfRange {
        /// The offending handle.
        eid: u64,
        /// Number of slots (including the reserved slot 0).
        slots: u64,
    },

    /// A text pool offset outside the pool.
    #[error("text offset {offset} out of range: pool holds {size} bytes")]
    TextOffsetOutOfRange {
        /// The offending offset.
        offset: u64,
        /// Current pool size.
        size: u64,
    },

    /// The handle names a reclaimed slot.
    #[error("handle {eid} refers to a freed slot")]
    FreedHandle {
        /// The offending handle.
        eid: u64,
    },

    /// A value does not fit the field it is encoded into.
    #[error("{field} value {value} does not fit in {width} bytes")]
    ValueOutOfRange {
        /// Name of the field being encoded.
        field: &'static str,
        /// The value that overflowed.
        value: u64,
        /// Width of the field in bytes.
        width: u16,
    },

    /// The operation would violate a tree invariant.
    #[error("hierarchy error: {message}")]
    Hierarchy {
        /// Description of the violation.
        message: String,
    },

    /// Attempted to free a node or chunk that is still in use.
    #[error("invalid free: {message}")]
    InvalidFree {
        /// Why the free was rejected.
        message: String,
    },

    /// The directory, text pool or name pool cannot grow.
    #[error("allocation failed: {message}")]
    Allocation {
        /// Description of the failure.
        message: String,
    },

    /// A name code that the name pool never assigned.
    #[error("unknown name code {code}")]
    UnknownNameCode {
        /// The unassigned code.
        code: u16,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,

    /// The store's files no longer agree with each other; the instance has
    /// been closed.
    #[error("store damaged: {message}")]
    StoreDamaged {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted with the given arguments.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }

    /// Creates a hierarchy error.
    pub fn hierarchy(message: impl Into<String>) -> Self {
        Self::Hierarchy {
            message: message.into(),
        }
    }

    /// Creates an invalid free error.
    pub fn invalid_free(message: impl Into<String>) -> Self {
        Self::InvalidFree {
            message: message.into(),
        }
    }

    /// Creates an allocation error.
    pub fn allocation(message: impl Into<String>) -> Self {
        Self::Allocation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Converts a storage error raised while growing a file.
    ///
    /// A full device becomes [`CoreError::Allocation`]; anything else stays
    /// an I/O failure.
    pub(crate) fn from_growth(what: &str, err: dominus_storage::StorageError) -> Self {
        if err.is_out_of_space() {
            Self::allocation(format!("{what} cannot grow: {err}"))
        } else {
            Self::Storage(err)
        }
    }

    /// Returns true for the out-of-range family: the NULL handle, a handle
    /// beyond the directory, or an offset beyond the text pool.
    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            Self::NullHandle | Self::HandleOutOfRange { .. } | Self::TextOffsetOutOfRange { .. }
        )
    }

    /// Returns true if the instance that produced this error must not be
    /// used further: always for `StoreDamaged`, and for format or I/O
    /// errors that surfaced while opening it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Format { .. } | Self::Io(_) | Self::Storage(_) | Self::StoreDamaged { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_family() {
        assert!(CoreError::NullHandle.is_out_of_range());
        assert!(CoreError::HandleOutOfRange { eid: 9, slots: 3 }.is_out_of_range());
        assert!(CoreError::TextOffsetOutOfRange { offset: 1, size: 0 }.is_out_of_range());
        assert!(!CoreError::corrupt("bad kind").is_out_of_range());
    }

    #[test]
    fn fatal_errors() {
        assert!(CoreError::format("bad magic").is_fatal());
        assert!(CoreError::Io(io::Error::new(io::ErrorKind::Other, "boom")).is_fatal());
        assert!(CoreError::StoreDamaged {
            message: "records out of step".into()
        }
        .is_fatal());
        assert!(!CoreError::hierarchy("cycle").is_fatal());
        assert!(!CoreError::invalid_free("still linked").is_fatal());
    }

    #[test]
    fn growth_errors_split_on_space() {
        let full = dominus_storage::StorageError::Io(io::Error::new(
            io::ErrorKind::StorageFull,
            "no space left on device",
        ));
        assert!(matches!(
            CoreError::from_growth("text pool", full),
            CoreError::Allocation { .. }
        ));

        let other = dominus_storage::StorageError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only",
        ));
        assert!(matches!(
            CoreError::from_growth("text pool", other),
            CoreError::Storage(_)
        ));
    }

    #[test]
    fn display_messages() {
        let err = CoreError::ValueOutOfRange {
            field: "parent",
            value: 70_000,
            width: 2,
        };
        assert_eq!(err.to_string(), "parent value 70000 does not fit in 2 bytes");
    }
}
