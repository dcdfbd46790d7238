//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to write at an offset that would leave a hole.
    #[error("write beyond end of storage: offset {offset}, size {size}")]
    WritePastEnd {
        /// The requested write offset.
        offset: u64,
        /// The current storage size.
        size: u64,
    },
}

impl StorageError {
    /// Returns true when the underlying device refused to grow.
    ///
    /// Callers map this to an allocation failure rather than a generic
    /// I/O failure.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_is_out_of_space() {
        let err = StorageError::Io(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        assert!(err.is_out_of_space());
    }

    #[test]
    fn other_errors_are_not_out_of_space() {
        let err = StorageError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!err.is_out_of_space());
        let err = StorageError::ReadPastEnd {
            offset: 4,
            len: 4,
            size: 2,
        };
        assert!(!err.is_out_of_space());
    }
}
