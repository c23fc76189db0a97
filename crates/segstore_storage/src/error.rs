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

    /// The segment does not exist.
    #[error("segment does not exist: {name}")]
    NotFound {
        /// Name of the segment.
        name: String,
    },

    /// A segment with this name already exists.
    #[error("segment already exists: {name}")]
    AlreadyExists {
        /// Name of the segment.
        name: String,
    },

    /// A conditional write did not land at the current end of the segment.
    #[error("bad offset for segment {name}: expected {expected}, actual {actual}")]
    BadOffset {
        /// Name of the segment.
        name: String,
        /// Offset the caller wrote at.
        expected: u64,
        /// Actual length of the segment.
        actual: u64,
    },

    /// The requested range starts before the segment's truncation point.
    #[error("segment {name} is truncated: requested offset {offset}, start offset {start_offset}")]
    Truncated {
        /// Name of the segment.
        name: String,
        /// The requested read offset.
        offset: u64,
        /// The first readable offset.
        start_offset: u64,
    },

    /// The segment is sealed and accepts no more modifications.
    #[error("segment is sealed: {name}")]
    Sealed {
        /// Name of the segment.
        name: String,
    },

    /// Another owner has claimed the segment; it must be reopened.
    #[error("segment is not owned by this instance: {name}")]
    NotOwned {
        /// Name of the segment.
        name: String,
    },

    /// Attempted to read beyond the end of the segment.
    #[error("read beyond end of segment: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current segment length.
        size: u64,
    },
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a sealed error.
    pub fn sealed(name: impl Into<String>) -> Self {
        Self::Sealed { name: name.into() }
    }

    /// Creates a not-owned error.
    pub fn not_owned(name: impl Into<String>) -> Self {
        Self::NotOwned { name: name.into() }
    }

    /// Returns true if the segment does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a conditional-write offset mismatch.
    pub fn is_bad_offset(&self) -> bool {
        matches!(self, Self::BadOffset { .. })
    }

    /// Returns true if a read hit the segment's truncation point.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// Returns true if the segment is sealed.
    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers() {
        assert!(StorageError::not_found("a").is_not_found());
        assert!(StorageError::sealed("a").is_sealed());
        assert!(!StorageError::sealed("a").is_not_found());

        let err = StorageError::BadOffset {
            name: "a".into(),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_bad_offset());
        assert!(err.to_string().contains("expected 1"));
    }
}
