//! Error types for segstore core.

use segstore_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in segstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error without a more specific mapping.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// The index was used before `initialize` completed.
    #[error("attribute index is not initialized")]
    NotInitialized,

    /// `initialize` was called on an already initialized index.
    #[error("attribute index is already initialized")]
    AlreadyInitialized,

    /// The index is closed.
    #[error("attribute index is closed")]
    Closed,

    /// The segment does not exist, or has been deleted or merged.
    #[error("segment does not exist: {name}")]
    SegmentNotFound {
        /// Name of the segment.
        name: String,
    },

    /// The segment is sealed.
    #[error("segment is sealed: {name}")]
    SegmentSealed {
        /// Name of the segment.
        name: String,
    },

    /// A conditional append did not land at the segment's end.
    #[error("bad offset for segment {name}: expected {expected}, actual {actual}")]
    BadOffset {
        /// Name of the segment.
        name: String,
        /// Offset the append targeted.
        expected: u64,
        /// Actual length of the segment.
        actual: u64,
    },

    /// A read raced with a truncation of the segment.
    #[error("segment {name} is truncated: requested offset {offset}, start offset {start_offset}")]
    Truncated {
        /// Name of the segment.
        name: String,
        /// The requested read offset.
        offset: u64,
        /// The first readable offset.
        start_offset: u64,
    },

    /// The attribute segment could not be replayed.
    #[error(
        "unable to parse attribute segment: {message} (last snapshot offset {snapshot_offset}, \
         length {snapshot_length}, known segment length {segment_length})"
    )]
    Corruption {
        /// Description of the underlying fault.
        message: String,
        /// Offset of the last snapshot.
        snapshot_offset: u64,
        /// Length of the last snapshot.
        snapshot_length: u64,
        /// Attribute segment length observed by the replay.
        segment_length: u64,
    },

    /// A cache entry buffer failed layout validation.
    #[error("invalid or corrupted cache entry of {length} bytes")]
    CacheEntryCorrupted {
        /// Length of the offending buffer.
        length: usize,
    },

    /// A serialized attribute collection is malformed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the malformed input.
        message: String,
    },

    /// The operation log rejected or failed to persist an operation.
    #[error("operation log error: {message}")]
    OperationLog {
        /// Description of the failure.
        message: String,
    },

    /// The operation's time budget was exhausted.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// The step that was running when the budget ran out.
        operation: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a segment-not-found error.
    pub fn segment_not_found(name: impl Into<String>) -> Self {
        Self::SegmentNotFound { name: name.into() }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an operation log error.
    pub fn operation_log(message: impl Into<String>) -> Self {
        Self::OperationLog {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the segment does not exist (or was deleted or merged).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SegmentNotFound { .. })
    }

    /// Returns true if this is a conditional-append offset conflict.
    pub fn is_bad_offset(&self) -> bool {
        matches!(self, Self::BadOffset { .. })
    }

    /// Returns true if a read raced with a truncation.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// Returns true if the segment is sealed.
    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::SegmentSealed { .. })
    }

    /// Returns true if the time budget was exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { name } => Self::SegmentNotFound { name },
            StorageError::Sealed { name } => Self::SegmentSealed { name },
            StorageError::BadOffset {
                name,
                expected,
                actual,
            } => Self::BadOffset {
                name,
                expected,
                actual,
            },
            StorageError::Truncated {
                name,
                offset,
                start_offset,
            } => Self::Truncated {
                name,
                offset,
                start_offset,
            },
            other => Self::Storage(other),
        }
    }
}
