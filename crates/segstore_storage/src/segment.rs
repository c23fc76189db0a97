//! Segment handles, properties and rolling policies.

use std::fmt;

/// A handle to an open segment.
///
/// Handles are cheap to clone. A handle stays valid until another owner
/// claims the segment, after which every call made with it fails until
/// the segment is opened again.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SegmentHandle {
    name: String,
    read_only: bool,
}

impl SegmentHandle {
    /// Creates a writable handle for the given segment.
    #[must_use]
    pub fn writable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
        }
    }

    /// Creates a read-only handle for the given segment.
    #[must_use]
    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: true,
        }
    }

    /// Returns the name of the segment.
    #[must_use]
    pub fn segment_name(&self) -> &str {
        &self.name
    }

    /// Returns whether this handle can only be used for reads.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SegmentHandle({}, {})",
            self.name,
            if self.read_only { "r" } else { "rw" }
        )
    }
}

/// Properties of a segment as known by the storage tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Name of the segment.
    pub name: String,
    /// Current length (offset where the next write lands).
    pub length: u64,
    /// First readable offset; everything before it has been truncated.
    pub start_offset: u64,
    /// Whether the segment is sealed.
    pub sealed: bool,
}

/// Rolling policy applied to a segment when it is created.
///
/// The storage tier splits a segment into chunks of at most `max_length`
/// bytes, starting at offsets that are multiples of `max_length`. It does
/// not limit the segment's length: chunks that fall entirely below the
/// truncation point are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRollingPolicy {
    /// Maximum length of one chunk.
    pub max_length: u64,
}

impl SegmentRollingPolicy {
    /// A policy that never rolls.
    pub const NO_ROLLING: Self = Self {
        max_length: u64::MAX,
    };

    /// Creates a policy with the given maximum length.
    #[must_use]
    pub const fn new(max_length: u64) -> Self {
        Self { max_length }
    }
}

impl Default for SegmentRollingPolicy {
    fn default() -> Self {
        Self::NO_ROLLING
    }
}
