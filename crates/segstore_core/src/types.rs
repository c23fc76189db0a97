//! Core type definitions for segstore.

use std::fmt;
use uuid::Uuid;

/// Value meaning "attribute is absent".
///
/// Writing it removes the attribute; it never appears in query results.
pub const NULL_ATTRIBUTE_VALUE: i64 = i64::MIN;

/// Suffix appended to a segment's name to form its attribute segment's name.
pub const ATTRIBUTE_SEGMENT_SUFFIX: &str = "$attributes";

/// Returns the name of the attribute segment belonging to `segment_name`.
#[must_use]
pub fn attribute_segment_name(segment_name: &str) -> String {
    format!("{segment_name}{ATTRIBUTE_SEGMENT_SUFFIX}")
}

/// Identifier of an attribute.
///
/// Attribute IDs are opaque 128-bit values, ordered numerically. Their
/// byte encoding is big-endian, so byte order and numeric order agree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AttributeId(u128);

impl AttributeId {
    /// Encoded size in bytes.
    pub const BYTES: usize = 16;

    /// Creates an attribute ID from its numeric value.
    #[inline]
    #[must_use]
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Creates an attribute ID from its most and least significant halves.
    #[must_use]
    pub const fn from_parts(msb: u64, lsb: u64) -> Self {
        Self(((msb as u128) << 64) | lsb as u128)
    }

    /// Creates a new random attribute ID.
    #[must_use]
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Creates an attribute ID from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.as_u128())
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(self) -> Uuid {
        Uuid::from_u128(self.0)
    }

    /// Returns the numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Returns the big-endian byte encoding.
    #[inline]
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Decodes an attribute ID from its big-endian encoding.
    #[inline]
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl From<Uuid> for AttributeId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl fmt::Debug for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeId({})", self.to_uuid())
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

/// Well-known attributes kept on a segment's own metadata.
pub mod attributes {
    use super::AttributeId;

    /// Prefix shared by all core attribute IDs.
    const CORE_PREFIX: u64 = u64::MIN;

    /// Offset of the last attribute snapshot in the attribute segment.
    pub const LAST_ATTRIBUTE_SNAPSHOT_OFFSET: AttributeId = AttributeId::from_parts(CORE_PREFIX, 4);

    /// Length of the last attribute snapshot in the attribute segment.
    pub const LAST_ATTRIBUTE_SNAPSHOT_LENGTH: AttributeId = AttributeId::from_parts(CORE_PREFIX, 5);
}

/// Identifier of a segment within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of one append to an attribute segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteInfo {
    /// Offset where the data was written.
    pub offset: u64,
    /// Number of bytes written.
    pub length: u64,
}

impl WriteInfo {
    /// Creates a new write info.
    #[must_use]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Returns the offset right after the written data.
    #[must_use]
    pub const fn end_offset(self) -> u64 {
        self.offset + self.length
    }
}

impl fmt::Display for WriteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset={}, Length={}", self.offset, self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_id_byte_order_matches_numeric_order() {
        let a = AttributeId::from_parts(1, u64::MAX);
        let b = AttributeId::from_parts(2, 0);
        assert!(a < b);
        assert!(a.to_be_bytes() < b.to_be_bytes());
        assert_eq!(AttributeId::from_be_bytes(a.to_be_bytes()), a);
    }

    #[test]
    fn attribute_id_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let id = AttributeId::from(uuid);
        assert_eq!(id.to_uuid(), uuid);
    }

    #[test]
    fn write_info_end_offset() {
        let w = WriteInfo::new(100, 24);
        assert_eq!(w.end_offset(), 124);
        assert_eq!(w.to_string(), "Offset=100, Length=24");
    }

    #[test]
    fn attribute_segment_naming() {
        assert_eq!(attribute_segment_name("scope/stream/0"), "scope/stream/0$attributes");
    }
}
