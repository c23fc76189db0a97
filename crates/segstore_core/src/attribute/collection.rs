//! Attribute collections and their serialization.
//!
//! An attribute segment is a concatenation of serialized collections. Each
//! one is self-delimiting, so the segment can be replayed from any
//! collection boundary.
//!
//! ## Collection Format
//!
//! ```text
//! | version (1) | revision (1) | payload_len (4) | count (4) | count × ( id (16) | value (8) ) |
//! ```
//!
//! All integers are big-endian. `payload_len` covers everything after it.
//! Readers skip payload bytes past the entries they understand, so later
//! revisions may append fields without breaking older readers.

use crate::error::{CoreError, CoreResult};
use crate::types::{AttributeId, NULL_ATTRIBUTE_VALUE};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Format version written by this implementation.
pub const FORMAT_VERSION: u8 = 0;

/// Latest revision of [`FORMAT_VERSION`].
pub const FORMAT_REVISION: u8 = 0;

/// version (1) + revision (1) + payload_len (4)
const HEADER_SIZE: usize = 6;

/// count (4)
const COUNT_SIZE: usize = 4;

/// id (16) + value (8)
const ENTRY_SIZE: usize = AttributeId::BYTES + 8;

/// A set of attribute values: either a delta or a full snapshot.
///
/// Deltas may carry [`NULL_ATTRIBUTE_VALUE`] to remove an attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeCollection {
    attributes: HashMap<AttributeId, i64>,
}

impl AttributeCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of an attribute, if present.
    #[must_use]
    pub fn get(&self, id: &AttributeId) -> Option<i64> {
        self.attributes.get(id).copied()
    }

    /// Sets an attribute value. The null value is stored as-is.
    pub fn insert(&mut self, id: AttributeId, value: i64) {
        self.attributes.insert(id, value);
    }

    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterates over all attributes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, i64)> + '_ {
        self.attributes.iter().map(|(id, value)| (*id, *value))
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &HashMap<AttributeId, i64> {
        &self.attributes
    }

    /// Consumes the collection and returns the underlying map.
    #[must_use]
    pub fn into_map(self) -> HashMap<AttributeId, i64> {
        self.attributes
    }

    /// Applies `other` on top of this collection.
    ///
    /// Null values in `other` remove the attribute; any other value
    /// overwrites it. Attributes absent from `other` are untouched.
    pub fn merge_with(&mut self, other: &AttributeCollection) {
        for (&id, &value) in &other.attributes {
            if value == NULL_ATTRIBUTE_VALUE {
                self.attributes.remove(&id);
            } else {
                self.attributes.insert(id, value);
            }
        }
    }

    /// Returns the serialized size of this collection.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        HEADER_SIZE + COUNT_SIZE + ENTRY_SIZE * self.attributes.len()
    }

    /// Serializes this collection.
    ///
    /// Entries are written sorted by ID for deterministic output.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let mut entries: Vec<(&AttributeId, &i64)> = self.attributes.iter().collect();
        entries.sort_unstable_by_key(|(id, _)| **id);

        let mut buf = BytesMut::with_capacity(self.serialized_len());
        buf.put_u8(FORMAT_VERSION);
        buf.put_u8(FORMAT_REVISION);
        buf.put_u32((COUNT_SIZE + ENTRY_SIZE * entries.len()) as u32);
        buf.put_u32(entries.len() as u32);
        for (id, value) in entries {
            buf.put_slice(&id.to_be_bytes());
            buf.put_i64(*value);
        }
        buf.freeze()
    }

    /// Deserializes one collection from the start of `input`.
    ///
    /// Returns the collection and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the input is truncated, has an unknown
    /// version, or its payload is inconsistent with its entry count.
    pub fn deserialize(input: &[u8]) -> CoreResult<(Self, usize)> {
        if input.len() < HEADER_SIZE {
            return Err(CoreError::codec(format!(
                "collection header needs {HEADER_SIZE} bytes, {} available",
                input.len()
            )));
        }

        let version = input[0];
        if version != FORMAT_VERSION {
            return Err(CoreError::codec(format!(
                "unsupported collection format version {version}"
            )));
        }

        let payload_len = read_u32(input, 2) as usize;
        let total = HEADER_SIZE + payload_len;
        if input.len() < total {
            return Err(CoreError::codec(format!(
                "collection payload needs {payload_len} bytes, {} available",
                input.len() - HEADER_SIZE
            )));
        }

        let payload = &input[HEADER_SIZE..total];
        if payload.len() < COUNT_SIZE {
            return Err(CoreError::codec("collection payload is missing its count"));
        }

        let count = read_u32(payload, 0) as usize;
        let needed = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(COUNT_SIZE))
            .ok_or_else(|| CoreError::codec(format!("invalid entry count {count}")))?;
        if needed > payload.len() {
            return Err(CoreError::codec(format!(
                "collection declares {count} entries but its payload holds {} bytes",
                payload.len()
            )));
        }

        let mut attributes = HashMap::with_capacity(count);
        let mut offset = COUNT_SIZE;
        for _ in 0..count {
            let mut id = [0u8; AttributeId::BYTES];
            id.copy_from_slice(&payload[offset..offset + AttributeId::BYTES]);
            offset += AttributeId::BYTES;
            let value = read_i64(payload, offset);
            offset += 8;
            attributes.insert(AttributeId::from_be_bytes(id), value);
        }

        Ok((Self { attributes }, total))
    }

    /// Deserializes a sequence of concatenated collections and merges them,
    /// in order, into a single collection.
    ///
    /// # Errors
    ///
    /// Returns a codec error if any collection is malformed, including a
    /// trailing partial collection.
    pub fn replay(input: &[u8]) -> CoreResult<Self> {
        let mut result = Self::new();
        let mut position = 0;
        while position < input.len() {
            let (collection, consumed) = Self::deserialize(&input[position..])?;
            result.merge_with(&collection);
            position += consumed;
        }
        Ok(result)
    }
}

impl From<HashMap<AttributeId, i64>> for AttributeCollection {
    fn from(attributes: HashMap<AttributeId, i64>) -> Self {
        Self { attributes }
    }
}

impl FromIterator<(AttributeId, i64)> for AttributeCollection {
    fn from_iter<I: IntoIterator<Item = (AttributeId, i64)>>(iter: I) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_be_bytes(bytes)
}
