//! Binary layout of a cache entry.
//!
//! ```text
//! | count (4) | count × ( id (16) | version (8) | value (8) ) |
//! ```
//!
//! Records are sorted by ID and all integers are big-endian. Lookups
//! binary-search the buffer in place, so reading a cached attribute never
//! allocates.

use crate::error::{CoreError, CoreResult};
use crate::types::AttributeId;
use std::collections::BTreeMap;

/// Size of the record count header.
pub const HEADER_LENGTH: usize = 4;

/// Size of one record.
pub const RECORD_LENGTH: usize = 32;

const VERSION_OFFSET: usize = 16;
const VALUE_OFFSET: usize = 24;

/// Cached state of one attribute: the offset at which it became durable
/// and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedValue {
    /// Attribute segment offset at which the value became durable.
    pub version: u64,
    /// The attribute value (possibly the null value).
    pub value: i64,
}

/// Returns the number of records in `data`.
///
/// # Errors
///
/// Returns `CacheEntryCorrupted` if the buffer is not a header followed by
/// whole records, or if its header claims more records than it holds.
pub fn count(data: &[u8]) -> CoreResult<usize> {
    if data.len() < HEADER_LENGTH || (data.len() - HEADER_LENGTH) % RECORD_LENGTH != 0 {
        return Err(CoreError::CacheEntryCorrupted { length: data.len() });
    }

    let count = read_u32(data, 0) as usize;
    if count > (data.len() - HEADER_LENGTH) / RECORD_LENGTH {
        return Err(CoreError::CacheEntryCorrupted { length: data.len() });
    }
    Ok(count)
}

/// Returns the ID of the record at `index`.
#[must_use]
pub fn attribute_id(data: &[u8], index: usize) -> AttributeId {
    let offset = record_offset(index);
    let mut bytes = [0u8; AttributeId::BYTES];
    bytes.copy_from_slice(&data[offset..offset + AttributeId::BYTES]);
    AttributeId::from_be_bytes(bytes)
}

/// Returns the version of the record at `index`.
#[must_use]
pub fn version(data: &[u8], index: usize) -> u64 {
    read_u64(data, record_offset(index) + VERSION_OFFSET)
}

/// Returns the value of the record at `index`.
#[must_use]
pub fn value(data: &[u8], index: usize) -> i64 {
    read_u64(data, record_offset(index) + VALUE_OFFSET) as i64
}

/// Looks up `sorted_ids` (ascending) and calls `found` for every hit.
///
/// Each search starts right after the previous hit, so a batch costs less
/// than one full binary search per ID. Returns whether anything was found.
///
/// # Errors
///
/// Returns `CacheEntryCorrupted` if the buffer fails validation.
pub fn find_sorted(
    data: &[u8],
    sorted_ids: &[AttributeId],
    mut found: impl FnMut(AttributeId, i64),
) -> CoreResult<bool> {
    let count = count(data)?;
    let mut next_index = 0;
    let mut any = false;
    for &id in sorted_ids {
        if next_index >= count {
            break;
        }

        let mut start = next_index;
        let mut end = count;
        while start < end {
            let mid = start + (end - start) / 2;
            match id.cmp(&attribute_id(data, mid)) {
                std::cmp::Ordering::Equal => {
                    found(id, value(data, mid));
                    next_index = mid + 1;
                    any = true;
                    break;
                }
                std::cmp::Ordering::Less => end = mid,
                std::cmp::Ordering::Greater => start = mid + 1,
            }
        }
    }
    Ok(any)
}

/// Decodes every record in `data`.
///
/// # Errors
///
/// Returns `CacheEntryCorrupted` if the buffer fails validation.
pub fn decode_all(data: &[u8]) -> CoreResult<BTreeMap<AttributeId, VersionedValue>> {
    let count = count(data)?;
    Ok((0..count)
        .map(|i| {
            (
                attribute_id(data, i),
                VersionedValue {
                    version: version(data, i),
                    value: value(data, i),
                },
            )
        })
        .collect())
}

/// Encodes `records` into `buf`, which is reused if it is large enough.
///
/// `records` must be sorted by ID. The returned buffer is exactly
/// `HEADER_LENGTH + RECORD_LENGTH * records.len()` bytes long.
#[must_use]
pub fn encode(mut buf: Vec<u8>, records: &BTreeMap<AttributeId, VersionedValue>) -> Vec<u8> {
    let size = HEADER_LENGTH + RECORD_LENGTH * records.len();
    if buf.capacity() < size {
        buf = Vec::with_capacity(size);
    }
    buf.clear();

    buf.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for (id, v) in records {
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&v.version.to_be_bytes());
        buf.extend_from_slice(&v.value.to_be_bytes());
    }
    buf
}

fn record_offset(index: usize) -> usize {
    HEADER_LENGTH + index * RECORD_LENGTH
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}
