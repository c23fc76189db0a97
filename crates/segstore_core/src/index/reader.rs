//! Block reads from the attribute segment.

use super::segment::AttributeSegment;
use crate::error::{CoreError, CoreResult};
use crate::retry::TimeoutTimer;
use bytes::{Bytes, BytesMut};
use segstore_storage::Storage;

/// Reads `length` bytes starting at `offset`, issuing reads of at most
/// `block_size` bytes each.
pub(crate) async fn read_range<S: Storage>(
    storage: &S,
    segment: &AttributeSegment,
    offset: u64,
    length: u64,
    block_size: usize,
    timer: &TimeoutTimer,
) -> CoreResult<Bytes> {
    let end = offset + length;
    let mut buf = BytesMut::new();
    let mut position = offset;
    while position < end {
        let request = usize::try_from(end - position)
            .unwrap_or(usize::MAX)
            .min(block_size);
        let block = timer
            .run(
                "read",
                storage.read(segment.handle(), position, request, timer.remaining()),
            )
            .await?;
        if block.is_empty() {
            return Err(CoreError::codec(format!(
                "unexpected end of {} at offset {position}",
                segment.name()
            )));
        }

        // Whole range in one block.
        if position == offset && block.len() as u64 == length {
            return Ok(block);
        }

        position += block.len() as u64;
        buf.extend_from_slice(&block);
    }
    Ok(buf.freeze())
}
