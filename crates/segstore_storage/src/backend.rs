//! Storage trait definition.

use crate::error::StorageResult;
use crate::segment::{SegmentHandle, SegmentInfo, SegmentRollingPolicy};
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

/// The backing storage tier.
///
/// Segments are **append-only byte logs** addressed by name. The tier does
/// not interpret segment contents.
///
/// # Invariants
///
/// - `write` is conditional: it succeeds only if `offset` equals the
///   segment's current length, and fails with `BadOffset` otherwise
/// - `truncate` is logical: it advances the first readable offset and
///   never changes the length
/// - `read` fails with `Truncated` if the range starts before the first
///   readable offset
/// - A sealed segment rejects `write` and `truncate` with `Sealed`
/// - Handles obtained before an ownership change fail with `NotOwned`
///
/// Every method carries a timeout; implementations may use it to bound
/// their own I/O.
pub trait Storage: Send + Sync + 'static {
    /// Creates a new, empty segment.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a segment with this name exists.
    fn create(
        &self,
        name: &str,
        rolling_policy: SegmentRollingPolicy,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<SegmentInfo>> + Send;

    /// Opens an existing segment for writing and claims ownership of it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the segment does not exist.
    fn open_write(&self, name: &str) -> impl Future<Output = StorageResult<SegmentHandle>> + Send;

    /// Returns the current properties of a segment.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the segment does not exist.
    fn get_info(
        &self,
        name: &str,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<SegmentInfo>> + Send;

    /// Writes `data` at `offset`, provided `offset` is the current length.
    ///
    /// # Errors
    ///
    /// Returns `BadOffset` on an offset mismatch, `Sealed` if the segment
    /// is sealed, `NotOwned` if the handle was fenced out.
    fn write(
        &self,
        handle: &SegmentHandle,
        offset: u64,
        data: Bytes,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Reads `length` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if `offset` precedes the first readable offset
    /// and `ReadPastEnd` if the range extends beyond the length.
    fn read(
        &self,
        handle: &SegmentHandle,
        offset: u64,
        length: usize,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<Bytes>> + Send;

    /// Truncates the segment so that `offset` becomes its first readable offset.
    fn truncate(
        &self,
        handle: &SegmentHandle,
        offset: u64,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Seals the segment.
    fn seal(
        &self,
        handle: &SegmentHandle,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Deletes the segment.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the segment is already gone; callers that
    /// want idempotent deletion tolerate it.
    fn delete(
        &self,
        handle: &SegmentHandle,
        timeout: Duration,
    ) -> impl Future<Output = StorageResult<()>> + Send;
}
