//! Per-segment attribute index.
//!
//! A [`SegmentAttributeIndex`] stores the attributes of one primary segment
//! in a dedicated append-only attribute segment:
//!
//! - every `put` appends a serialized delta at the segment's known end;
//!   the storage rejects the append if another writer got there first
//! - once enough bytes have accumulated past the last snapshot, the next
//!   `put` writes a full snapshot instead, records its location on the
//!   primary segment through the operation log and truncates everything
//!   before it
//! - reads replay the segment from the last snapshot onwards, and cache
//!   the result in 128 buckets keyed by attribute ID hash
//!
//! The index holds no lock across I/O. Concurrent writers are serialized
//! by the conditional append alone.

mod reader;
mod segment;

use crate::attribute::{AttributeCollection, AttributeUpdate, AttributeUpdateType};
use crate::cache::{bucket_for, BucketTable, Cache, CacheClient, CacheStatus};
use crate::config::AttributeIndexConfig;
use crate::error::{CoreError, CoreResult};
use crate::metadata::SegmentMetadata;
use crate::oplog::{OperationLog, UpdateAttributesOperation};
use crate::retry::{retry_with_backoff, TimeoutTimer};
use crate::types::{
    attribute_segment_name, attributes, AttributeId, SegmentId, WriteInfo, NULL_ATTRIBUTE_VALUE,
};
use bytes::Bytes;
use segment::AttributeSegment;
use segstore_storage::{Storage, StorageError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attribute index of one primary segment.
///
/// Create with [`SegmentAttributeIndex::new`], then call
/// [`initialize`](Self::initialize) once before anything else. All other
/// operations fail with `NotInitialized` until it completes.
///
/// Every async operation takes a timeout that bounds the whole operation,
/// including retries. A timed out write may still have become durable.
pub struct SegmentAttributeIndex<S: Storage, L: OperationLog> {
    metadata: Arc<dyn SegmentMetadata>,
    storage: Arc<S>,
    operation_log: Arc<L>,
    config: AttributeIndexConfig,
    buckets: Arc<BucketTable>,
    segment: OnceLock<AttributeSegment>,
    closed: AtomicBool,
    trace_id: String,
}

impl<S: Storage, L: OperationLog> SegmentAttributeIndex<S, L> {
    /// Creates an index for the segment described by `metadata`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(
        metadata: Arc<dyn SegmentMetadata>,
        storage: Arc<S>,
        operation_log: Arc<L>,
        cache: Arc<dyn Cache>,
        config: AttributeIndexConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        let segment_id = metadata.id();
        Ok(Self {
            trace_id: format!("AttributeIndex[{segment_id}]"),
            buckets: Arc::new(BucketTable::new(segment_id, cache)),
            metadata,
            storage,
            operation_log,
            config,
            segment: OnceLock::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the ID of the primary segment.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.metadata.id()
    }

    /// Opens the attribute segment, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if called more than once, or the
    /// storage error that prevented opening or creating the segment.
    pub async fn initialize(&self, timeout: Duration) -> CoreResult<()> {
        if self.segment.get().is_some() {
            return Err(CoreError::AlreadyInitialized);
        }

        let timer = TimeoutTimer::new(timeout);
        let name = attribute_segment_name(self.metadata.name());
        let segment = match self.open_existing(&name, &timer).await {
            Ok(segment) => segment,
            Err(e) if e.is_not_found() => self.create_new(&name, &timer).await?,
            Err(e) => return Err(e),
        };

        let length = segment.length();
        self.segment
            .set(segment)
            .map_err(|_| CoreError::AlreadyInitialized)?;
        debug!("{}: Initialized (attribute segment length = {}).", self.trace_id, length);
        Ok(())
    }

    async fn open_existing(&self, name: &str, timer: &TimeoutTimer) -> CoreResult<AttributeSegment> {
        let handle = timer.run("open_write", self.storage.open_write(name)).await?;
        let info = timer
            .run("get_info", self.storage.get_info(name, timer.remaining()))
            .await?;
        Ok(AttributeSegment::new(handle, info.length))
    }

    async fn create_new(&self, name: &str, timer: &TimeoutTimer) -> CoreResult<AttributeSegment> {
        let policy = self.config.attribute_segment_rolling_policy;
        match timer
            .run("create", self.storage.create(name, policy, timer.remaining()))
            .await
        {
            Ok(info) => {
                let handle = timer.run("open_write", self.storage.open_write(name)).await?;
                Ok(AttributeSegment::new(handle, info.length))
            }
            // Lost a creation race.
            Err(CoreError::Storage(StorageError::AlreadyExists { .. })) => {
                self.open_existing(name, timer).await
            }
            Err(e) => Err(e),
        }
    }

    /// Closes the index. Closing more than once has no effect.
    ///
    /// If `clean_cache` is set, every cached bucket of this index is removed
    /// from the shared cache in the background. Only do this once no other
    /// operation targets the index.
    pub fn close(&self, clean_cache: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if !clean_cache {
            info!("{}: Closed (no cache cleanup).", self.trace_id);
            return;
        }

        let buckets = self.buckets.clone();
        let trace_id = self.trace_id.clone();
        let cleanup = move || {
            let freed = buckets.clear_all();
            info!("{}: Closed (cleared {} cached bytes).", trace_id, freed);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { cleanup() });
            }
            Err(_) => cleanup(),
        }
    }

    /// Returns whether the index has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sets one attribute.
    ///
    /// # Errors
    ///
    /// See [`put_all`](Self::put_all).
    pub async fn put(&self, id: AttributeId, value: i64, timeout: Duration) -> CoreResult<()> {
        self.put_all(HashMap::from([(id, value)]), timeout).await
    }

    /// Sets several attributes in one atomic append. Values equal to
    /// [`NULL_ATTRIBUTE_VALUE`] remove the attribute.
    ///
    /// # Errors
    ///
    /// Returns `SegmentNotFound` if the primary segment was deleted,
    /// `BadOffset` if the append kept losing races with other writers, or
    /// the underlying storage or timeout error.
    pub async fn put_all(&self, values: HashMap<AttributeId, i64>, timeout: Duration) -> CoreResult<()> {
        self.segment()?;
        if values.is_empty() {
            return Ok(());
        }

        let timer = TimeoutTimer::new(timeout);
        let delta = AttributeCollection::from(values);
        let written = if self.should_snapshot()? {
            // The snapshot includes the new values.
            self.create_snapshot(&delta, false, &timer).await?
        } else {
            self.append_conditionally(|| std::future::ready(Ok(delta.serialize())), &timer)
                .await?
        };

        self.cache_values(delta.iter(), written.end_offset())
    }

    /// Returns the value of one attribute, or `None` if it is not set.
    ///
    /// # Errors
    ///
    /// See [`get_all`](Self::get_all).
    pub async fn get(&self, id: AttributeId, timeout: Duration) -> CoreResult<Option<i64>> {
        let mut values = self.get_all(&[id], timeout).await?;
        Ok(values.remove(&id))
    }

    /// Returns the values of the given attributes. Attributes that are not
    /// set are omitted.
    ///
    /// Served from the cache if every ID is cached; otherwise the attribute
    /// segment is replayed and the cache refilled.
    ///
    /// # Errors
    ///
    /// Returns `SegmentNotFound` if the primary segment was deleted,
    /// `Corruption` if the attribute segment cannot be replayed, or a
    /// storage or timeout error.
    pub async fn get_all(
        &self,
        ids: &[AttributeId],
        timeout: Duration,
    ) -> CoreResult<HashMap<AttributeId, i64>> {
        self.segment()?;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: BTreeSet<AttributeId> = ids.iter().copied().collect();
        let cached = self.get_from_cache(&ids)?;
        if cached.len() == ids.len() {
            return Ok(cached
                .into_iter()
                .filter(|&(_, value)| value != NULL_ATTRIBUTE_VALUE)
                .collect());
        }

        let timer = TimeoutTimer::new(timeout);
        let state = self.read_all_since_last_snapshot(true, &timer).await?;
        Ok(ids
            .into_iter()
            .filter_map(|id| state.get(&id).map(|value| (id, value)))
            .filter(|&(_, value)| value != NULL_ATTRIBUTE_VALUE)
            .collect())
    }

    /// Removes one attribute.
    ///
    /// # Errors
    ///
    /// See [`put_all`](Self::put_all).
    pub async fn remove(&self, id: AttributeId, timeout: Duration) -> CoreResult<()> {
        self.remove_all(&[id], timeout).await
    }

    /// Removes several attributes in one atomic append.
    ///
    /// # Errors
    ///
    /// See [`put_all`](Self::put_all).
    pub async fn remove_all(&self, ids: &[AttributeId], timeout: Duration) -> CoreResult<()> {
        let values = ids.iter().map(|&id| (id, NULL_ATTRIBUTE_VALUE)).collect();
        self.put_all(values, timeout).await
    }

    /// Writes a final snapshot, records it on the primary segment, truncates
    /// the attribute segment to it and seals the attribute segment.
    ///
    /// Sealing an already sealed index succeeds.
    ///
    /// # Errors
    ///
    /// Returns any failure of the snapshot, the pointer update, the
    /// truncation or the seal.
    pub async fn seal(&self, timeout: Duration) -> CoreResult<()> {
        let segment = self.segment()?;
        let timer = TimeoutTimer::new(timeout);
        match self.snapshot_and_seal(segment, &timer).await {
            Ok(()) => {
                info!("{}: Sealed (length = {}).", self.trace_id, segment.length());
                Ok(())
            }
            Err(e) if e.is_sealed() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn snapshot_and_seal(&self, segment: &AttributeSegment, timer: &TimeoutTimer) -> CoreResult<()> {
        self.create_snapshot(&AttributeCollection::new(), true, timer)
            .await?;
        timer
            .run("seal", self.storage.seal(segment.handle(), timer.remaining()))
            .await
    }

    /// Returns whether the next `put` will write a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before [`initialize`](Self::initialize).
    pub fn should_snapshot(&self) -> CoreResult<bool> {
        let segment = self.segment()?;
        let (offset, length) = self.snapshot_pointer();
        let written_since = segment.length().saturating_sub(offset + length);
        Ok(written_since >= self.config.snapshot_trigger_size)
    }

    /// Returns the length this index believes the attribute segment has.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before [`initialize`](Self::initialize).
    pub fn attribute_segment_length(&self) -> CoreResult<u64> {
        Ok(self.segment()?.length())
    }

    fn segment(&self) -> CoreResult<&AttributeSegment> {
        self.segment.get().ok_or(CoreError::NotInitialized)
    }

    /// (offset, length) of the last snapshot, as recorded on the primary
    /// segment.
    fn snapshot_pointer(&self) -> (u64, u64) {
        let read = |id| {
            self.metadata
                .attribute(id)
                .map_or(0, |v| u64::try_from(v).unwrap_or(0))
        };
        (
            read(attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET),
            read(attributes::LAST_ATTRIBUTE_SNAPSHOT_LENGTH),
        )
    }

    /// Replays the attribute segment from the last snapshot to its end.
    ///
    /// Retried if a concurrent snapshot truncates the range while it is
    /// being read. If `cache_values` is set, the result is cached with the
    /// replayed end offset as its version.
    async fn read_all_since_last_snapshot(
        &self,
        cache_values: bool,
        timer: &TimeoutTimer,
    ) -> CoreResult<AttributeCollection> {
        let result = retry_with_backoff(
            &self.config.read_retry,
            timer,
            &self.trace_id,
            "read",
            CoreError::is_truncated,
            move || self.read_all_once(timer),
        )
        .await;

        match result {
            Ok((state, end_offset)) => {
                if cache_values {
                    self.cache_values(state.iter(), end_offset)?;
                }
                Ok(state)
            }
            Err(e) if is_replay_fault(&e) => Err(self.corruption(&e)),
            Err(e) => Err(e),
        }
    }

    async fn read_all_once(&self, timer: &TimeoutTimer) -> CoreResult<(AttributeCollection, u64)> {
        let segment = self.segment()?;
        self.ensure_not_deleted(timer).await?;

        let (snapshot_offset, _) = self.snapshot_pointer();
        let end_offset = segment.length();
        if end_offset < snapshot_offset {
            return Err(CoreError::codec(format!(
                "last snapshot offset {snapshot_offset} is beyond the end of {}",
                segment.name()
            )));
        }
        if end_offset == snapshot_offset {
            return Ok((AttributeCollection::new(), end_offset));
        }

        let data = reader::read_range(
            self.storage.as_ref(),
            segment,
            snapshot_offset,
            end_offset - snapshot_offset,
            self.config.read_block_size,
            timer,
        )
        .await?;
        Ok((AttributeCollection::replay(&data)?, end_offset))
    }

    fn corruption(&self, cause: &CoreError) -> CoreError {
        let (snapshot_offset, snapshot_length) = self.snapshot_pointer();
        CoreError::Corruption {
            message: cause.to_string(),
            snapshot_offset,
            snapshot_length,
            segment_length: self.segment.get().map_or(0, AttributeSegment::length),
        }
    }

    /// Writes a snapshot holding the current state merged with `delta`.
    ///
    /// The state is read again on every append attempt, so writes that
    /// raced with the snapshot are never lost. If `must_complete` is unset,
    /// failing to record or truncate after the snapshot is durable is
    /// logged and ignored.
    async fn create_snapshot(
        &self,
        delta: &AttributeCollection,
        must_complete: bool,
        timer: &TimeoutTimer,
    ) -> CoreResult<WriteInfo> {
        let written = self
            .append_conditionally(
                move || async move {
                    let mut state = self.read_all_since_last_snapshot(false, timer).await?;
                    state.merge_with(delta);
                    Ok::<_, CoreError>(state.serialize())
                },
                timer,
            )
            .await?;
        debug!("{}: Snapshot serialized to attribute segment ({}).", self.trace_id, written);

        match self.update_state_post_snapshot(written, timer).await {
            Ok(()) => Ok(written),
            Err(e) if !must_complete => {
                warn!(
                    "{}: Snapshot serialized to attribute segment, but failed to update snapshot location or truncate attribute segment: {}",
                    self.trace_id, e
                );
                Ok(written)
            }
            Err(e) => Err(e),
        }
    }

    async fn update_state_post_snapshot(&self, written: WriteInfo, timer: &TimeoutTimer) -> CoreResult<()> {
        let (offset, length) = snapshot_location(written)?;
        let operation = UpdateAttributesOperation::new(
            self.metadata.id(),
            vec![
                AttributeUpdate::new(
                    attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET,
                    AttributeUpdateType::ReplaceIfGreater,
                    offset,
                ),
                AttributeUpdate::new(
                    attributes::LAST_ATTRIBUTE_SNAPSHOT_LENGTH,
                    AttributeUpdateType::Replace,
                    length,
                ),
            ],
        );
        timer
            .run("add", self.operation_log.add(operation, timer.remaining()))
            .await?;
        debug!("{}: Snapshot location updated in main segment's metadata ({}).", self.trace_id, written);

        self.ensure_not_deleted(timer).await?;
        let segment = self.segment()?;
        timer
            .run(
                "truncate",
                self.storage
                    .truncate(segment.handle(), written.offset, timer.remaining()),
            )
            .await
    }

    /// Appends the output of `produce` at the attribute segment's known
    /// length, retrying with fresh output while other writers win the race.
    async fn append_conditionally<F, Fut>(&self, mut produce: F, timer: &TimeoutTimer) -> CoreResult<WriteInfo>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<Bytes>>,
    {
        retry_with_backoff(
            &self.config.append_retry,
            timer,
            &self.trace_id,
            "append",
            CoreError::is_bad_offset,
            move || self.append_once(produce(), timer),
        )
        .await
    }

    async fn append_once<Fut>(&self, produce: Fut, timer: &TimeoutTimer) -> CoreResult<WriteInfo>
    where
        Fut: Future<Output = CoreResult<Bytes>>,
    {
        let segment = self.segment()?;
        self.ensure_not_deleted(timer).await?;

        let offset = segment.length();
        let data = produce.await?;
        let length = data.len() as u64;
        let result = timer
            .run(
                "write",
                self.storage
                    .write(segment.handle(), offset, data, timer.remaining()),
            )
            .await;

        match result {
            Ok(()) => {
                segment.increase_length(length);
                debug!("{}: Wrote data ({}).", self.trace_id, length);
                Ok(WriteInfo::new(offset, length))
            }
            Err(e) if e.is_bad_offset() => {
                let info = timer
                    .run("get_info", self.storage.get_info(segment.name(), timer.remaining()))
                    .await?;
                segment.set_length(info.length);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Fails with `SegmentNotFound` if the primary segment is gone, after
    /// deleting the attribute segment as well.
    async fn ensure_not_deleted(&self, timer: &TimeoutTimer) -> CoreResult<()> {
        if !self.metadata.is_deleted() && !self.metadata.is_merged() {
            return Ok(());
        }

        info!("{}: Main segment is deleted. Attempting to delete attribute segment.", self.trace_id);
        let segment = self.segment()?;
        match timer
            .run("delete", self.storage.delete(segment.handle(), timer.remaining()))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        Err(CoreError::segment_not_found(self.metadata.name()))
    }

    fn cache_values(&self, values: impl Iterator<Item = (AttributeId, i64)>, version: u64) -> CoreResult<()> {
        let mut by_bucket: BTreeMap<usize, Vec<(AttributeId, i64)>> = BTreeMap::new();
        for (id, value) in values {
            by_bucket.entry(bucket_for(id)).or_default().push((id, value));
        }

        for (bucket, values) in by_bucket {
            let (entry, generation) = self.buckets.get_or_create(bucket);
            entry.update_values(values, version, generation)?;
        }
        Ok(())
    }

    /// Returns the cached values (null values included) of `ids`.
    fn get_from_cache(&self, ids: &BTreeSet<AttributeId>) -> CoreResult<HashMap<AttributeId, i64>> {
        let mut by_bucket: BTreeMap<usize, Vec<AttributeId>> = BTreeMap::new();
        for &id in ids {
            by_bucket.entry(bucket_for(id)).or_default().push(id);
        }

        let mut result = HashMap::with_capacity(ids.len());
        for (bucket, ids) in by_bucket {
            if let Some((entry, generation)) = self.buckets.get(bucket) {
                entry.fetch_values(&ids, generation, &mut result)?;
            }
        }
        Ok(result)
    }
}

impl<S: Storage, L: OperationLog> CacheClient for SegmentAttributeIndex<S, L> {
    fn cache_status(&self) -> CacheStatus {
        self.buckets.status()
    }

    fn update_generations(&self, current: u32, oldest: u32) -> CoreResult<u64> {
        if self.is_closed() {
            return Err(CoreError::Closed);
        }
        Ok(self.buckets.evict(current, oldest))
    }
}

impl<S: Storage, L: OperationLog> std::fmt::Debug for SegmentAttributeIndex<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentAttributeIndex")
            .field("trace_id", &self.trace_id)
            .field("segment", &self.segment.get())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Deletes the attribute segment of the segment described by `metadata`.
/// Succeeds if there is none.
///
/// # Errors
///
/// Returns any storage error other than the segment not existing.
pub async fn delete_attributes<S: Storage>(
    metadata: &dyn SegmentMetadata,
    storage: &S,
    timeout: Duration,
) -> CoreResult<()> {
    let timer = TimeoutTimer::new(timeout);
    let name = attribute_segment_name(metadata.name());
    match open_and_delete(storage, &name, &timer).await {
        Ok(()) => {
            debug!("AttributeIndex[{}]: Deleted attribute segment {}.", metadata.id(), name);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

async fn open_and_delete<S: Storage>(storage: &S, name: &str, timer: &TimeoutTimer) -> CoreResult<()> {
    let handle = timer.run("open_write", storage.open_write(name)).await?;
    timer
        .run("delete", storage.delete(&handle, timer.remaining()))
        .await
}

/// Converts a snapshot location into attribute values.
fn snapshot_location(written: WriteInfo) -> CoreResult<(i64, i64)> {
    let convert = |v: u64| {
        i64::try_from(v).map_err(|_| {
            CoreError::codec(format!("snapshot location ({written}) is out of attribute range"))
        })
    };
    Ok((convert(written.offset)?, convert(written.length)?))
}

/// Faults that mean the attribute segment could not be replayed.
fn is_replay_fault(e: &CoreError) -> bool {
    matches!(
        e,
        CoreError::Truncated { .. }
            | CoreError::Codec { .. }
            | CoreError::Storage(StorageError::Io(_) | StorageError::ReadPastEnd { .. })
    )
}
