//! The operation log the index records snapshot locations in.

use crate::attribute::AttributeUpdate;
use crate::error::{CoreError, CoreResult};
use crate::metadata::{SegmentMetadata, StreamSegmentMetadata};
use crate::types::SegmentId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An atomic update of some of a segment's core attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAttributesOperation {
    /// Segment to update.
    pub segment_id: SegmentId,
    /// Updates, applied together or not at all.
    pub updates: Vec<AttributeUpdate>,
}

impl UpdateAttributesOperation {
    /// Creates a new operation.
    #[must_use]
    pub fn new(segment_id: SegmentId, updates: Vec<AttributeUpdate>) -> Self {
        Self {
            segment_id,
            updates,
        }
    }
}

/// The container's write-ahead log.
///
/// Once `add` succeeds, the operation is durable and has been applied to
/// the segment's metadata.
pub trait OperationLog: Send + Sync + 'static {
    /// Durably records `operation` and applies it.
    ///
    /// # Errors
    ///
    /// Returns `SegmentNotFound` if the segment no longer exists, or
    /// `OperationLog` if the operation could not be recorded.
    fn add(
        &self,
        operation: UpdateAttributesOperation,
        timeout: Duration,
    ) -> impl Future<Output = CoreResult<()>> + Send;
}

/// In-memory [`OperationLog`] that applies operations to registered
/// segment metadata.
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    segments: RwLock<HashMap<SegmentId, Arc<StreamSegmentMetadata>>>,
    operations: Mutex<Vec<UpdateAttributesOperation>>,
    failing: AtomicBool,
}

impl InMemoryOperationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `metadata` the target of operations for its segment.
    pub fn register(&self, metadata: Arc<StreamSegmentMetadata>) {
        self.segments.write().insert(metadata.id(), metadata);
    }

    /// Makes every subsequent `add` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns all recorded operations, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<UpdateAttributesOperation> {
        self.operations.lock().clone()
    }
}

impl OperationLog for InMemoryOperationLog {
    async fn add(&self, operation: UpdateAttributesOperation, _timeout: Duration) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::operation_log("operation log is unavailable"));
        }

        let metadata = self
            .segments
            .read()
            .get(&operation.segment_id)
            .cloned()
            .ok_or_else(|| CoreError::segment_not_found(operation.segment_id.to_string()))?;
        if metadata.is_deleted() || metadata.is_merged() {
            return Err(CoreError::segment_not_found(metadata.name()));
        }

        let mut operations = self.operations.lock();
        metadata.update_attributes(&operation.updates);
        operations.push(operation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeUpdateType;
    use crate::types::attributes;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn pointer_update(segment_id: SegmentId, offset: i64) -> UpdateAttributesOperation {
        UpdateAttributesOperation::new(
            segment_id,
            vec![AttributeUpdate::new(
                attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET,
                AttributeUpdateType::ReplaceIfGreater,
                offset,
            )],
        )
    }

    #[tokio::test]
    async fn add_applies_to_metadata() {
        let log = InMemoryOperationLog::new();
        let metadata = Arc::new(StreamSegmentMetadata::new(SegmentId::new(3), "s"));
        log.register(metadata.clone());

        log.add(pointer_update(SegmentId::new(3), 64), TIMEOUT).await.unwrap();

        assert_eq!(metadata.attribute(attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET), Some(64));
        assert_eq!(log.operations().len(), 1);
    }

    #[tokio::test]
    async fn unknown_or_deleted_segment_rejected() {
        let log = InMemoryOperationLog::new();
        let err = log.add(pointer_update(SegmentId::new(3), 1), TIMEOUT).await.unwrap_err();
        assert!(err.is_not_found());

        let metadata = Arc::new(StreamSegmentMetadata::new(SegmentId::new(3), "s"));
        log.register(metadata.clone());
        metadata.mark_deleted();
        let err = log.add(pointer_update(SegmentId::new(3), 1), TIMEOUT).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(log.operations().is_empty());
    }

    #[tokio::test]
    async fn failure_injection() {
        let log = InMemoryOperationLog::new();
        let metadata = Arc::new(StreamSegmentMetadata::new(SegmentId::new(3), "s"));
        log.register(metadata.clone());

        log.set_failing(true);
        let err = log.add(pointer_update(SegmentId::new(3), 1), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CoreError::OperationLog { .. }));
        assert_eq!(metadata.attribute(attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET), None);

        log.set_failing(false);
        log.add(pointer_update(SegmentId::new(3), 1), TIMEOUT).await.unwrap();
    }
}
