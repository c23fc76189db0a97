//! Primary segment metadata.

use crate::attribute::AttributeUpdate;
use crate::types::{AttributeId, SegmentId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only view of a primary segment's metadata, as seen by its
/// attribute index.
pub trait SegmentMetadata: Send + Sync {
    /// Returns the segment ID.
    fn id(&self) -> SegmentId;

    /// Returns the segment name.
    fn name(&self) -> &str;

    /// Returns the value of a core attribute, if set.
    fn attribute(&self, id: AttributeId) -> Option<i64>;

    /// Returns whether the segment has been deleted.
    fn is_deleted(&self) -> bool;

    /// Returns whether the segment has been merged into another one.
    fn is_merged(&self) -> bool;
}

/// In-process [`SegmentMetadata`].
#[derive(Debug)]
pub struct StreamSegmentMetadata {
    id: SegmentId,
    name: String,
    attributes: RwLock<HashMap<AttributeId, i64>>,
    deleted: AtomicBool,
    merged: AtomicBool,
}

impl StreamSegmentMetadata {
    /// Creates metadata for a live segment with no attributes.
    pub fn new(id: SegmentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attributes: RwLock::new(HashMap::new()),
            deleted: AtomicBool::new(false),
            merged: AtomicBool::new(false),
        }
    }

    /// Applies `updates` as one atomic change.
    pub fn update_attributes(&self, updates: &[AttributeUpdate]) {
        let mut attributes = self.attributes.write();
        for update in updates {
            if let Some(value) = update.apply(attributes.get(&update.id).copied()) {
                attributes.insert(update.id, value);
            }
        }
    }

    /// Returns a copy of all attributes.
    #[must_use]
    pub fn attributes(&self) -> HashMap<AttributeId, i64> {
        self.attributes.read().clone()
    }

    /// Marks the segment as deleted.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Marks the segment as merged.
    pub fn mark_merged(&self) {
        self.merged.store(true, Ordering::Release);
    }
}

impl SegmentMetadata for StreamSegmentMetadata {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, id: AttributeId) -> Option<i64> {
        self.attributes.read().get(&id).copied()
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn is_merged(&self) -> bool {
        self.merged.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeUpdateType;
    use crate::types::attributes;

    #[test]
    fn update_attributes_applies_all() {
        let metadata = StreamSegmentMetadata::new(SegmentId::new(1), "s");
        metadata.update_attributes(&[
            AttributeUpdate::new(
                attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET,
                AttributeUpdateType::ReplaceIfGreater,
                100,
            ),
            AttributeUpdate::new(
                attributes::LAST_ATTRIBUTE_SNAPSHOT_LENGTH,
                AttributeUpdateType::Replace,
                20,
            ),
        ]);

        assert_eq!(metadata.attribute(attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET), Some(100));
        assert_eq!(metadata.attribute(attributes::LAST_ATTRIBUTE_SNAPSHOT_LENGTH), Some(20));
        assert_eq!(metadata.attributes().len(), 2);
    }

    #[test]
    fn replace_if_greater_never_regresses() {
        let metadata = StreamSegmentMetadata::new(SegmentId::new(1), "s");
        let id = attributes::LAST_ATTRIBUTE_SNAPSHOT_OFFSET;
        metadata.update_attributes(&[AttributeUpdate::new(id, AttributeUpdateType::ReplaceIfGreater, 100)]);
        metadata.update_attributes(&[AttributeUpdate::new(id, AttributeUpdateType::ReplaceIfGreater, 50)]);
        assert_eq!(metadata.attribute(id), Some(100));
    }

    #[test]
    fn deletion_flags() {
        let metadata = StreamSegmentMetadata::new(SegmentId::new(1), "s");
        assert!(!metadata.is_deleted());
        assert!(!metadata.is_merged());

        metadata.mark_merged();
        assert!(metadata.is_merged());
        metadata.mark_deleted();
        assert!(metadata.is_deleted());
    }
}
