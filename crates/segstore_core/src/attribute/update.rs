//! Attribute updates applied through the operation log.

use crate::types::AttributeId;

/// How an [`AttributeUpdate`] combines with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUpdateType {
    /// Unconditionally replace the value.
    Replace,
    /// Replace the value only if the new one is greater (or none exists).
    ReplaceIfGreater,
}

/// A single attribute update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeUpdate {
    /// The attribute to update.
    pub id: AttributeId,
    /// Update semantics.
    pub update_type: AttributeUpdateType,
    /// The new value.
    pub value: i64,
}

impl AttributeUpdate {
    /// Creates a new update.
    #[must_use]
    pub const fn new(id: AttributeId, update_type: AttributeUpdateType, value: i64) -> Self {
        Self {
            id,
            update_type,
            value,
        }
    }

    /// Computes the value that results from applying this update on top
    /// of `current`. Returns `None` if the update has no effect.
    #[must_use]
    pub fn apply(&self, current: Option<i64>) -> Option<i64> {
        match (self.update_type, current) {
            (AttributeUpdateType::Replace, _) => Some(self.value),
            (AttributeUpdateType::ReplaceIfGreater, Some(existing)) if existing >= self.value => {
                None
            }
            (AttributeUpdateType::ReplaceIfGreater, _) => Some(self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: AttributeId = AttributeId::new(7);

    #[test]
    fn replace_always_applies() {
        let u = AttributeUpdate::new(ID, AttributeUpdateType::Replace, 3);
        assert_eq!(u.apply(None), Some(3));
        assert_eq!(u.apply(Some(10)), Some(3));
    }

    #[test]
    fn replace_if_greater_never_regresses() {
        let u = AttributeUpdate::new(ID, AttributeUpdateType::ReplaceIfGreater, 5);
        assert_eq!(u.apply(None), Some(5));
        assert_eq!(u.apply(Some(4)), Some(5));
        assert_eq!(u.apply(Some(5)), None);
        assert_eq!(u.apply(Some(9)), None);
    }
}
