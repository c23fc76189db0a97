//! Attribute values, collections and updates.
//!
//! Attributes are small integer-valued metadata attached to a segment:
//! a 128-bit [`AttributeId`](crate::AttributeId) mapped to an `i64`.
//! The value [`NULL_ATTRIBUTE_VALUE`](crate::NULL_ATTRIBUTE_VALUE)
//! is a tombstone meaning "absent".

mod collection;
mod update;

pub use collection::{AttributeCollection, FORMAT_REVISION, FORMAT_VERSION};
pub use update::{AttributeUpdate, AttributeUpdateType};
