//! # segstore Core
//!
//! Per-segment attribute index for segstore.
//!
//! This crate provides:
//! - Attribute collections and their versioned binary format
//! - A hash-bucketed binary cache for attribute values
//! - The [`SegmentAttributeIndex`], a durable, cached key-value store of
//!   attributes backed by an append-only attribute segment
//! - In-memory segment metadata, operation log and cache implementations
//!
//! ## Example
//!
//! ```rust
//! use segstore_core::{
//!     AttributeId, AttributeIndexConfig, InMemoryCache, InMemoryOperationLog,
//!     SegmentAttributeIndex, SegmentId, StreamSegmentMetadata,
//! };
//! use segstore_storage::InMemoryStorage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()
//!     .unwrap();
//! runtime.block_on(async {
//!     let metadata = Arc::new(StreamSegmentMetadata::new(SegmentId::new(1), "scope/stream/0"));
//!     let operation_log = Arc::new(InMemoryOperationLog::new());
//!     operation_log.register(metadata.clone());
//!
//!     let index = SegmentAttributeIndex::new(
//!         metadata,
//!         Arc::new(InMemoryStorage::new()),
//!         operation_log,
//!         Arc::new(InMemoryCache::new()),
//!         AttributeIndexConfig::default(),
//!     )
//!     .unwrap();
//!
//!     let timeout = Duration::from_secs(5);
//!     index.initialize(timeout).await.unwrap();
//!
//!     let id = AttributeId::random();
//!     index.put(id, 42, timeout).await.unwrap();
//!     assert_eq!(index.get(id, timeout).await.unwrap(), Some(42));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attribute;
pub mod cache;
mod config;
mod error;
mod index;
mod metadata;
mod oplog;
mod retry;
mod types;

pub use attribute::{AttributeCollection, AttributeUpdate, AttributeUpdateType};
pub use cache::{Cache, CacheClient, CacheKey, CacheStatus, InMemoryCache};
pub use config::{AttributeIndexConfig, RetryConfig};
pub use error::{CoreError, CoreResult};
pub use index::{delete_attributes, SegmentAttributeIndex};
pub use metadata::{SegmentMetadata, StreamSegmentMetadata};
pub use oplog::{InMemoryOperationLog, OperationLog, UpdateAttributesOperation};
pub use retry::TimeoutTimer;
pub use types::{
    attribute_segment_name, attributes, AttributeId, SegmentId, WriteInfo,
    ATTRIBUTE_SEGMENT_SUFFIX, NULL_ATTRIBUTE_VALUE,
};
