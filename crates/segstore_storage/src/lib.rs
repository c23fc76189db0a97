//! # segstore Storage
//!
//! Backing storage tier contract for segstore.
//!
//! This crate provides the lowest-level storage abstraction: named,
//! append-only segments. The storage tier treats segment contents as
//! **opaque bytes** and knows nothing about the formats written into them.
//!
//! ## Design Principles
//!
//! - Segments are append-only logs written with conditional appends
//! - Truncation is logical: it moves the first readable offset forward
//! - Every operation is asynchronous and carries a timeout
//! - Implementations must be `Send + Sync` for concurrent access
//!
//! ## Available Implementations
//!
//! - [`InMemoryStorage`] - For testing and ephemeral storage

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod segment;

pub use backend::Storage;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use segment::{SegmentHandle, SegmentInfo, SegmentRollingPolicy};
