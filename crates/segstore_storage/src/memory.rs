//! In-memory storage for testing.

use crate::backend::Storage;
use crate::error::{StorageError, StorageResult};
use crate::segment::{SegmentHandle, SegmentInfo, SegmentRollingPolicy};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An in-memory storage tier.
///
/// All segments live in memory. This is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral deployments that don't need persistence
///
/// # Ownership
///
/// The storage tracks an owner epoch. [`InMemoryStorage::change_owner`]
/// simulates another instance taking over: every segment becomes fenced
/// and all operations on it fail with `NotOwned` until it is reopened
/// with [`Storage::open_write`].
///
/// # Example
///
/// ```rust
/// use segstore_storage::{InMemoryStorage, SegmentRollingPolicy, Storage};
/// use std::time::Duration;
///
/// let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// runtime.block_on(async {
///     let storage = InMemoryStorage::new();
///     let timeout = Duration::from_secs(1);
///     storage.create("s", SegmentRollingPolicy::NO_ROLLING, timeout).await.unwrap();
///     let handle = storage.open_write("s").await.unwrap();
///     storage.write(&handle, 0, "abc".into(), timeout).await.unwrap();
///     assert_eq!(storage.get_info("s", timeout).await.unwrap().length, 3);
/// });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    segments: RwLock<HashMap<String, Arc<Mutex<SegmentData>>>>,
    owner_epoch: AtomicU64,
}

#[derive(Debug)]
struct SegmentData {
    /// Bytes from `start_offset` to the end of the segment.
    data: Vec<u8>,
    start_offset: u64,
    sealed: bool,
    owner_epoch: u64,
    rolling_policy: SegmentRollingPolicy,
}

impl SegmentData {
    fn length(&self) -> u64 {
        self.start_offset + self.data.len() as u64
    }

    /// Number of chunks holding readable bytes under the rolling policy.
    fn chunk_count(&self) -> u64 {
        let length = self.length();
        if length == self.start_offset {
            return 0;
        }
        let max_length = self.rolling_policy.max_length.max(1);
        (length - 1) / max_length - self.start_offset / max_length + 1
    }

    fn info(&self, name: &str) -> SegmentInfo {
        SegmentInfo {
            name: name.to_string(),
            length: self.length(),
            start_offset: self.start_offset,
            sealed: self.sealed,
        }
    }
}

impl InMemoryStorage {
    /// Creates a new empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates another instance claiming ownership of every segment.
    pub fn change_owner(&self) {
        self.owner_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns whether a segment with this name exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.segments.read().contains_key(name)
    }

    /// Returns a copy of the readable bytes of a segment.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.segments
            .read()
            .get(name)
            .map(|segment| segment.lock().data.clone())
    }

    /// Returns the number of chunks the segment's readable bytes span under
    /// its rolling policy.
    #[must_use]
    pub fn chunk_count(&self, name: &str) -> Option<u64> {
        self.segments
            .read()
            .get(name)
            .map(|segment| segment.lock().chunk_count())
    }

    fn segment(&self, name: &str) -> StorageResult<Arc<Mutex<SegmentData>>> {
        self.segments
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(name))
    }

    fn current_epoch(&self) -> u64 {
        self.owner_epoch.load(Ordering::SeqCst)
    }

    /// Runs `f` against an owned segment.
    fn with_owned<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SegmentData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let segment = self.segment(name)?;
        let mut segment = segment.lock();
        if segment.owner_epoch != self.current_epoch() {
            return Err(StorageError::not_owned(name));
        }
        f(&mut segment)
    }
}

impl Storage for InMemoryStorage {
    async fn create(
        &self,
        name: &str,
        rolling_policy: SegmentRollingPolicy,
        _timeout: Duration,
    ) -> StorageResult<SegmentInfo> {
        let mut segments = self.segments.write();
        if segments.contains_key(name) {
            return Err(StorageError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let data = SegmentData {
            data: Vec::new(),
            start_offset: 0,
            sealed: false,
            owner_epoch: self.current_epoch(),
            rolling_policy,
        };
        let info = data.info(name);
        segments.insert(name.to_string(), Arc::new(Mutex::new(data)));
        Ok(info)
    }

    async fn open_write(&self, name: &str) -> StorageResult<SegmentHandle> {
        let segment = self.segment(name)?;
        segment.lock().owner_epoch = self.current_epoch();
        Ok(SegmentHandle::writable(name))
    }

    async fn get_info(&self, name: &str, _timeout: Duration) -> StorageResult<SegmentInfo> {
        self.with_owned(name, |segment| Ok(segment.info(name)))
    }

    async fn write(
        &self,
        handle: &SegmentHandle,
        offset: u64,
        data: Bytes,
        _timeout: Duration,
    ) -> StorageResult<()> {
        let name = handle.segment_name();
        if handle.is_read_only() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot write to {name} using a read-only handle"),
            )));
        }

        self.with_owned(name, |segment| {
            if segment.sealed {
                return Err(StorageError::sealed(name));
            }

            let length = segment.length();
            if offset != length {
                return Err(StorageError::BadOffset {
                    name: name.to_string(),
                    expected: offset,
                    actual: length,
                });
            }

            segment.data.extend_from_slice(&data);
            Ok(())
        })
    }

    async fn read(
        &self,
        handle: &SegmentHandle,
        offset: u64,
        length: usize,
        _timeout: Duration,
    ) -> StorageResult<Bytes> {
        let name = handle.segment_name();
        self.with_owned(name, |segment| {
            if offset < segment.start_offset {
                return Err(StorageError::Truncated {
                    name: name.to_string(),
                    offset,
                    start_offset: segment.start_offset,
                });
            }

            let size = segment.length();
            let end = offset.saturating_add(length as u64);
            if end > size {
                return Err(StorageError::ReadPastEnd {
                    offset,
                    len: length,
                    size,
                });
            }

            let from = (offset - segment.start_offset) as usize;
            Ok(Bytes::copy_from_slice(&segment.data[from..from + length]))
        })
    }

    async fn truncate(
        &self,
        handle: &SegmentHandle,
        offset: u64,
        _timeout: Duration,
    ) -> StorageResult<()> {
        let name = handle.segment_name();
        self.with_owned(name, |segment| {
            if segment.sealed {
                return Err(StorageError::sealed(name));
            }

            let length = segment.length();
            if offset > length {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "cannot truncate {name} at offset {offset} which is beyond its length {length}"
                    ),
                )));
            }

            if offset > segment.start_offset {
                let drop = (offset - segment.start_offset) as usize;
                segment.data.drain(..drop);
                segment.start_offset = offset;
            }
            Ok(())
        })
    }

    async fn seal(&self, handle: &SegmentHandle, _timeout: Duration) -> StorageResult<()> {
        let name = handle.segment_name();
        self.with_owned(name, |segment| {
            if segment.sealed {
                return Err(StorageError::sealed(name));
            }
            segment.sealed = true;
            Ok(())
        })
    }

    async fn delete(&self, handle: &SegmentHandle, _timeout: Duration) -> StorageResult<()> {
        let name = handle.segment_name();
        self.with_owned(name, |_| Ok(()))?;
        self.segments
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn create_segment(storage: &InMemoryStorage, name: &str) -> SegmentHandle {
        storage
            .create(name, SegmentRollingPolicy::NO_ROLLING, TIMEOUT)
            .await
            .unwrap();
        storage.open_write(name).await.unwrap()
    }

    #[tokio::test]
    async fn create_is_empty() {
        let storage = InMemoryStorage::new();
        let info = storage
            .create("s", SegmentRollingPolicy::NO_ROLLING, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(info.length, 0);
        assert!(!info.sealed);
        assert!(storage.exists("s"));
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let storage = InMemoryStorage::new();
        create_segment(&storage, "s").await;
        let result = storage
            .create("s", SegmentRollingPolicy::NO_ROLLING, TIMEOUT)
            .await;
        assert!(matches!(result, Err(StorageError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn open_missing_fails() {
        let storage = InMemoryStorage::new();
        let result = storage.open_write("missing").await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn conditional_write() {
        let storage = InMemoryStorage::new();
        let handle = create_segment(&storage, "s").await;

        storage
            .write(&handle, 0, Bytes::from_static(b"hello"), TIMEOUT)
            .await
            .unwrap();

        // Stale offset is rejected.
        let err = storage
            .write(&handle, 0, Bytes::from_static(b"x"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_bad_offset());

        storage
            .write(&handle, 5, Bytes::from_static(b" world"), TIMEOUT)
            .await
            .unwrap();
        let data = storage.read(&handle, 0, 11, TIMEOUT).await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn read_past_end_fails() {
        let storage = InMemoryStorage::new();
        let handle = create_segment(&storage, "s").await;
        storage
            .write(&handle, 0, Bytes::from_static(b"hello"), TIMEOUT)
            .await
            .unwrap();

        let result = storage.read(&handle, 3, 10, TIMEOUT).await;
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[tokio::test]
    async fn truncate_is_logical() {
        let storage = InMemoryStorage::new();
        let handle = create_segment(&storage, "s").await;
        storage
            .write(&handle, 0, Bytes::from_static(b"hello world"), TIMEOUT)
            .await
            .unwrap();

        storage.truncate(&handle, 6, TIMEOUT).await.unwrap();
        let info = storage.get_info("s", TIMEOUT).await.unwrap();
        assert_eq!(info.length, 11);
        assert_eq!(info.start_offset, 6);

        let err = storage.read(&handle, 0, 5, TIMEOUT).await.unwrap_err();
        assert!(err.is_truncated());
        let data = storage.read(&handle, 6, 5, TIMEOUT).await.unwrap();
        assert_eq!(&data[..], b"world");

        // Writes still land at the end.
        storage
            .write(&handle, 11, Bytes::from_static(b"!"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(storage.contents("s").unwrap(), b"world!");
    }

    #[tokio::test]
    async fn sealed_rejects_writes() {
        let storage = InMemoryStorage::new();
        let handle = create_segment(&storage, "s").await;
        storage.seal(&handle, TIMEOUT).await.unwrap();

        let err = storage
            .write(&handle, 0, Bytes::from_static(b"x"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_sealed());
        assert!(storage.seal(&handle, TIMEOUT).await.unwrap_err().is_sealed());
        assert!(storage.get_info("s", TIMEOUT).await.unwrap().sealed);
    }

    #[tokio::test]
    async fn rolling_policy_splits_without_limiting_length() {
        let storage = InMemoryStorage::new();
        storage
            .create("s", SegmentRollingPolicy::new(4), TIMEOUT)
            .await
            .unwrap();
        let handle = storage.open_write("s").await.unwrap();
        assert_eq!(storage.chunk_count("s"), Some(0));

        storage
            .write(&handle, 0, Bytes::from_static(b"hello"), TIMEOUT)
            .await
            .unwrap();
        storage
            .write(&handle, 5, Bytes::from_static(b" world"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(storage.get_info("s", TIMEOUT).await.unwrap().length, 11);
        assert_eq!(storage.chunk_count("s"), Some(3));

        // Chunks below the truncation point go away.
        storage.truncate(&handle, 8, TIMEOUT).await.unwrap();
        assert_eq!(storage.chunk_count("s"), Some(1));
        storage.truncate(&handle, 11, TIMEOUT).await.unwrap();
        assert_eq!(storage.chunk_count("s"), Some(0));
        assert_eq!(storage.chunk_count("missing"), None);
    }

    #[tokio::test]
    async fn delete_then_not_found() {
        let storage = InMemoryStorage::new();
        let handle = create_segment(&storage, "s").await;
        storage.delete(&handle, TIMEOUT).await.unwrap();
        assert!(!storage.exists("s"));
        assert!(storage.delete(&handle, TIMEOUT).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn change_owner_fences_until_reopen() {
        let storage = InMemoryStorage::new();
        let handle = create_segment(&storage, "s").await;
        storage
            .write(&handle, 0, Bytes::from_static(b"hello"), TIMEOUT)
            .await
            .unwrap();

        storage.change_owner();
        assert!(matches!(
            storage.get_info("s", TIMEOUT).await,
            Err(StorageError::NotOwned { .. })
        ));
        assert!(matches!(
            storage.write(&handle, 5, Bytes::from_static(b"x"), TIMEOUT).await,
            Err(StorageError::NotOwned { .. })
        ));
        assert!(matches!(
            storage.read(&handle, 0, 1, TIMEOUT).await,
            Err(StorageError::NotOwned { .. })
        ));
        assert!(matches!(
            storage.seal(&handle, TIMEOUT).await,
            Err(StorageError::NotOwned { .. })
        ));

        let handle = storage.open_write("s").await.unwrap();
        storage
            .write(&handle, 5, Bytes::from_static(b"x"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(storage.get_info("s", TIMEOUT).await.unwrap().length, 6);
    }
}
