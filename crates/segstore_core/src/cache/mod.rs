//! Attribute caching.
//!
//! Each index partitions the attribute key space into a fixed number of
//! buckets. A bucket's records are stored as one binary buffer (see
//! [`layout`]) in a shared [`Cache`], keyed by segment and bucket.
//!
//! An external cache manager drives eviction through the [`CacheClient`]
//! contract: it reads each client's [`CacheStatus`] and periodically asks it
//! to drop every bucket older than some generation.

mod entry;
pub mod layout;

pub use entry::CacheEntry;

use crate::error::CoreResult;
use crate::types::{AttributeId, SegmentId};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Number of buckets per index.
pub const BUCKET_COUNT: usize = 128;

const BUCKET_HASH_SEED: u64 = 0x5EC5_7A77_2B0C_4E1D;

/// Returns the bucket that `id` belongs to.
#[must_use]
pub fn bucket_for(id: AttributeId) -> usize {
    (xxh3_64_with_seed(&id.to_be_bytes(), BUCKET_HASH_SEED) % BUCKET_COUNT as u64) as usize
}

/// Key of one bucket in the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Segment owning the bucket.
    pub segment_id: SegmentId,
    /// Bucket number, less than [`BUCKET_COUNT`].
    pub bucket: u32,
}

impl CacheKey {
    /// Creates a new cache key.
    #[must_use]
    pub const fn new(segment_id: SegmentId, bucket: u32) -> Self {
        Self { segment_id, bucket }
    }
}

/// A byte store shared by many indexes.
///
/// Implementations must allow concurrent operations on distinct keys.
pub trait Cache: Send + Sync {
    /// Returns the data stored under `key`.
    fn get(&self, key: &CacheKey) -> Option<Bytes>;

    /// Stores `data` under `key`, replacing any previous data.
    fn insert(&self, key: CacheKey, data: Bytes);

    /// Removes and returns the data stored under `key`.
    fn remove(&self, key: &CacheKey) -> Option<Bytes>;
}

/// In-memory [`Cache`].
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, Bytes>>,
}

impl InMemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the number of entries belonging to `segment_id`.
    #[must_use]
    pub fn segment_entry_count(&self, segment_id: SegmentId) -> usize {
        self.entries
            .read()
            .keys()
            .filter(|k| k.segment_id == segment_id)
            .count()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Cache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.entries.read().get(key).cloned()
    }

    fn insert(&self, key: CacheKey, data: Bytes) {
        self.entries.write().insert(key, data);
    }

    fn remove(&self, key: &CacheKey) -> Option<Bytes> {
        self.entries.write().remove(key)
    }
}

/// Aggregate cache usage of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatus {
    /// Total bytes held in the shared cache.
    pub size: u64,
    /// Oldest generation of any bucket.
    pub min_generation: u32,
    /// Newest generation of any bucket.
    pub max_generation: u32,
}

/// Contract between a cache user and the cache manager.
pub trait CacheClient {
    /// Reports current usage. All fields are zero if nothing is cached.
    fn cache_status(&self) -> CacheStatus;

    /// Records `current` as the current generation and evicts everything
    /// older than `oldest`. Returns the number of bytes freed.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the client has been closed.
    fn update_generations(&self, current: u32, oldest: u32) -> CoreResult<u64>;
}

/// The fixed bucket array of one index.
///
/// The table lock only guards which buckets exist and the current
/// generation; bucket contents are locked per bucket.
pub(crate) struct BucketTable {
    segment_id: SegmentId,
    cache: Arc<dyn Cache>,
    state: Mutex<TableState>,
}

struct TableState {
    buckets: Vec<Option<Arc<CacheEntry>>>,
    current_generation: u32,
}

impl BucketTable {
    pub(crate) fn new(segment_id: SegmentId, cache: Arc<dyn Cache>) -> Self {
        Self {
            segment_id,
            cache,
            state: Mutex::new(TableState {
                buckets: vec![None; BUCKET_COUNT],
                current_generation: 0,
            }),
        }
    }

    pub(crate) fn current_generation(&self) -> u32 {
        self.state.lock().current_generation
    }

    /// Returns the bucket, if it has been created.
    pub(crate) fn get(&self, bucket: usize) -> Option<(Arc<CacheEntry>, u32)> {
        let state = self.state.lock();
        state.buckets[bucket]
            .clone()
            .map(|e| (e, state.current_generation))
    }

    /// Returns the bucket, creating it at the current generation if needed.
    pub(crate) fn get_or_create(&self, bucket: usize) -> (Arc<CacheEntry>, u32) {
        let mut state = self.state.lock();
        let generation = state.current_generation;
        let entry = state.buckets[bucket].get_or_insert_with(|| {
            Arc::new(CacheEntry::new(
                CacheKey::new(self.segment_id, bucket as u32),
                self.cache.clone(),
                generation,
            ))
        });
        (entry.clone(), generation)
    }

    pub(crate) fn status(&self) -> CacheStatus {
        let state = self.state.lock();
        let mut status: Option<CacheStatus> = None;
        for entry in state.buckets.iter().flatten() {
            let generation = entry.generation();
            let size = entry.size();
            status = Some(match status {
                None => CacheStatus {
                    size,
                    min_generation: generation,
                    max_generation: generation,
                },
                Some(s) => CacheStatus {
                    size: s.size + size,
                    min_generation: s.min_generation.min(generation),
                    max_generation: s.max_generation.max(generation),
                },
            });
        }
        status.unwrap_or_default()
    }

    pub(crate) fn evict(&self, current: u32, oldest: u32) -> u64 {
        let mut state = self.state.lock();
        state.current_generation = current;
        let mut freed = 0;
        for slot in &mut state.buckets {
            if slot.as_ref().is_some_and(|e| e.generation() < oldest) {
                if let Some(entry) = slot.take() {
                    freed += entry.clear();
                }
            }
        }
        freed
    }

    pub(crate) fn clear_all(&self) -> u64 {
        let mut state = self.state.lock();
        state
            .buckets
            .iter_mut()
            .filter_map(Option::take)
            .map(|e| e.clear())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(cache: &Arc<InMemoryCache>) -> BucketTable {
        BucketTable::new(SegmentId::new(7), cache.clone())
    }

    #[test]
    fn bucket_for_is_stable_and_in_range() {
        for n in 0..1000u128 {
            let id = AttributeId::new(n * 7919);
            let b = bucket_for(id);
            assert!(b < BUCKET_COUNT);
            assert_eq!(b, bucket_for(id));
        }
    }

    #[test]
    fn bucket_for_spreads_ids() {
        let used: std::collections::HashSet<usize> =
            (0..1000u128).map(|n| bucket_for(AttributeId::new(n))).collect();
        assert!(used.len() > BUCKET_COUNT / 2);
    }

    #[test]
    fn in_memory_cache_operations() {
        let cache = InMemoryCache::new();
        let key = CacheKey::new(SegmentId::new(1), 0);
        assert!(cache.get(&key).is_none());

        cache.insert(key, Bytes::from_static(b"abc"));
        assert_eq!(cache.get(&key).unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(cache.segment_entry_count(SegmentId::new(1)), 1);
        assert_eq!(cache.segment_entry_count(SegmentId::new(2)), 0);

        assert!(cache.remove(&key).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_table_status_is_zero() {
        let cache = Arc::new(InMemoryCache::new());
        assert_eq!(table(&cache).status(), CacheStatus::default());
    }

    #[test]
    fn status_spans_generations() {
        let cache = Arc::new(InMemoryCache::new());
        let table = table(&cache);

        table.evict(3, 0);
        let (a, g) = table.get_or_create(1);
        a.update_values([(AttributeId::new(1), 1)], 1, g).unwrap();

        table.evict(9, 0);
        let (b, g) = table.get_or_create(2);
        b.update_values([(AttributeId::new(2), 2)], 1, g).unwrap();

        let status = table.status();
        assert_eq!(status.min_generation, 3);
        assert_eq!(status.max_generation, 9);
        assert_eq!(status.size, a.size() + b.size());
    }

    #[test]
    fn evict_drops_old_buckets() {
        let cache = Arc::new(InMemoryCache::new());
        let table = table(&cache);

        let (old, g) = table.get_or_create(1);
        old.update_values([(AttributeId::new(1), 1)], 1, g).unwrap();
        table.evict(5, 0);
        let (new, g) = table.get_or_create(2);
        new.update_values([(AttributeId::new(2), 2)], 1, g).unwrap();

        let freed = table.evict(6, 5);
        assert_eq!(freed, 36);
        assert_eq!(old.size(), 0);
        assert!(table.get(1).is_none());
        assert!(table.get(2).is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(table.current_generation(), 6);
    }

    #[test]
    fn clear_all_empties_cache() {
        let cache = Arc::new(InMemoryCache::new());
        let table = table(&cache);
        for bucket in 0..4 {
            let (e, g) = table.get_or_create(bucket);
            e.update_values([(AttributeId::new(bucket as u128), 1)], 1, g)
                .unwrap();
        }

        assert_eq!(table.clear_all(), 4 * 36);
        assert!(cache.is_empty());
        assert_eq!(table.status(), CacheStatus::default());
    }
}
