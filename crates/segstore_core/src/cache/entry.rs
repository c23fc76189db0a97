//! A single cache bucket.

use super::layout::{self, VersionedValue};
use super::{Cache, CacheKey};
use crate::error::CoreResult;
use crate::types::AttributeId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One hash bucket of an index's attribute cache.
///
/// The bucket's records live in the shared cache store under `key`; the
/// entry itself only tracks the generation and stored size. All reads and
/// writes of the stored buffer happen under the entry's own lock, so two
/// buckets never contend with each other.
pub struct CacheEntry {
    key: CacheKey,
    cache: Arc<dyn Cache>,
    state: Mutex<EntryState>,
}

#[derive(Debug, Default)]
struct EntryState {
    generation: u32,
    size: u64,
}

impl CacheEntry {
    /// Creates an empty entry at `generation`.
    pub(crate) fn new(key: CacheKey, cache: Arc<dyn Cache>, generation: u32) -> Self {
        Self {
            key,
            cache,
            state: Mutex::new(EntryState {
                generation,
                size: 0,
            }),
        }
    }

    /// Returns the key of this entry in the shared cache.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Returns the generation of the last access.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.state.lock().generation
    }

    /// Returns the number of bytes this entry holds in the shared cache.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Looks up `sorted_ids` and inserts every cached value into `result`.
    ///
    /// Cached null values are returned as-is. Any hit moves the entry to
    /// `generation`; a total miss leaves it untouched.
    ///
    /// # Errors
    ///
    /// Returns `CacheEntryCorrupted` if the stored buffer is malformed.
    pub fn fetch_values(
        &self,
        sorted_ids: &[AttributeId],
        generation: u32,
        result: &mut HashMap<AttributeId, i64>,
    ) -> CoreResult<()> {
        let mut state = self.state.lock();
        let Some(data) = self.cache.get(&self.key) else {
            return Ok(());
        };

        let any = layout::find_sorted(&data, sorted_ids, |id, value| {
            result.insert(id, value);
        })?;
        if any {
            state.generation = generation;
        }
        Ok(())
    }

    /// Merges `values` into the entry, tagging them with `version`.
    ///
    /// A cached value is only replaced if its version is lower than
    /// `version`. The merged buffer is always stored back and the entry
    /// moves to `generation`.
    ///
    /// # Errors
    ///
    /// Returns `CacheEntryCorrupted` if the stored buffer is malformed.
    pub fn update_values<I>(&self, values: I, version: u64, generation: u32) -> CoreResult<()>
    where
        I: IntoIterator<Item = (AttributeId, i64)>,
    {
        let mut state = self.state.lock();
        let mut records = match self.cache.get(&self.key) {
            Some(data) => layout::decode_all(&data)?,
            None => Default::default(),
        };

        for (id, value) in values {
            let update = VersionedValue { version, value };
            records
                .entry(id)
                .and_modify(|current| {
                    if current.version < version {
                        *current = update;
                    }
                })
                .or_insert(update);
        }

        let buf = self.cache.remove(&self.key).map(Vec::from).unwrap_or_default();
        let data = layout::encode(buf, &records);
        state.size = data.len() as u64;
        state.generation = generation;
        self.cache.insert(self.key, Bytes::from(data));
        Ok(())
    }

    /// Removes the entry's data from the shared cache and returns the
    /// number of bytes freed.
    pub fn clear(&self) -> u64 {
        let mut state = self.state.lock();
        self.cache.remove(&self.key);
        std::mem::take(&mut state.size)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("generation", &state.generation)
            .field("size", &state.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::CoreError;
    use crate::types::{SegmentId, NULL_ATTRIBUTE_VALUE};
    use proptest::prelude::*;

    fn entry(cache: &Arc<InMemoryCache>) -> CacheEntry {
        CacheEntry::new(CacheKey::new(SegmentId::new(1), 3), cache.clone(), 0)
    }

    fn id(n: u128) -> AttributeId {
        AttributeId::new(n)
    }

    fn fetch(entry: &CacheEntry, ids: &[u128], generation: u32) -> HashMap<AttributeId, i64> {
        let ids: Vec<AttributeId> = ids.iter().copied().map(id).collect();
        let mut result = HashMap::new();
        entry.fetch_values(&ids, generation, &mut result).unwrap();
        result
    }

    #[test]
    fn fetch_from_empty_entry() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        assert!(fetch(&entry, &[1, 2], 5).is_empty());
        assert_eq!(entry.generation(), 0);
    }

    #[test]
    fn update_then_fetch() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        entry
            .update_values([(id(1), 10), (id(2), 20)], 100, 1)
            .unwrap();

        let result = fetch(&entry, &[1, 2, 3], 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[&id(1)], 10);
        assert_eq!(result[&id(2)], 20);
        assert_eq!(entry.generation(), 2);
        assert_eq!(entry.size(), (layout::HEADER_LENGTH + 2 * layout::RECORD_LENGTH) as u64);
    }

    #[test]
    fn total_miss_keeps_generation() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        entry.update_values([(id(1), 10)], 100, 1).unwrap();

        assert!(fetch(&entry, &[7], 9).is_empty());
        assert_eq!(entry.generation(), 1);
    }

    #[test]
    fn older_version_never_overwrites() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        entry.update_values([(id(1), 10)], 200, 1).unwrap();
        entry.update_values([(id(1), 5), (id(2), 6)], 100, 1).unwrap();

        let result = fetch(&entry, &[1, 2], 1);
        assert_eq!(result[&id(1)], 10);
        assert_eq!(result[&id(2)], 6);

        entry.update_values([(id(1), 11)], 300, 1).unwrap();
        assert_eq!(fetch(&entry, &[1], 1)[&id(1)], 11);
    }

    #[test]
    fn null_values_are_cached() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        entry
            .update_values([(id(1), NULL_ATTRIBUTE_VALUE)], 10, 1)
            .unwrap();
        assert_eq!(fetch(&entry, &[1], 1)[&id(1)], NULL_ATTRIBUTE_VALUE);
    }

    #[test]
    fn clear_frees_data() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        entry.update_values([(id(1), 10)], 10, 1).unwrap();
        assert_eq!(cache.len(), 1);

        let freed = entry.clear();
        assert_eq!(freed, (layout::HEADER_LENGTH + layout::RECORD_LENGTH) as u64);
        assert_eq!(entry.size(), 0);
        assert!(cache.is_empty());
        assert!(fetch(&entry, &[1], 1).is_empty());
    }

    #[test]
    fn corrupted_buffer_detected() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        cache.insert(entry.key(), Bytes::from_static(&[0, 0, 0, 1, 9]));

        let mut result = HashMap::new();
        let err = entry.fetch_values(&[id(1)], 1, &mut result).unwrap_err();
        assert!(matches!(err, CoreError::CacheEntryCorrupted { length: 5 }));
    }

    #[test]
    fn failed_update_keeps_stored_bytes() {
        let cache = Arc::new(InMemoryCache::new());
        let entry = entry(&cache);
        entry.update_values([(id(1), 10)], 10, 1).unwrap();
        let size = entry.size();
        cache.insert(entry.key(), Bytes::from_static(&[0, 0, 0, 1, 9]));

        let err = entry.update_values([(id(2), 20)], 20, 2).unwrap_err();
        assert!(matches!(err, CoreError::CacheEntryCorrupted { length: 5 }));
        assert_eq!(cache.get(&entry.key()).unwrap().len(), 5);
        assert_eq!(entry.size(), size);
        assert_eq!(entry.generation(), 1);

        assert_eq!(entry.clear(), size);
        assert!(cache.is_empty());
    }

    #[test]
    fn locked_bucket_does_not_block_others() {
        use crate::cache::BucketTable;
        use std::sync::mpsc;
        use std::time::Duration;

        let cache = Arc::new(InMemoryCache::new());
        let table = Arc::new(BucketTable::new(SegmentId::new(1), cache));
        let (busy, generation) = table.get_or_create(1);
        busy.update_values([(id(1), 10)], 1, generation).unwrap();

        let _held = busy.state.lock();
        let (done_tx, done_rx) = mpsc::channel();
        let worker = {
            let table = table.clone();
            std::thread::spawn(move || {
                let (other, generation) = table.get_or_create(2);
                other.update_values([(id(2), 20)], 1, generation).unwrap();
                let mut result = HashMap::new();
                other.fetch_values(&[id(2)], generation, &mut result).unwrap();
                assert!(table.get(1).is_some());
                done_tx.send(result).unwrap();
            })
        };

        let result = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result[&id(2)], 20);
        worker.join().unwrap();
    }

    proptest! {
        #[test]
        fn highest_version_wins(updates in prop::collection::vec((0u128..8, 0u64..50, any::<i64>()), 1..64)) {
            let cache = Arc::new(InMemoryCache::new());
            let entry = entry(&cache);
            let mut expected: HashMap<AttributeId, (u64, i64)> = HashMap::new();
            for &(n, version, value) in &updates {
                entry.update_values([(id(n), value)], version, 0).unwrap();
                let current = expected.entry(id(n)).or_insert((version, value));
                if current.0 < version {
                    *current = (version, value);
                }
            }

            let ids: Vec<u128> = (0..8).collect();
            let result = fetch(&entry, &ids, 0);
            prop_assert_eq!(result.len(), expected.len());
            for (id, (_, value)) in expected {
                prop_assert_eq!(result[&id], value);
            }
        }
    }
}
