use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openrum_common::Timestamp;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::entry::BeaconCacheEntry;
use crate::record::{BeaconKey, BeaconRecord};

/// The in-memory record store shared by all beacons of one agent instance.
///
/// Entries are keyed by [`BeaconKey`] and created on first append. A global
/// read-write lock guards the key set; each entry carries its own mutex, so
/// concurrent sessions append without contending with each other.
///
/// The size counter tracks *active* (evictable) bytes only: data staged for
/// sending is owned by the sender until it is committed or restored, and
/// eviction must never touch it.
#[derive(Debug, Default)]
pub struct BeaconCache {
    entries: RwLock<HashMap<BeaconKey, Arc<Mutex<BeaconCacheEntry>>>>,
    size_bytes: AtomicUsize,
    update_lock: Mutex<()>,
    update_signal: Condvar,
}

impl BeaconCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: BeaconKey) -> Option<Arc<Mutex<BeaconCacheEntry>>> {
        self.entries.read().get(&key).cloned()
    }

    fn entry_or_insert(&self, key: BeaconKey) -> Arc<Mutex<BeaconCacheEntry>> {
        if let Some(entry) = self.entry(key) {
            return entry;
        }
        self.entries.write().entry(key).or_default().clone()
    }

    /// Appends an action record under the given key.
    pub fn add_action_data(
        &self,
        key: BeaconKey,
        timestamp: Timestamp,
        data: impl Into<String>,
        action_id: i32,
    ) {
        let entry = self.entry_or_insert(key);
        let added = entry
            .lock()
            .add_action(BeaconRecord::new(timestamp, data, action_id));
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
        self.notify_update();
    }

    /// Appends an event record under the given key.
    pub fn add_event_data(
        &self,
        key: BeaconKey,
        timestamp: Timestamp,
        data: impl Into<String>,
        action_id: i32,
    ) {
        let entry = self.entry_or_insert(key);
        let added = entry
            .lock()
            .add_event(BeaconRecord::new(timestamp, data, action_id));
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
        self.notify_update();
    }

    /// Atomically moves the key's active records into its sending buffer.
    pub fn prepare_data_for_sending(&self, key: BeaconKey) {
        if let Some(entry) = self.entry(key) {
            let moved = entry.lock().prepare_data_for_sending();
            self.size_bytes.fetch_sub(moved, Ordering::Relaxed);
        }
    }

    /// Whether the key has records staged for sending.
    pub fn has_data_for_sending(&self, key: BeaconKey) -> bool {
        self.entry(key)
            .is_some_and(|entry| entry.lock().has_data_to_send())
    }

    /// Builds the next chunk for the key.
    ///
    /// See [`BeaconCacheEntry::next_chunk`] semantics: the chunk's records
    /// stay parked until [`remove_chunked_data`](Self::remove_chunked_data)
    /// or [`reset_chunked_data`](Self::reset_chunked_data) is called.
    pub fn next_beacon_chunk(
        &self,
        key: BeaconKey,
        prefix: &str,
        max_bytes: usize,
        delimiter: char,
    ) -> Option<String> {
        self.entry(key)?
            .lock()
            .next_chunk(prefix, max_bytes, delimiter)
    }

    /// Restores the key's in-flight chunk for a later retry.
    pub fn reset_chunked_data(&self, key: BeaconKey) {
        if let Some(entry) = self.entry(key) {
            entry.lock().reset_chunk();
        }
    }

    /// Commits the drop of the key's in-flight chunk.
    pub fn remove_chunked_data(&self, key: BeaconKey) {
        if let Some(entry) = self.entry(key) {
            entry.lock().remove_chunk();
        }
    }

    /// Removes the key's pending records belonging to a canceled action.
    pub fn remove_records_by_action(&self, key: BeaconKey, action_id: i32) {
        if let Some(entry) = self.entry(key) {
            let removed = entry.lock().remove_records_by_action(action_id);
            self.size_bytes.fetch_sub(removed, Ordering::Relaxed);
        }
    }

    /// Deletes the key and everything buffered under it.
    pub fn delete_cache_entry(&self, key: BeaconKey) {
        let removed = self.entries.write().remove(&key);
        if let Some(entry) = removed {
            let dropped = entry.lock().active_size_bytes();
            self.size_bytes.fetch_sub(dropped, Ordering::Relaxed);
        }
    }

    /// Whether the key holds no records in any stage.
    ///
    /// A key that was never written to (or already deleted) is empty.
    pub fn is_empty(&self, key: BeaconKey) -> bool {
        self.entry(key).is_none_or(|entry| entry.lock().is_empty())
    }

    /// The keys currently present in the cache.
    pub fn beacon_keys(&self) -> Vec<BeaconKey> {
        self.entries.read().keys().copied().collect()
    }

    /// The number of evictable bytes currently cached.
    pub fn cache_size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Evicts all active records produced before `min_timestamp`.
    ///
    /// Returns the number of records evicted.
    pub fn evict_records_by_age(&self, min_timestamp: Timestamp) -> usize {
        let mut evicted = 0;
        for entry in self.entries.read().values() {
            let (records, bytes) = entry.lock().remove_records_older_than(min_timestamp);
            evicted += records;
            self.size_bytes.fetch_sub(bytes, Ordering::Relaxed);
        }
        evicted
    }

    /// Evicts up to `count` of the key's oldest active records.
    ///
    /// Returns the number of records evicted.
    pub fn evict_records_by_number(&self, key: BeaconKey, count: usize) -> usize {
        let Some(entry) = self.entry(key) else {
            return 0;
        };
        let (records, bytes) = entry.lock().remove_oldest_records(count);
        self.size_bytes.fetch_sub(bytes, Ordering::Relaxed);
        records
    }

    /// Blocks until a record is appended or the timeout elapses.
    ///
    /// The eviction thread parks here between passes.
    pub fn wait_for_update(&self, timeout: Duration) {
        let mut guard = self.update_lock.lock();
        self.update_signal.wait_for(&mut guard, timeout);
    }

    /// Wakes every thread parked in [`wait_for_update`](Self::wait_for_update).
    pub fn notify_update(&self) {
        self.update_signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_add_and_chunk_roundtrip() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(1, 0);

        cache.add_event_data(key, ts(1), "et=18", 0);
        cache.add_action_data(key, ts(2), "et=1&na=Home", 1);
        assert_eq!(cache.cache_size_bytes(), 17);

        cache.prepare_data_for_sending(key);
        assert_eq!(cache.cache_size_bytes(), 0);
        assert!(cache.has_data_for_sending(key));

        let chunk = cache.next_beacon_chunk(key, "prefix", 1_024, '&').unwrap();
        assert_eq!(chunk, "prefix&et=18&et=1&na=Home");

        cache.remove_chunked_data(key);
        assert!(!cache.has_data_for_sending(key));
        assert!(cache.is_empty(key));
    }

    #[test]
    fn test_reset_keeps_record_for_retry() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(1, 0);

        cache.add_event_data(key, ts(1), "et=19", 0);
        cache.prepare_data_for_sending(key);

        let chunk = cache.next_beacon_chunk(key, "p", 1_024, '&').unwrap();
        cache.reset_chunked_data(key);

        let retry = cache.next_beacon_chunk(key, "p", 1_024, '&').unwrap();
        assert_eq!(chunk, retry);
    }

    #[test]
    fn test_unknown_key_is_empty() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(9, 9);
        assert!(cache.is_empty(key));
        assert!(!cache.has_data_for_sending(key));
        assert!(cache.next_beacon_chunk(key, "p", 100, '&').is_none());
    }

    #[test]
    fn test_delete_entry_drops_size() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(1, 0);
        cache.add_event_data(key, ts(1), "0123456789", 0);
        assert_eq!(cache.cache_size_bytes(), 10);

        cache.delete_cache_entry(key);
        assert_eq!(cache.cache_size_bytes(), 0);
        assert!(cache.beacon_keys().is_empty());
    }

    #[test]
    fn test_eviction_by_age() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(1, 0);
        cache.add_event_data(key, ts(10), "old", 0);
        cache.add_event_data(key, ts(100), "new", 0);

        let evicted = cache.evict_records_by_age(ts(50));
        assert_eq!(evicted, 1);
        assert_eq!(cache.cache_size_bytes(), 3);
    }

    #[test]
    fn test_eviction_spares_sending_buffer() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(1, 0);
        cache.add_event_data(key, ts(10), "staged", 0);
        cache.prepare_data_for_sending(key);
        cache.add_event_data(key, ts(11), "active", 0);

        assert_eq!(cache.evict_records_by_age(ts(1_000)), 1);
        assert_eq!(cache.evict_records_by_number(key, 10), 0);

        // The staged record survived and still chunks.
        let chunk = cache.next_beacon_chunk(key, "p", 1_024, '&').unwrap();
        assert_eq!(chunk, "p&staged");
    }

    #[test]
    fn test_purge_by_action_id() {
        let cache = BeaconCache::new();
        let key = BeaconKey::new(1, 0);
        cache.add_event_data(key, ts(1), "et=12&na=e&pa=7", 7);
        cache.add_event_data(key, ts(2), "et=12&na=f&pa=3", 3);

        cache.remove_records_by_action(key, 7);
        cache.prepare_data_for_sending(key);
        let chunk = cache.next_beacon_chunk(key, "p", 1_024, '&').unwrap();
        assert_eq!(chunk, "p&et=12&na=f&pa=3");
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let cache = Arc::new(BeaconCache::new());
        let key = BeaconKey::new(1, 0);

        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.add_event_data(key, ts(i), format!("t{thread}i{i}"), 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        cache.prepare_data_for_sending(key);
        let chunk = cache
            .next_beacon_chunk(key, "", usize::MAX, '&')
            .unwrap();
        assert_eq!(chunk.split('&').filter(|s| !s.is_empty()).count(), 400);
    }
}
