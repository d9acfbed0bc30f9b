//! A bounded, insertion-ordered mapping with LRU-on-access, plus a side-set
//! of keys to evict at the next DDL commit boundary.
//!
//! Owned by a single `ConnectionView`; not `Sync` — no locking here, the
//! per-database compiled-query cache that *is* shared across connections
//! lives in the `registry` crate instead.

use std::collections::HashSet;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

const DEFAULT_MAXSIZE: usize = 128;

#[derive(Debug)]
pub struct StatementsCache<K, V>
where
    K: Eq + Hash + Clone,
{
    entries: LruCache<K, V>,
    /// Keys marked for eviction at the next DDL commit boundary, via
    /// `add_to_remove_on_ddl`.
    pending_ddl_eviction: HashSet<K>,
}

impl<K, V> StatementsCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(maxsize: usize) -> Self {
        let cap = NonZeroUsize::new(maxsize).unwrap_or_else(|| NonZeroUsize::new(DEFAULT_MAXSIZE).unwrap());
        StatementsCache {
            entries: LruCache::new(cap),
            pending_ddl_eviction: HashSet::new(),
        }
    }

    /// LRU-on-access lookup: promotes the entry to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Inserts or replaces an entry without disturbing LRU order of others
    /// beyond the usual promote-on-touch semantics, evicting the
    /// least-recently-used entry if the cache is at capacity.
    pub fn put(&mut self, key: K, value: V) {
        self.entries.put(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.pending_ddl_eviction.remove(key);
        self.entries.pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All currently cached keys, in LRU order. Used by callers to mark an
    /// existing cache's contents for eviction at the next DDL boundary,
    /// e.g. when a fresh DDL unit starts and every query compiled before it
    /// may observe a different schema once it commits.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `key` to be evicted at the next DDL commit boundary, without
    /// evicting it now (it must remain valid for in-flight uses until the
    /// DDL that invalidates it actually commits).
    pub fn add_to_remove_on_ddl(&mut self, key: K) {
        self.pending_ddl_eviction.insert(key);
    }

    /// True iff capacity has been exceeded and an eviction is needed. The
    /// `lru` crate already self-evicts on `put`, so this only reports
    /// DDL-pending work for callers that drive cleanup incrementally.
    pub fn needs_cleanup(&self) -> bool {
        !self.pending_ddl_eviction.is_empty()
    }

    /// Evicts one DDL-pending key, least-recently-inserted first. Returns
    /// `false` once there is nothing left to clean up.
    pub fn cleanup_one(&mut self) -> bool {
        let Some(key) = self.pending_ddl_eviction.iter().next().cloned() else {
            return false;
        };
        self.pending_ddl_eviction.remove(&key);
        self.entries.pop(&key);
        true
    }

    /// Drives `cleanup_one` to completion — call at a DDL commit boundary.
    pub fn cleanup_on_ddl(&mut self) {
        while self.cleanup_one() {}
    }

    /// Empties the entire cache, e.g. on whole-namespace invalidation.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending_ddl_eviction.clear();
    }
}

impl<K, V> Default for StatementsCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAXSIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_over_capacity() {
        let mut cache: StatementsCache<u32, &str> = StatementsCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn get_promotes_entry_to_most_recently_used() {
        let mut cache: StatementsCache<u32, &str> = StatementsCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.get(&1);
        cache.put(3, "c");

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn keys_lists_all_cached_entries() {
        let mut cache: StatementsCache<u32, &str> = StatementsCache::new(10);
        cache.put(1, "a");
        cache.put(2, "b");

        let mut keys: Vec<u32> = cache.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn ddl_eviction_is_deferred_until_cleanup() {
        let mut cache: StatementsCache<u32, &str> = StatementsCache::new(10);
        cache.put(1, "a");
        cache.add_to_remove_on_ddl(1);

        assert!(cache.contains(&1));
        assert!(cache.needs_cleanup());

        cache.cleanup_on_ddl();

        assert!(!cache.contains(&1));
        assert!(!cache.needs_cleanup());
    }
}
