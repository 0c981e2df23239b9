//! Bounded LRU+TTL cache.
//!
//! Every cache in this crate (URI resolution, metadata, image bytes, transformed
//! images) is an instance of this one generic structure, injected explicitly into
//! the component that uses it rather than hidden behind a process-global singleton.

use std::hash::Hash;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A bounded map from `K` to `V` with per-entry TTL and recency-ordered eviction.
///
/// `get`/`set` both take an explicit `now: Instant` so tests can drive expiry
/// deterministically without sleeping, and so no suspension point hides inside
/// a cache operation.
pub struct LruTtlCache<K, V> {
    capacity: usize,
    entries: IndexMap<K, Entry<V>>,
}

impl<K, V> LruTtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Looks up `key`. A found-but-expired entry is removed and `None` is
    /// returned; a found-and-live entry is moved to most-recently-used position
    /// before being returned.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => return None,
        };

        if expired {
            self.entries.shift_remove(key);
            return None;
        }

        // Move to the end (most-recently-used) by removing and reinserting.
        let (k, entry) = self.entries.shift_remove_entry(key)?;
        let value = entry.value.clone();
        self.entries.insert(k, entry);
        Some(value)
    }

    /// Inserts or overwrites `key`, then evicts the oldest entries (strict
    /// insertion order, ties broken oldest-first) until size is back at capacity.
    pub fn set(&mut self, key: K, value: V, ttl: Duration, now: Instant) {
        let expires_at = now + ttl;
        // Remove first so a re-insert of an existing key lands at the end
        // (refreshed recency), matching the documented "overwrites" behavior.
        self.entries.shift_remove(&key);
        self.entries.insert(key, Entry { value, expires_at });

        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry without touching recency order of live entries.
    /// Not required for correctness (expiry is also checked lazily on `get`), but
    /// keeps long-lived processes from holding stale capacity hostage.
    pub fn sweep_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_before_any_set() {
        let mut cache: LruTtlCache<&str, i32> = LruTtlCache::new(2);
        assert_eq!(cache.get(&"a", Instant::now()), None);
    }

    #[test]
    fn set_then_get_within_ttl_hits() {
        let mut cache = LruTtlCache::new(2);
        let t0 = Instant::now();
        cache.set("a", 1, Duration::from_secs(60), t0);
        assert_eq!(cache.get(&"a", t0 + Duration::from_secs(30)), Some(1));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let mut cache = LruTtlCache::new(2);
        let t0 = Instant::now();
        cache.set("a", 1, Duration::from_secs(10), t0);
        assert_eq!(cache.get(&"a", t0 + Duration::from_secs(11)), None);
        // And it's actually gone, not just reported missing once.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_is_strict_insertion_order() {
        let mut cache = LruTtlCache::new(2);
        let t0 = Instant::now();
        let ttl = Duration::from_secs(300);
        cache.set("a", 1, ttl, t0);
        cache.set("b", 2, ttl, t0);
        cache.set("c", 3, ttl, t0); // evicts "a", the oldest
        assert_eq!(cache.get(&"a", t0), None);
        assert_eq!(cache.get(&"b", t0), Some(2));
        assert_eq!(cache.get(&"c", t0), Some(3));
    }

    #[test]
    fn get_refreshes_recency_so_it_survives_next_eviction() {
        let mut cache = LruTtlCache::new(2);
        let t0 = Instant::now();
        let ttl = Duration::from_secs(300);
        cache.set("a", 1, ttl, t0);
        cache.set("b", 2, ttl, t0);
        // Touch "a" so "b" becomes the oldest.
        assert_eq!(cache.get(&"a", t0), Some(1));
        cache.set("c", 3, ttl, t0); // should evict "b", not "a"
        assert_eq!(cache.get(&"a", t0), Some(1));
        assert_eq!(cache.get(&"b", t0), None);
        assert_eq!(cache.get(&"c", t0), Some(3));
    }

    #[test]
    fn overwriting_an_existing_key_refreshes_its_position() {
        let mut cache = LruTtlCache::new(2);
        let t0 = Instant::now();
        let ttl = Duration::from_secs(300);
        cache.set("a", 1, ttl, t0);
        cache.set("b", 2, ttl, t0);
        cache.set("a", 10, ttl, t0); // "a" refreshed, "b" now oldest
        cache.set("c", 3, ttl, t0); // evicts "b"
        assert_eq!(cache.get(&"a", t0), Some(10));
        assert_eq!(cache.get(&"b", t0), None);
    }
}
