use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

use super::{AtomicStats, Cache, CacheError, CacheStats, is_expired};
use crate::clock::{self, Clock};

struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

/// In-process cache backed by a sharded concurrent map.
///
/// Entries without a TTL live until deleted or cleared. Nothing survives the
/// process.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    stats: AtomicStats,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            stats: AtomicStats::default(),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if !is_expired(entry.expires_at, now) {
                return Some(entry.value.clone());
            }
        }
        if self
            .entries
            .remove_if(key, |_, entry| is_expired(entry.expires_at, now))
            .is_some()
        {
            trace!(key, "cache entry expired");
        }
        None
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let value = self.lookup(key);
        if value.is_some() {
            self.stats.hit();
            trace!(key, "cache hit");
        } else {
            self.stats.miss();
            trace!(key, "cache miss");
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| self.clock.now().saturating_add(ttl.as_secs()));
        self.entries
            .insert(key.to_owned(), Entry { value, expires_at });
        self.stats.write();
        trace!(key, ?expires_at, "cache write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.delete();
            trace!(key, "cache delete");
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        self.stats.reset();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // Existence checks do not count as reads.
    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lookup(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    fn cache_at(start: u64) -> (MemoryCache, ManualClock) {
        let clock = ManualClock::new(start);
        (MemoryCache::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn get_set_delete() {
        let (cache, _) = cache_at(0);
        assert_eq!(cache.get("k").unwrap(), None);
        cache.set("k", json!({"a": 1}), None).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!({"a": 1})));
        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn entries_expire_lazily() {
        let (cache, clock) = cache_at(1_000);
        cache.set("k", json!(1), Some(Duration::from_secs(60))).unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(cache.has("k").unwrap());

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn overwrite_without_ttl_clears_expiry() {
        let (cache, clock) = cache_at(0);
        cache.set("k", json!(1), Some(Duration::from_secs(5))).unwrap();
        cache.set("k", json!(2), None).unwrap();
        clock.advance(Duration::from_secs(3_600));
        assert_eq!(cache.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn stats_track_traffic_and_reset_on_clear() {
        let (cache, _) = cache_at(0);
        cache.set("k", json!(1), None).unwrap();
        cache.get("k").unwrap();
        cache.get("other").unwrap();
        cache.has("k").unwrap();
        cache.delete("k").unwrap();

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                writes: 1,
                deletes: 1
            }
        );

        cache.clear().unwrap();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn independent_keys_from_many_threads() {
        let (cache, _) = cache_at(0);
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..100 {
                        cache.set(&format!("t{i}:{n}"), json!(n), None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
