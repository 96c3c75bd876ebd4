//! Key-value caching with lazy TTL expiry.
//!
//! [`Cache`] is the object-safe core every backend implements; values are JSON
//! documents ([`serde_json::Value`]). [`CacheExt`] layers typed and batch helpers
//! on top of any cache, including `dyn Cache`.
//!
//! | Backend         | Storage                              | Survives restart |
//! |-----------------|--------------------------------------|------------------|
//! | [`MemoryCache`] | concurrent in-process map            | no               |
//! | [`FileCache`]   | one JSON file per key in a directory | yes              |
//!
//! Expired entries are removed when they are next read, never in the background.

mod file;
mod memory;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use file::FileCache;
pub use memory::MemoryCache;

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Counters kept by every backend since creation or the last [`Cache::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl CacheStats {
    /// Hits as a percentage of all reads, `0.0` before the first read.
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            self.hits as f64 / reads as f64 * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.writes, &self.deletes] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// A shared key-value store.
///
/// Operations on different keys are independent; there is no cross-key
/// transaction and no compare-and-swap.
pub trait Cache: Send + Sync {
    /// The value stored under `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Stores `value`. `ttl: None` uses the backend's default lifetime.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Removes `key`, returning whether anything was stored under it.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every entry and resets the statistics.
    fn clear(&self) -> Result<(), CacheError>;

    fn stats(&self) -> CacheStats;

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Typed and batch helpers, available on every [`Cache`].
pub trait CacheExt: Cache {
    fn get_as<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_as<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        self.set(key, serde_json::to_value(value)?, ttl)
    }

    /// Returns the cached value, or computes it with `compute`, stores it, and
    /// returns it.
    fn remember<T, F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(cached) = self.get_as(key)? {
            return Ok(cached);
        }
        let value = compute();
        self.set_as(key, &value, ttl)?;
        Ok(value)
    }

    fn get_many<'k, I>(&self, keys: I) -> Result<HashMap<String, Option<Value>>, CacheError>
    where
        I: IntoIterator<Item = &'k str>,
    {
        keys.into_iter()
            .map(|key| Ok((key.to_owned(), self.get(key)?)))
            .collect()
    }

    fn set_many<I, K>(&self, entries: I, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), value, ttl)?;
        }
        Ok(())
    }

    /// Deletes every key, returning how many were present.
    fn delete_many<'k, I>(&self, keys: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut removed = 0;
        for key in keys {
            if self.delete(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// `true` once `now` is past `expires_at`. An entry is still readable during
/// its last second.
pub(crate) fn is_expired(expires_at: Option<u64>, now: u64) -> bool {
    expires_at.is_some_and(|at| at < now)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn cache() -> Arc<dyn Cache> {
        Arc::new(MemoryCache::with_clock(Arc::new(ManualClock::new(0))))
    }

    #[test]
    fn typed_round_trip_through_dyn_cache() {
        let cache = cache();
        let profile = Profile {
            name: "ada".into(),
            visits: 3,
        };
        cache.set_as("profile", &profile, None).unwrap();
        assert_eq!(cache.get_as::<Profile>("profile").unwrap(), Some(profile));
        assert_eq!(cache.get_as::<Profile>("missing").unwrap(), None);
    }

    #[test]
    fn get_as_with_wrong_shape_is_an_error() {
        let cache = cache();
        cache.set("n", json!("not a profile"), None).unwrap();
        assert!(matches!(
            cache.get_as::<Profile>("n"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn remember_computes_once() {
        let cache = cache();
        let mut calls = 0;
        let first: u32 = cache
            .remember("answer", None, || {
                calls += 1;
                42
            })
            .unwrap();
        let second: u32 = cache.remember("answer", None, || 0).unwrap();
        assert_eq!((first, second, calls), (42, 42, 1));
    }

    #[test]
    fn batch_helpers() {
        let cache = cache();
        cache
            .set_many([("a", json!(1)), ("b", json!(2))], None)
            .unwrap();

        let found = cache.get_many(["a", "b", "c"]).unwrap();
        assert_eq!(found["a"], Some(json!(1)));
        assert_eq!(found["c"], None);

        assert_eq!(cache.delete_many(["a", "c"]).unwrap(), 1);
        assert!(!cache.has("a").unwrap());
        assert!(cache.has("b").unwrap());
    }

    #[test]
    fn hit_ratio_is_a_percentage() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert_eq!(stats.hit_ratio(), 75.0);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        assert!(!is_expired(None, u64::MAX));
        assert!(!is_expired(Some(10), 10));
        assert!(is_expired(Some(10), 11));
    }
}
