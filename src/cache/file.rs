use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::{AtomicStats, Cache, CacheError, CacheStats, is_expired};
use crate::clock::{self, Clock};

const EXTENSION: &str = "cache";

#[derive(Serialize, Deserialize)]
struct Record {
    value: Value,
    expires: Option<u64>,
    created_at: u64,
}

/// Directory-backed cache: one JSON file per key.
///
/// Keys are sanitized to `[A-Za-z0-9_-]` for the file name, so `"rate_limit:ab"`
/// and `"rate_limit_ab"` share a file. Writes land in a temporary file that is
/// then renamed over the target, so readers never see a partial record.
pub struct FileCache {
    dir: PathBuf,
    default_ttl: Option<Duration>,
    stats: AtomicStats,
    clock: Arc<dyn Clock>,
    tmp_seq: AtomicU64,
}

impl FileCache {
    /// Opens (creating if necessary) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "file cache opened");
        Ok(Self {
            dir,
            default_ttl: None,
            stats: AtomicStats::default(),
            clock: clock::system(),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Lifetime applied when [`Cache::set`] is called without a TTL.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl.filter(|t| !t.is_zero());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", sanitize(key)))
    }

    fn read(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: Record = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(error) => {
                warn!(key, path = %path.display(), %error, "discarding unreadable cache file");
                remove(&path)?;
                return Ok(None);
            }
        };

        if is_expired(record.expires, self.clock.now()) {
            trace!(key, "cache entry expired");
            remove(&path)?;
            return Ok(None);
        }
        Ok(Some(record.value))
    }
}

impl Cache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let value = self.read(key)?;
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
        let now = self.clock.now();
        let expires = ttl
            .or(self.default_ttl)
            .map(|ttl| now.saturating_add(ttl.as_secs()));
        let record = Record {
            value,
            expires,
            created_at: now,
        };

        let path = self.path_for(key);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{}.{}.{seq}.tmp", sanitize(key), std::process::id()));
        fs::write(&tmp, serde_json::to_vec(&record)?)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            // Best effort; the rename error is the one worth reporting.
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        self.stats.write();
        trace!(key, ?expires, "cache write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = remove(&self.path_for(key))?;
        if removed {
            self.stats.delete();
            trace!(key, "cache delete");
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
                remove(&path)?;
                removed += 1;
            }
        }
        self.stats.reset();
        debug!(dir = %self.dir.display(), removed, "file cache cleared");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.read(key)?.is_some())
    }
}

fn remove(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (FileCache, ManualClock, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1_000);
        let cache = FileCache::open(dir.path().join("cache"))
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        (cache, clock, dir)
    }

    #[test]
    fn open_creates_the_directory() {
        let (cache, _, _dir) = cache();
        assert!(cache.dir().is_dir());
    }

    #[test]
    fn values_round_trip_through_disk() {
        let (cache, _, _dir) = cache();
        cache.set("user:42", json!({"name": "ada"}), None).unwrap();
        assert_eq!(cache.get("user:42").unwrap(), Some(json!({"name": "ada"})));
        assert!(cache.dir().join("user_42.cache").is_file());
    }

    #[test]
    fn record_format_is_plain_json() {
        let (cache, _, _dir) = cache();
        cache.set("k", json!(7), Some(Duration::from_secs(30))).unwrap();
        let raw: Value =
            serde_json::from_slice(&fs::read(cache.dir().join("k.cache")).unwrap()).unwrap();
        assert_eq!(raw, json!({"value": 7, "expires": 1_030, "created_at": 1_000}));
    }

    #[test]
    fn expired_files_are_removed_on_read() {
        let (cache, clock, _dir) = cache();
        cache.set("k", json!(1), Some(Duration::from_secs(10))).unwrap();
        clock.advance(Duration::from_secs(11));
        assert!(!cache.has("k").unwrap());
        assert!(!cache.dir().join("k.cache").exists());
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let (cache, clock, _dir) = cache();
        let cache = cache.with_default_ttl(Some(Duration::from_secs(5)));
        cache.set("k", json!(1), None).unwrap();
        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn corrupt_files_read_as_misses() {
        let (cache, _, _dir) = cache();
        fs::write(cache.dir().join("k.cache"), b"not json").unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn clear_removes_only_cache_files() {
        let (cache, _, _dir) = cache();
        cache.set("a", json!(1), None).unwrap();
        cache.set("b", json!(2), None).unwrap();
        fs::write(cache.dir().join("notes.txt"), b"keep").unwrap();

        cache.clear().unwrap();
        assert!(!cache.has("a").unwrap());
        assert!(cache.dir().join("notes.txt").exists());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn delete_reports_presence() {
        let (cache, _, _dir) = cache();
        cache.set("k", json!(1), None).unwrap();
        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert_eq!(cache.stats().deletes, 1);
    }

    #[test]
    fn sanitize_replaces_everything_outside_the_safe_set() {
        assert_eq!(sanitize("rate_limit:abc-1/2 x"), "rate_limit_abc-1_2_x");
    }
}
