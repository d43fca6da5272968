//! Content-addressed disk cache for backend responses.
//!
//! Entries live at `{dir}/{key[0..2]}/{key}.json` where `key` is the
//! SHA-256 fingerprint of `(model, system prompt, prompt)`. Each entry records
//! when it was written; reads past the TTL delete the entry and miss.
//! Concurrent writers of the same key race and the last rename wins.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from cache maintenance and writes.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    timestamp: DateTime<Utc>,
    model: String,
    response: T,
}

/// Just enough of an entry to age it.
#[derive(Deserialize)]
struct EntryStamp {
    timestamp: DateTime<Utc>,
}

/// Snapshot of the cache directory for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Expired or unreadable entries still on disk.
    pub expired_entries: usize,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub ttl_seconds: u64,
}

/// Disk-backed response cache keyed by request fingerprint.
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_clock(dir, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            clock,
            writes: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lowercase hex SHA-256 of `"{model}||{system_prompt}||{prompt}"`.
    pub fn fingerprint(prompt: &str, system_prompt: Option<&str>, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b"||");
        hasher.update(system_prompt.unwrap_or("").as_bytes());
        hasher.update(b"||");
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(&key[..2]).join(format!("{key}.json"))
    }

    fn is_expired(&self, timestamp: DateTime<Utc>) -> bool {
        // A timestamp in the future has a negative age and is fresh.
        match (self.clock.now() - timestamp).to_std() {
            Ok(age) => age > self.ttl,
            Err(_) => false,
        }
    }

    /// Cached response for the request, if present and fresh.
    ///
    /// Expired and unreadable entries are deleted and reported as a miss.
    pub fn get<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
    ) -> Option<T> {
        let key = Self::fingerprint(prompt, system_prompt, model);
        let path = self.entry_path(&key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "removing corrupt cache entry");
                remove_quietly(&path);
                return None;
            }
        };

        if self.is_expired(entry.timestamp) {
            tracing::debug!(key = %key, written = %entry.timestamp, "cache entry expired");
            remove_quietly(&path);
            return None;
        }

        tracing::debug!(key = %key, "cache hit");
        Some(entry.response)
    }

    /// Store `response` for the request, replacing any existing entry.
    pub fn set<T: Serialize>(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        response: &T,
    ) -> Result<(), CacheError> {
        let key = Self::fingerprint(prompt, system_prompt, model);
        let path = self.entry_path(&key);
        let shard = self.dir.join(&key[..2]);
        fs::create_dir_all(&shard).map_err(|e| CacheError::io(&shard, e))?;

        let entry = CacheEntry {
            timestamp: self.clock.now(),
            model: model.to_string(),
            response,
        };
        let contents = serde_json::to_vec_pretty(&entry)?;

        let sequence = self.writes.fetch_add(1, Ordering::Relaxed);
        let staging = shard.join(format!(".{key}.{}.{sequence}.tmp", std::process::id()));
        fs::write(&staging, contents).map_err(|e| CacheError::io(&staging, e))?;
        fs::rename(&staging, &path).map_err(|e| {
            remove_quietly(&staging);
            CacheError::io(&path, e)
        })?;

        tracing::debug!(key = %key, "cache entry written");
        Ok(())
    }

    /// Delete the entry for the request. Returns whether one existed.
    pub fn remove(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
    ) -> Result<bool, CacheError> {
        let key = Self::fingerprint(prompt, system_prompt, model);
        let path = self.entry_path(&key);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(key = %key, "cache entry removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }
        tracing::info!(removed, dir = %self.dir.display(), "cache cleared");
        Ok(removed)
    }

    /// Remove expired and unreadable entries. Returns how many were removed.
    pub fn clear_expired(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            let stale = match read_stamp(&path) {
                Some(timestamp) => self.is_expired(timestamp),
                None => true,
            };
            if stale {
                fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }
        tracing::info!(removed, dir = %self.dir.display(), "expired cache entries cleared");
        Ok(removed)
    }

    pub fn get_stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats {
            total_entries: 0,
            expired_entries: 0,
            total_size_bytes: 0,
            oldest_entry: None,
            newest_entry: None,
            ttl_seconds: self.ttl.as_secs(),
        };

        for path in self.entry_files()? {
            let metadata = fs::metadata(&path).map_err(|e| CacheError::io(&path, e))?;
            stats.total_entries += 1;
            stats.total_size_bytes += metadata.len();

            let Some(timestamp) = read_stamp(&path) else {
                stats.expired_entries += 1;
                continue;
            };
            if self.is_expired(timestamp) {
                stats.expired_entries += 1;
            }
            stats.oldest_entry = Some(stats.oldest_entry.map_or(timestamp, |t| t.min(timestamp)));
            stats.newest_entry = Some(stats.newest_entry.map_or(timestamp, |t| t.max(timestamp)));
        }

        Ok(stats)
    }

    /// All `*.json` entry files under the shard directories.
    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let shards = match fs::read_dir(&self.dir) {
            Ok(shards) => shards,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for shard in shards {
            let shard = shard.map_err(|e| CacheError::io(&self.dir, e))?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard).map_err(|e| CacheError::io(&shard, e))? {
                let path = entry.map_err(|e| CacheError::io(&shard, e))?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_stamp(path: &Path) -> Option<DateTime<Utc>> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice::<EntryStamp>(&bytes)
        .ok()
        .map(|stamp| stamp.timestamp)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn cache_with_clock(dir: &Path, ttl: Duration) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let cache = ResponseCache::with_clock(dir, ttl, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_fingerprint_is_sha256_of_joined_fields() {
        let key = ResponseCache::fingerprint("prompt", None, "model");
        let mut hasher = Sha256::new();
        hasher.update(b"model||||prompt");
        assert_eq!(key, hex::encode(hasher.finalize()));
        assert_eq!(key.len(), 64);

        assert_ne!(key, ResponseCache::fingerprint("prompt", Some("sys"), "model"));
        assert_ne!(key, ResponseCache::fingerprint("prompt", None, "other-model"));
    }

    #[test]
    fn test_set_then_get_until_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, clock) = cache_with_clock(dir.path(), Duration::from_secs(3600));

        cache
            .set("show run", Some("sys"), "m1", &"cached answer".to_string())
            .unwrap();

        clock.advance(Duration::from_secs(3600));
        assert_eq!(
            cache.get::<String>("show run", Some("sys"), "m1").as_deref(),
            Some("cached answer")
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get::<String>("show run", Some("sys"), "m1"), None);

        // The expired read removed the entry.
        assert_eq!(cache.get_stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_entry_layout_is_sharded() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _clock) = cache_with_clock(dir.path(), Duration::from_secs(60));
        cache.set("p", None, "m", &42u32).unwrap();

        let key = ResponseCache::fingerprint("p", None, "m");
        let path = dir.path().join(&key[..2]).join(format!("{key}.json"));
        let entry: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(entry["model"], "m");
        assert_eq!(entry["response"], 42);
        assert_eq!(entry["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_corrupt_entry_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _clock) = cache_with_clock(dir.path(), Duration::from_secs(60));
        cache.set("p", None, "m", &"ok").unwrap();

        let key = ResponseCache::fingerprint("p", None, "m");
        let path = cache.entry_path(&key);
        fs::write(&path, "{not json").unwrap();

        assert_eq!(cache.get::<String>("p", None, "m"), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_expired_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, clock) = cache_with_clock(dir.path(), Duration::from_secs(100));

        cache.set("old", None, "m", &1).unwrap();
        clock.advance(Duration::from_secs(150));
        cache.set("new", None, "m", &2).unwrap();

        let stats = cache.get_stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.ttl_seconds, 100);
        assert_eq!(stats.oldest_entry, Some(start()));
        assert_eq!(
            stats.newest_entry,
            Some(start() + chrono::Duration::seconds(150))
        );
        assert!(stats.total_size_bytes > 0);

        assert_eq!(cache.clear_expired().unwrap(), 1);
        assert_eq!(cache.get::<i32>("new", None, "m"), Some(2));
        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.get_stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_remove_deletes_only_that_request() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), Duration::from_secs(60));
        cache.set("p", Some("sys"), "m", &"bad").unwrap();
        cache.set("q", Some("sys"), "m", &"good").unwrap();

        assert!(cache.remove("p", Some("sys"), "m").unwrap());
        assert!(!cache.remove("p", Some("sys"), "m").unwrap());
        assert_eq!(cache.get::<String>("p", Some("sys"), "m"), None);
        assert_eq!(cache.get::<String>("q", Some("sys"), "m").as_deref(), Some("good"));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().join("absent"), Duration::from_secs(1));
        assert_eq!(cache.clear().unwrap(), 0);
        assert_eq!(cache.get_stats().unwrap().oldest_entry, None);
        assert_eq!(cache.get::<String>("p", None, "m"), None);
    }

    proptest! {
        #[test]
        fn stored_value_is_returned_for_the_same_request(
            prompt in ".{0,200}",
            system in prop::option::of("[a-z ]{0,40}"),
            value in prop::collection::vec(any::<i64>(), 0..8),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let cache = ResponseCache::new(dir.path(), Duration::from_secs(60));
            cache.set(&prompt, system.as_deref(), "m", &value).unwrap();

            prop_assert_eq!(cache.get::<Vec<i64>>(&prompt, system.as_deref(), "m"), Some(value));
            prop_assert_eq!(cache.get::<Vec<i64>>(&prompt, system.as_deref(), "m2"), None);
        }
    }
}
