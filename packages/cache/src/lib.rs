#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Two-tier TTL cache shared by every fetcher.
//!
//! The in-process tier is a map guarded by a mutex so one cache can be
//! handed to several concurrent workers. The durable tier is a single JSON
//! file, loaded and migrated at startup (see [`store`]). Writes take an
//! exclusive lock on a sibling `.lock` file, merge with what is already on
//! disk, and go through a unique temp file and a rename, so readers never
//! observe a partial file and concurrent writers never drop each other's
//! entries.
//!
//! Caching is an optimization: a failure to persist is logged and
//! swallowed by [`GeoCache::put`]. Only an explicit [`GeoCache::flush`]
//! reports it.

pub mod key;
pub mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use key::CacheKey;
use store::StoredEntry;

/// Default time-to-live for cache entries, in days.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Errors from cache persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// I/O error reading or writing the cache file.
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of the cache file failed.
    #[error("Cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Durable store location. `None` keeps the cache in memory only.
    pub path: Option<PathBuf>,
    /// Entries older than this are misses.
    pub ttl: TimeDelta,
    /// Persist after every [`GeoCache::put`] rather than only on
    /// [`GeoCache::flush`].
    pub persist_on_put: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl: TimeDelta::days(DEFAULT_TTL_DAYS),
            persist_on_put: true,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<String, StoredEntry>,
    dirty: bool,
}

/// Key/value cache with TTL expiry and an optional durable tier.
#[derive(Debug)]
pub struct GeoCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl GeoCache {
    /// Opens a cache, loading the durable store if `config.path` exists.
    ///
    /// A missing, unreadable, or corrupt store yields an empty cache and a
    /// warning; opening never fails.
    #[must_use]
    pub fn open(config: CacheConfig) -> Self {
        let (entries, stats) = config
            .path
            .as_deref()
            .map(|path| store::load(path, Utc::now()))
            .unwrap_or_default();

        // Migrated or dropped entries make the file stale until rewritten.
        let dirty = stats.migrated > 0 || stats.dropped > 0;

        Self {
            config,
            state: Mutex::new(CacheState { entries, dirty }),
        }
    }

    /// An in-memory cache with the given TTL.
    #[must_use]
    pub fn in_memory(ttl: TimeDelta) -> Self {
        Self::open(CacheConfig {
            path: None,
            ttl,
            persist_on_put: false,
        })
    }

    /// Location of the durable store, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    /// Configured time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> TimeDelta {
        self.config.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `key`, treating entries older than the TTL as misses.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.get_at(key, Utc::now())
    }

    /// Looks up `key` as of `now`. Expired entries are removed from the
    /// in-process tier.
    #[must_use]
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<serde_json::Value> {
        let mut state = self.lock();
        let entry = state.entries.get(key)?;

        if now - entry.timestamp >= self.config.ttl {
            log::debug!("Cache entry '{key}' expired (written {})", entry.timestamp);
            state.entries.remove(key);
            state.dirty = true;
            return None;
        }

        Some(entry.value.clone())
    }

    /// Looks up `key` and deserializes it. A value that no longer matches
    /// `T` is a miss.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("Cache entry '{key}' has an unexpected shape: {e}");
                None
            }
        }
    }

    /// Stores `value` under `key`, timestamped now.
    pub fn put(&self, key: &str, value: serde_json::Value) {
        self.put_at(key, value, Utc::now());
    }

    /// Stores `value` under `key` with an explicit timestamp.
    pub fn put_at(&self, key: &str, value: serde_json::Value, timestamp: DateTime<Utc>) {
        let mut state = self.lock();
        state
            .entries
            .insert(key.to_string(), StoredEntry { value, timestamp });
        state.dirty = true;

        if self.config.persist_on_put
            && let Some(path) = &self.config.path
        {
            match store::write_atomic(path, &state.entries) {
                Ok(()) => state.dirty = false,
                Err(e) => log::warn!("Failed to persist cache to {}: {e}", path.display()),
            }
        }
    }

    /// Serializes `value` and stores it under `key`.
    pub fn put_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.put(key, v),
            Err(e) => log::warn!("Failed to serialize cache value for '{key}': {e}"),
        }
    }

    /// Writes the in-process tier to the durable store.
    ///
    /// A cache without a path, or with nothing new since the last write,
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the store cannot be written.
    pub fn flush(&self) -> Result<(), CacheError> {
        let Some(path) = &self.config.path else {
            return Ok(());
        };

        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }
        store::write_atomic(path, &state.entries)?;
        state.dirty = false;
        log::debug!(
            "Flushed {} cache entries to {}",
            state.entries.len(),
            path.display()
        );
        Ok(())
    }

    /// Number of entries in the in-process tier, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if the in-process tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Counts entries that would currently be hits.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let now = Utc::now();
        self.lock()
            .entries
            .values()
            .filter(|e| now - e.timestamp < self.config.ttl)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sitescore_cache_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn put_then_get_before_ttl() {
        let cache = GeoCache::in_memory(TimeDelta::days(30));
        cache.put("k", json!({"lat": 1.0}));
        assert_eq!(cache.get("k"), Some(json!({"lat": 1.0})));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn entry_read_after_ttl_is_a_miss_and_purged() {
        let cache = GeoCache::in_memory(TimeDelta::days(30));
        let written = Utc::now() - TimeDelta::days(40);
        cache.put_at("k", json!(42), written);
        assert_eq!(cache.len(), 1);

        let read_at = written + TimeDelta::days(31);
        assert_eq!(cache.get_at("k", read_at), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn entry_within_ttl_is_a_hit() {
        let cache = GeoCache::in_memory(TimeDelta::days(30));
        let written = Utc::now();
        cache.put_at("k", json!("v"), written);
        assert_eq!(
            cache.get_at("k", written + TimeDelta::days(29)),
            Some(json!("v"))
        );
        assert_eq!(cache.get_at("k", written + TimeDelta::days(30)), None);
    }

    #[test]
    fn typed_helpers_round_trip() {
        let cache = GeoCache::in_memory(TimeDelta::days(1));
        cache.put_as("pair", &(40.5_f64, -73.25_f64));
        let pair: Option<(f64, f64)> = cache.get_as("pair");
        assert_eq!(pair, Some((40.5, -73.25)));
        let wrong: Option<String> = cache.get_as("pair");
        assert_eq!(wrong, None);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = temp_dir("reopen");
        let path = dir.join("cache.json");
        let config = CacheConfig {
            path: Some(path.clone()),
            ..CacheConfig::default()
        };

        let cache = GeoCache::open(config.clone());
        cache.put("place:abc", json!([40.0, -73.0]));
        assert!(path.exists());

        let reopened = GeoCache::open(config);
        assert_eq!(reopened.get("place:abc"), Some(json!([40.0, -73.0])));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn deferred_persistence_waits_for_flush() {
        let dir = temp_dir("deferred");
        let path = dir.join("cache.json");
        let cache = GeoCache::open(CacheConfig {
            path: Some(path.clone()),
            ttl: TimeDelta::days(30),
            persist_on_put: false,
        });

        cache.put("k", json!(1));
        assert!(!path.exists());
        cache.flush().unwrap();
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn legacy_store_is_rewritten_on_flush() {
        let dir = temp_dir("legacy_flush");
        let path = dir.join("cache.json");
        std::fs::write(
            &path,
            json!({"place:x": {"latlon": [40.0, -73.0], "timestamp": "2024-05-01T12:00:00"}})
                .to_string(),
        )
        .unwrap();

        let cache = GeoCache::open(CacheConfig {
            path: Some(path.clone()),
            ttl: TimeDelta::days(365 * 100),
            persist_on_put: false,
        });
        cache.flush().unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["version"], json!(store::STORE_VERSION));
        assert_eq!(written["entries"]["place:x"]["value"], json!([40.0, -73.0]));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_writers_keep_every_key() {
        let dir = temp_dir("concurrent");
        let path = dir.join("cache.json");
        let config = CacheConfig {
            path: Some(path.clone()),
            ..CacheConfig::default()
        };

        let writers: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|prefix| {
                let cache = GeoCache::open(config.clone());
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.put(&format!("{prefix}:{i}"), json!(i));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["version"], json!(store::STORE_VERSION));

        let reopened = GeoCache::open(config);
        assert_eq!(reopened.len(), 100);
        for prefix in ["left", "right"] {
            for i in 0..50 {
                assert_eq!(reopened.get(&format!("{prefix}:{i}")), Some(json!(i)));
            }
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_store_does_not_fail_put() {
        let dir = temp_dir("unwritable");
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let cache = GeoCache::open(CacheConfig {
            path: Some(blocker.join("cache.json")),
            ..CacheConfig::default()
        });
        cache.put("k", json!(7));
        assert_eq!(cache.get("k"), Some(json!(7)));
        assert!(cache.flush().is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
