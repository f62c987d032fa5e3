//! Durable JSON store: loading with legacy migration, and atomic writes.
//!
//! The current layout is
//!
//! ```json
//! {"version": 1, "entries": {"<key>": {"value": ..., "timestamp": "<RFC 3339>"}}}
//! ```
//!
//! Older files are a bare map of key to entry. Entries in those files come
//! in three shapes: canonical `{value, timestamp}`, the coordinate-only
//! `{latlon: [lat, lon], timestamp}`, or a bare value with no timestamp.
//! All are accepted; unusable entries are dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CacheError;

/// Current on-disk layout version.
pub const STORE_VERSION: u64 = 1;

/// One cached value with its write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Cached JSON value.
    pub value: Value,
    /// When the value was written.
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct StoreFile<'a> {
    version: u64,
    entries: &'a BTreeMap<String, StoredEntry>,
}

/// Counts gathered while loading a store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    /// Entries already in the canonical shape.
    pub canonical: usize,
    /// Entries rewritten from a legacy shape.
    pub migrated: usize,
    /// Entries discarded as unusable.
    pub dropped: usize,
}

/// Loads the store at `path`. Missing, unreadable, or corrupt files yield
/// an empty map.
pub fn load(path: &Path, now: DateTime<Utc>) -> (BTreeMap<String, StoredEntry>, LoadStats) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No cache file at {}, starting empty", path.display());
            return (BTreeMap::new(), LoadStats::default());
        }
        Err(e) => {
            log::warn!("Could not read cache {}: {e}; starting empty", path.display());
            return (BTreeMap::new(), LoadStats::default());
        }
    };

    let root: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Cache {} is corrupt ({e}); starting empty", path.display());
            return (BTreeMap::new(), LoadStats::default());
        }
    };

    let (entries, stats) = parse_store(root, now);
    log::info!(
        "Loaded {} cache entries from {} ({} migrated, {} dropped)",
        entries.len(),
        path.display(),
        stats.migrated,
        stats.dropped
    );
    (entries, stats)
}

/// Interprets a parsed store document. Entries without a usable timestamp
/// are stamped with `now`.
#[must_use]
pub fn parse_store(root: Value, now: DateTime<Utc>) -> (BTreeMap<String, StoredEntry>, LoadStats) {
    let Value::Object(mut root) = root else {
        log::warn!("Cache root is not an object; starting empty");
        return (BTreeMap::new(), LoadStats::default());
    };

    let versioned = matches!(root.get("version"), Some(Value::Number(_)))
        && matches!(root.get("entries"), Some(Value::Object(_)));

    let raw_entries: Map<String, Value> = if versioned {
        if let Some(version) = root.get("version").and_then(Value::as_u64)
            && version > STORE_VERSION
        {
            log::warn!("Cache version {version} is newer than {STORE_VERSION}; reading anyway");
        }
        match root.remove("entries") {
            Some(Value::Object(entries)) => entries,
            _ => Map::new(),
        }
    } else {
        root
    };

    let mut stats = LoadStats::default();
    let mut entries = BTreeMap::new();
    for (key, raw) in raw_entries {
        match parse_entry(raw, now) {
            Parsed::Canonical(entry) => {
                stats.canonical += 1;
                entries.insert(key, entry);
            }
            Parsed::Migrated(entry) => {
                stats.migrated += 1;
                entries.insert(key, entry);
            }
            Parsed::Dropped => {
                log::debug!("Dropping unusable cache entry '{key}'");
                stats.dropped += 1;
            }
        }
    }
    (entries, stats)
}

enum Parsed {
    Canonical(StoredEntry),
    Migrated(StoredEntry),
    Dropped,
}

fn parse_entry(raw: Value, now: DateTime<Utc>) -> Parsed {
    let mut obj = match raw {
        Value::Null => return Parsed::Dropped,
        Value::Object(obj) => obj,
        bare => {
            return Parsed::Migrated(StoredEntry {
                value: bare,
                timestamp: now,
            });
        }
    };

    let timestamp = obj.get("timestamp").and_then(Value::as_str).and_then(parse_timestamp);

    if let Some(value) = obj.remove("value") {
        if value.is_null() {
            return Parsed::Dropped;
        }
        return match timestamp {
            Some(timestamp) => Parsed::Canonical(StoredEntry { value, timestamp }),
            None => Parsed::Migrated(StoredEntry {
                value,
                timestamp: now,
            }),
        };
    }

    if let Some(latlon) = obj.get("latlon") {
        let pair = latlon
            .as_array()
            .filter(|a| a.len() == 2 && a.iter().all(Value::is_number));
        return pair.map_or(Parsed::Dropped, |pair| {
            Parsed::Migrated(StoredEntry {
                value: Value::Array(pair.clone()),
                timestamp: timestamp.unwrap_or(now),
            })
        });
    }

    if obj.contains_key("timestamp") {
        return Parsed::Dropped;
    }

    Parsed::Migrated(StoredEntry {
        value: Value::Object(obj),
        timestamp: now,
    })
}

/// Accepts RFC 3339, or a naive ISO-8601 datetime taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Reads the entries currently on disk without logging a load summary.
fn read_entries(path: &Path, now: DateTime<Utc>) -> BTreeMap<String, StoredEntry> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        .map(|root| parse_store(root, now).0)
        .unwrap_or_default()
}

/// Folds `ours` over `disk`. On a shared key the newer timestamp wins.
fn merge_entries(
    mut disk: BTreeMap<String, StoredEntry>,
    ours: &BTreeMap<String, StoredEntry>,
) -> BTreeMap<String, StoredEntry> {
    for (key, entry) in ours {
        match disk.get(key) {
            Some(existing) if existing.timestamp > entry.timestamp => {}
            _ => {
                disk.insert(key.clone(), entry.clone());
            }
        }
    }
    disk
}

/// Writes `entries` to `path`, merged with whatever another writer has
/// stored there since it was loaded.
///
/// Writers serialize on an exclusive lock of the sibling `<file>.lock`.
/// The merged store goes to a uniquely named temp file in the same
/// directory, which is then renamed over `path`.
///
/// # Errors
///
/// Returns [`CacheError`] if the directory cannot be created, the lock
/// cannot be taken, or the file cannot be written or renamed.
pub fn write_atomic(path: &Path, entries: &BTreeMap<String, StoredEntry>) -> Result<(), CacheError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let lock = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path(path))?;
    lock.lock()?;

    let merged = merge_entries(read_entries(path, Utc::now()), entries);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(
        tmp.as_file_mut(),
        &StoreFile {
            version: STORE_VERSION,
            entries: &merged,
        },
    )?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    lock.unlock()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn reads_versioned_store() {
        let doc = json!({
            "version": 1,
            "entries": {
                "a": {"value": 5, "timestamp": "2024-12-01T00:00:00Z"}
            }
        });
        let (entries, stats) = parse_store(doc, now());
        assert_eq!(stats.canonical, 1);
        assert_eq!(entries["a"].value, json!(5));
        assert_eq!(
            entries["a"].timestamp,
            Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn migrates_legacy_coordinate_entries() {
        let doc = json!({
            "place:x": {"latlon": [40.7, -74.0], "timestamp": "2024-06-01T12:30:00.123456"}
        });
        let (entries, stats) = parse_store(doc, now());
        assert_eq!(stats.migrated, 1);
        assert_eq!(entries["place:x"].value, json!([40.7, -74.0]));
        assert_eq!(
            entries["place:x"].timestamp.date_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
    }

    #[test]
    fn bare_values_and_bad_timestamps_are_fresh() {
        let doc = json!({
            "bare": 12.5,
            "bad_ts": {"value": "x", "timestamp": "yesterday"}
        });
        let (entries, stats) = parse_store(doc, now());
        assert_eq!(stats.migrated, 2);
        assert_eq!(entries["bare"].timestamp, now());
        assert_eq!(entries["bad_ts"].timestamp, now());
        assert_eq!(entries["bad_ts"].value, json!("x"));
    }

    #[test]
    fn drops_unusable_entries() {
        let doc = json!({
            "null": null,
            "no_value": {"timestamp": "2024-01-01T00:00:00Z"},
            "bad_latlon": {"latlon": [1.0], "timestamp": "2024-01-01T00:00:00Z"},
            "null_value": {"value": null, "timestamp": "2024-01-01T00:00:00Z"}
        });
        let (entries, stats) = parse_store(doc, now());
        assert!(entries.is_empty());
        assert_eq!(stats.dropped, 4);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = std::env::temp_dir().join("sitescore_store_corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load(&path, now()).0.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_write_round_trips() {
        let dir = std::env::temp_dir().join("sitescore_store_roundtrip");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("cache.json");

        let mut entries = BTreeMap::new();
        entries.insert(
            "k".to_string(),
            StoredEntry {
                value: json!({"n": 1}),
                timestamp: now(),
            },
        );
        write_atomic(&path, &entries).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name != "cache.json" && name != "cache.json.lock")
            .collect();
        assert!(leftovers.is_empty(), "stray files: {leftovers:?}");

        let (loaded, stats) = load(&path, Utc::now());
        assert_eq!(loaded, entries);
        assert_eq!(stats.migrated, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_keeps_entries_stored_by_another_writer() {
        let dir = std::env::temp_dir().join("sitescore_store_merge");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("cache.json");
        let entry = |v: i64, ts: DateTime<Utc>| StoredEntry {
            value: json!(v),
            timestamp: ts,
        };
        let later = now() + chrono::TimeDelta::hours(1);

        let mut first = BTreeMap::new();
        first.insert("a".to_string(), entry(1, now()));
        first.insert("shared".to_string(), entry(10, later));
        write_atomic(&path, &first).unwrap();

        let mut second = BTreeMap::new();
        second.insert("b".to_string(), entry(2, now()));
        second.insert("shared".to_string(), entry(20, now()));
        write_atomic(&path, &second).unwrap();

        let (loaded, _) = load(&path, now());
        assert_eq!(loaded["a"].value, json!(1));
        assert_eq!(loaded["b"].value, json!(2));
        assert_eq!(loaded["shared"].value, json!(10));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
