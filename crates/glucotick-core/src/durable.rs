//! On-disk cache of the last reading and history batch.
//!
//! The document is rewritten whole on every save, replacing only the slot
//! being saved:
//!
//! ```json
//! { "lastReading": { ... }, "history": [ ... ], "capturedAt": "2024-05-01T08:00:00Z" }
//! ```
//!
//! Nothing here returns an error to the caller. A missing or corrupt file
//! loads as `None` and write failures are logged.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CoreError, HistoryBatch, Reading, UtcDateTime};

/// Contents of the durable cache document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(default, rename = "lastReading")]
    pub reading: Option<Reading>,
    #[serde(default)]
    pub history: Option<HistoryBatch>,
    #[serde(default)]
    pub captured_at: Option<UtcDateTime>,
}

impl CacheEntry {
    pub fn is_empty(&self) -> bool {
        self.reading.is_none() && self.history.as_ref().map_or(true, HistoryBatch::is_empty)
    }

    /// Drops readings that fail validation, which deserialization bypasses.
    fn sanitized(mut self) -> Self {
        self.reading = self.reading.filter(Reading::is_valid);
        self.history = self.history.map(|history| {
            HistoryBatch::new(
                history
                    .into_readings()
                    .into_iter()
                    .filter(Reading::is_valid)
                    .collect(),
            )
        });
        self
    }
}

/// JSON-file cache that survives restarts.
#[derive(Debug, Clone)]
pub struct DurableCache {
    path: PathBuf,
}

impl DurableCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Platform cache location, e.g. `~/.cache/glucotick/cache.json`.
    pub fn default_path() -> Result<PathBuf, CoreError> {
        let dirs = directories::ProjectDirs::from("io", "glucotick", "glucotick")
            .ok_or(CoreError::NoProjectDirs)?;
        Ok(dirs.cache_dir().join("cache.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<CacheEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to read cache");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) => Some(entry.sanitized()),
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "ignoring corrupt cache");
                None
            }
        }
    }

    pub fn save_reading(&self, reading: &Reading, now: UtcDateTime) {
        self.update(|entry| {
            entry.reading = Some(*reading);
            entry.captured_at = Some(now);
        });
    }

    pub fn save_history(&self, history: &HistoryBatch, now: UtcDateTime) {
        self.update(|entry| {
            entry.history = Some(history.clone());
            entry.captured_at = Some(now);
        });
    }

    /// Empties both slots, keeping the file.
    pub fn clear(&self) {
        if let Err(error) = self.write(&CacheEntry::default()) {
            tracing::warn!(path = %self.path.display(), %error, "failed to clear cache");
        }
    }

    fn update(&self, apply: impl FnOnce(&mut CacheEntry)) {
        let mut entry = self.load().unwrap_or_default();
        apply(&mut entry);
        if let Err(error) = self.write(&entry) {
            tracing::warn!(path = %self.path.display(), %error, "failed to write cache");
        }
    }

    fn write(&self, entry: &CacheEntry) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(entry)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrendDirection;

    fn reading(value: f64, at: &str) -> Reading {
        Reading::new(
            value,
            UtcDateTime::parse(at).expect("valid timestamp"),
            TrendDirection::Rising,
        )
        .expect("valid reading")
    }

    fn cache_in(dir: &tempfile::TempDir) -> DurableCache {
        DurableCache::new(dir.path().join("nested").join("cache.json"))
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(cache_in(&dir).load().is_none());
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DurableCache::new(dir.path().join("cache.json"));
        fs::write(cache.path(), "{not json").expect("writable");

        assert!(cache.load().is_none());
    }

    #[test]
    fn saving_one_slot_keeps_the_other() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(&dir);
        let now = UtcDateTime::parse("2024-05-01T08:10:00Z").expect("valid");
        let history = HistoryBatch::new(vec![
            reading(100.0, "2024-05-01T08:00:00Z"),
            reading(104.0, "2024-05-01T08:05:00Z"),
        ]);

        cache.save_history(&history, now);
        cache.save_reading(&reading(108.0, "2024-05-01T08:10:00Z"), now);

        let entry = cache.load().expect("entry");
        assert_eq!(entry.history.as_ref().map(HistoryBatch::len), Some(2));
        assert_eq!(entry.reading.map(|r| r.value), Some(108.0));
        assert_eq!(entry.captured_at, Some(now));
    }

    #[test]
    fn document_uses_expected_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(&dir);
        cache.save_reading(
            &reading(120.0, "2024-05-01T08:00:00Z"),
            UtcDateTime::parse("2024-05-01T08:00:30Z").expect("valid"),
        );

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(cache.path()).expect("readable"))
                .expect("valid json");
        assert_eq!(raw["lastReading"]["value"], 120.0);
        assert_eq!(raw["lastReading"]["trendDirection"], "rising");
        assert_eq!(raw["capturedAt"], "2024-05-01T08:00:30Z");
    }

    #[test]
    fn invalid_cached_readings_are_dropped_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DurableCache::new(dir.path().join("cache.json"));
        fs::write(
            cache.path(),
            r#"{"lastReading":{"value":-3,"timestamp":"2024-05-01T08:00:00Z"},
                "history":[{"value":0,"timestamp":"2024-05-01T07:55:00Z"},
                           {"value":99,"timestamp":"2024-05-01T08:00:00Z"}]}"#,
        )
        .expect("writable");

        let entry = cache.load().expect("entry");
        assert!(entry.reading.is_none());
        assert_eq!(entry.history.as_ref().map(HistoryBatch::len), Some(1));
    }

    #[test]
    fn clear_empties_both_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(&dir);
        cache.save_reading(&reading(120.0, "2024-05-01T08:00:00Z"), UtcDateTime::now());

        cache.clear();

        assert!(cache.load().expect("entry").is_empty());
    }
}
