//! Two-tier voice-conditionals cache
//!
//! Memory tier: a readers-writer map of `Arc<VoiceConditionals>`. Disk
//! tier: one `<key>.cond` blob per voice under the cache directory. A
//! memory hit is authoritative; a disk blob that fails the format check
//! behaves like a clean miss.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use voxclone_core::{CacheError, Error, InputError, Result};

use crate::conditionals::VoiceConditionals;

const BLOB_EXTENSION: &str = "cond";

/// Hit/miss counters for the memory tier.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Voice-conditionals cache fronting the speech encoder.
pub struct ConditionalsCache {
    dir: PathBuf,
    entries: RwLock<HashMap<String, Arc<VoiceConditionals>>>,
    pub stats: CacheStats,
}

impl ConditionalsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Cache key for a path-like argument: the file stem when there is an
    /// extension, the file name when there is only a parent, otherwise the
    /// string itself. Idempotent, and applied at call sites so that
    /// `"assets/brute.wav"`, `"brute.xwm"`, and `"brute"` share one entry.
    pub fn extract_key(path_or_key: &str) -> String {
        let path = Path::new(path_or_key);
        if path.extension().is_some() {
            if let Some(stem) = path.file_stem() {
                return stem.to_string_lossy().into_owned();
            }
        }
        if path.parent().map_or(false, |p| !p.as_os_str().is_empty()) {
            if let Some(name) = path.file_name() {
                return name.to_string_lossy().into_owned();
            }
        }
        path_or_key.to_string()
    }

    pub fn has_in_memory(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn exists_on_disk(&self, key: &str) -> bool {
        self.blob_path(key).is_file()
    }

    /// Memory-tier lookup. Never touches disk.
    pub fn get(&self, key: &str) -> Option<Arc<VoiceConditionals>> {
        let found = self.entries.read().get(key).cloned();
        match &found {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        found
    }

    /// Insert (or replace) the record in memory; optionally persist to disk.
    ///
    /// The disk write happens after the memory tier is updated and takes the
    /// record by shared ownership only through `self.dir`, so a persistence
    /// failure returns [`CacheError::Write`] while the in-memory entry stays
    /// installed.
    pub fn put(&self, key: &str, conds: VoiceConditionals, persist: bool) -> Result<()> {
        if !conds.is_valid() {
            tracing::warn!(key, "refusing to cache invalid conditionals");
            return Err(InputError::ConditionalsInvalid.into());
        }

        let record = Arc::new(conds);
        self.entries
            .write()
            .insert(key.to_string(), Arc::clone(&record));
        tracing::info!(key, "cached voice conditionals");

        if persist {
            self.save_to_disk(key, record)?;
        }
        Ok(())
    }

    /// Write one record's blob. Takes the record by value and reads only the
    /// cache directory, so callers may run it on a worker.
    fn save_to_disk(&self, key: &str, conds: Arc<VoiceConditionals>) -> Result<()> {
        let path = self.blob_path(key);
        conds.save(&path).map_err(|e| {
            Error::from(CacheError::Write {
                key: key.to_string(),
                message: e.to_string(),
            })
        })?;
        tracing::info!(key, path = %path.display(), "persisted voice conditionals");
        Ok(())
    }

    /// Read one blob into memory. `Ok(false)` is a clean miss: the file is
    /// absent, or its magic/version does not match.
    pub fn load_from_disk(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key);
        match VoiceConditionals::load(&path) {
            Ok(Some(conds)) => {
                self.entries
                    .write()
                    .insert(key.to_string(), Arc::new(conds));
                tracing::info!(key, "loaded voice conditionals from disk");
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(Error::Cache(CacheError::Format)) => {
                tracing::warn!(key, path = %path.display(), "rejected cache blob with bad header");
                Ok(false)
            }
            Err(e) => Err(Error::from(CacheError::Read {
                key: key.to_string(),
                message: e.to_string(),
            })),
        }
    }

    /// Scan the cache directory and load every readable blob.
    pub fn load_all_from_disk(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(_) => {
                tracing::debug!(dir = %self.dir.display(), "cache directory does not exist");
                return 0;
            }
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            match self.load_from_disk(&key) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(key, "failed to load cache blob: {e}"),
            }
        }
        tracing::info!(loaded, dir = %self.dir.display(), "scanned cache directory");
        loaded
    }

    /// Remove the key from both tiers; true when either held it.
    pub fn remove(&self, key: &str) -> bool {
        let from_memory = self.entries.write().remove(key).is_some();
        let path = self.blob_path(key);
        let from_disk = path.is_file() && fs::remove_file(&path).is_ok();
        from_memory || from_disk
    }

    /// Empty both tiers.
    pub fn clear(&self) {
        self.clear_memory();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXTENSION) {
                    if let Err(e) = fs::remove_file(&path) {
                        tracing::warn!(path = %path.display(), "failed to remove cache blob: {e}");
                    }
                }
            }
        }
    }

    pub fn clear_memory(&self) {
        self.entries.write().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BLOB_EXTENSION}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key_variants() {
        assert_eq!(ConditionalsCache::extract_key("brute"), "brute");
        assert_eq!(ConditionalsCache::extract_key("brute.wav"), "brute");
        assert_eq!(ConditionalsCache::extract_key("assets/brute.wav"), "brute");
        assert_eq!(ConditionalsCache::extract_key("assets/brute"), "brute");
        assert_eq!(ConditionalsCache::extract_key("brute.xwm"), "brute");
    }

    #[test]
    fn test_extract_key_is_idempotent() {
        for s in ["assets/brute.wav", "brute.xwm", "brute", "a/b/c.d"] {
            let once = ConditionalsCache::extract_key(s);
            assert_eq!(ConditionalsCache::extract_key(&once), once);
        }
    }

    #[test]
    fn test_normalization_happens_at_call_sites() {
        let cache = ConditionalsCache::new("unused");
        cache
            .put("foo", crate::conditionals::tests::synthetic(), false)
            .unwrap();

        // Raw path misses; the normalized key hits.
        assert!(cache.get("assets/foo.wav").is_none());
        let key = ConditionalsCache::extract_key("assets/foo.wav");
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_put_rejects_invalid_record() {
        let cache = ConditionalsCache::new("unused");
        let err = cache
            .put("empty", VoiceConditionals::default(), false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Input(InputError::ConditionalsInvalid)
        ));
        assert!(!cache.has_in_memory("empty"));
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = ConditionalsCache::new("unused");
        cache
            .put("k", crate::conditionals::tests::synthetic(), false)
            .unwrap();
        cache.get("k");
        cache.get("absent");
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 1);
        assert!((cache.stats.hit_rate() - 0.5).abs() < 1e-9);
    }
}
