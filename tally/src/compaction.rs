//! Compaction of daily count files into a per-key compacted series.
//!
//! Every increment to a new day creates a new file, so a long lived key ends
//! up with one file per day. Compaction bounds that: once a key has at least
//! `threshold` daily files, their counts are merged into the key's `_data`
//! series and the daily files are removed.
//!
//! # Ordering
//!
//! For each daily file, under the store-wide write lock and the file's own
//! resource lock:
//!
//! 1. add the file's count into the in-memory series,
//! 2. persist the series (temp file + rename),
//! 3. delete the daily file.
//!
//! A count is only ever removed from disk after the series holding it has been
//! written. A failure at any step stops that key's pass and leaves the
//! remaining daily files untouched; other keys are still compacted.

use std::fs;

use serde::Serialize;

use crate::error::{CompactionError, Result, StoreError};
use crate::key::UsageKey;
use crate::series::{self, COMPACTED_FILE, CompactedSeries};
use crate::store::{CounterStore, day_files};

/// Number of daily files a key needs before it is compacted.
pub const DEFAULT_THRESHOLD: usize = 100;

/// Outcome of a compaction pass over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Keys visited.
    pub keys_scanned: usize,
    /// Keys whose daily files were merged.
    pub keys_compacted: usize,
    /// Daily files merged and removed.
    pub files_merged: usize,
    /// Keys whose pass was aborted by an error.
    pub keys_failed: usize,
}

/// Merges daily files of a [`CounterStore`] into compacted series.
#[derive(Debug)]
pub struct Compactor<'a> {
    store: &'a CounterStore,
    threshold: usize,
}

impl<'a> Compactor<'a> {
    /// A compactor with the default threshold.
    pub fn new(store: &'a CounterStore) -> Self {
        Self {
            store,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Sets the number of daily files that triggers compaction of a key.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Walks every `app/env/category/key` and compacts the keys that reached
    /// the threshold.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory tree itself cannot be listed.
    /// Per-key failures are logged and counted in the report.
    pub fn run(&self) -> Result<CompactionReport> {
        let mut report = CompactionReport::default();

        for app in self.store.list_apps()? {
            for env in self.store.list_environments(&app)? {
                for category in self.store.list_categories(&app, &env)? {
                    for name in self.store.list_keys(&app, &env, &category)? {
                        // Directory names written by this store always validate.
                        let Ok(key) = UsageKey::new(app.as_str(), env.as_str(), category.as_str(), name)
                        else {
                            continue;
                        };
                        report.keys_scanned += 1;

                        match self.compact_key(&key) {
                            Ok(0) => {}
                            Ok(merged) => {
                                report.keys_compacted += 1;
                                report.files_merged += merged;
                            }
                            Err(e) => {
                                tracing::error!(key = %key, error = %e, "compaction failed");
                                report.keys_failed += 1;
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(
            keys_scanned = report.keys_scanned,
            keys_compacted = report.keys_compacted,
            files_merged = report.files_merged,
            keys_failed = report.keys_failed,
            "compaction pass finished"
        );
        Ok(report)
    }

    /// Compacts one key if it has at least `threshold` daily files.
    ///
    /// Returns the number of daily files merged (0 if below threshold).
    ///
    /// # Errors
    ///
    /// Returns [`CompactionError`] naming the key if a file cannot be read,
    /// the series cannot be written, or a merged file cannot be deleted.
    /// Files merged before the failure stay merged.
    pub fn compact_key(&self, key: &UsageKey) -> std::result::Result<usize, CompactionError> {
        let fail = |source: StoreError| CompactionError {
            key: key.to_string(),
            source,
        };
        let dir = self.store.key_dir(key);

        if day_files(&dir).map_err(fail)?.len() < self.threshold {
            return Ok(0);
        }

        let _exclusive = self.store.compaction_lock().write();

        // Another pass may have finished this key while we waited.
        let files = day_files(&dir).map_err(fail)?;
        if files.len() < self.threshold {
            return Ok(0);
        }

        tracing::info!(key = %key, files = files.len(), "running compaction");

        let series_path = dir.join(COMPACTED_FILE);
        let mut compacted = CompactedSeries::load(&series_path).map_err(fail)?;

        for (merged, (day, path)) in files.iter().enumerate() {
            let _file = self.store.locks().acquire(&path.to_string_lossy());

            let count = series::read_count(path).map_err(fail)?;
            compacted.merge(day, count);
            compacted.save(&series_path).map_err(fail)?;
            fs::remove_file(path).map_err(|e| {
                tracing::warn!(key = %key, merged, "daily file merged but not removed");
                fail(StoreError::Delete {
                    path: path.clone(),
                    source: e,
                })
            })?;
        }

        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};
    use tempfile::tempdir;

    fn key() -> UsageKey {
        UsageKey::new("app", "env", "tests", "compact").unwrap()
    }

    fn fill(store: &CounterStore, key: &UsageKey, start: NaiveDate, days: u64) {
        for delta in 0..days {
            let date = start.checked_sub_days(Days::new(delta)).unwrap();
            store.increment(key, 1, date).unwrap();
        }
    }

    #[test]
    fn test_below_threshold_is_skipped() {
        let dir = tempdir().unwrap();
        let store = CounterStore::open(dir.path()).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        fill(&store, &key(), today, 99);

        let report = Compactor::new(&store).run().unwrap();
        assert_eq!(report.keys_scanned, 1);
        assert_eq!(report.keys_compacted, 0);
        assert!(!store.key_dir(&key()).join(COMPACTED_FILE).exists());
    }

    #[test]
    fn test_compaction_preserves_totals() {
        let dir = tempdir().unwrap();
        let store = CounterStore::open(dir.path()).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        fill(&store, &key(), today, 120);
        store.increment(&key(), 9, today).unwrap();

        let before = store.sum_usages_as_of(&key(), 200, today).unwrap();
        let by_date_before = store.usages_by_date_as_of(&key(), 200, today).unwrap();

        let report = Compactor::new(&store).run().unwrap();
        assert_eq!(report.keys_compacted, 1);
        assert_eq!(report.files_merged, 120);
        assert!(day_files(&store.key_dir(&key())).unwrap().is_empty());

        assert_eq!(store.sum_usages_as_of(&key(), 200, today).unwrap(), before);
        assert_eq!(store.usages_by_date_as_of(&key(), 200, today).unwrap(), by_date_before);
        assert_eq!(before, 129);
    }

    #[test]
    fn test_second_pass_merges_into_existing_series() {
        let dir = tempdir().unwrap();
        let store = CounterStore::open(dir.path()).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let compactor = Compactor::new(&store).with_threshold(3);

        fill(&store, &key(), today, 3);
        assert_eq!(compactor.compact_key(&key()).unwrap(), 3);

        // Same days again: the series must add, not overwrite.
        fill(&store, &key(), today, 3);
        assert_eq!(compactor.compact_key(&key()).unwrap(), 3);

        let series = CompactedSeries::load(&store.key_dir(&key()).join(COMPACTED_FILE)).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.get("20240501"), 2);
        assert_eq!(store.sum_usages_as_of(&key(), 3, today).unwrap(), 6);
    }

    #[test]
    fn test_corrupt_file_aborts_only_that_key() {
        let dir = tempdir().unwrap();
        let store = CounterStore::open(dir.path()).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let good = UsageKey::new("app", "env", "tests", "good").unwrap();
        fill(&store, &key(), today, 4);
        fill(&store, &good, today, 4);

        // Oldest day of the bad key is unreadable; it is merged first.
        std::fs::write(store.key_dir(&key()).join("20240428"), "oops").unwrap();

        let report = Compactor::new(&store).with_threshold(4).run().unwrap();
        assert_eq!(report.keys_failed, 1);
        assert_eq!(report.keys_compacted, 1);
        assert_eq!(store.sum_usages_as_of(&good, 4, today).unwrap(), 4);

        // Nothing of the bad key was removed.
        assert_eq!(day_files(&store.key_dir(&key())).unwrap().len(), 4);
    }
}
