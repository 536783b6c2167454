//! File-backed counter store.
//!
//! # File Layout
//!
//! ```text
//! basedir/
//! └── <app>/
//!     └── <env>/
//!         └── <category>/
//!             └── <key>/
//!                 ├── 20240114      <- daily count, ASCII decimal
//!                 ├── 20240115
//!                 └── _data         <- compacted series, "<YYYYMMDD> <count>" lines
//! ```
//!
//! Directories are created lazily by the first increment of a series and are
//! never removed. A missing directory at any level reads as "no data".
//!
//! # Locking
//!
//! Two levels:
//!
//! - a store-wide `RwLock`: increments and reads take the shared side, the
//!   [`Compactor`] takes the exclusive side while it rewrites a key;
//! - a [`LockTable`] entry per daily file, serializing the read-modify-write
//!   of concurrent increments to the same day.
//!
//! Increments to unrelated keys therefore proceed fully in parallel.
//!
//! # Example
//!
//! ```rust,no_run
//! use tally::key::UsageKey;
//! use tally::store::CounterStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CounterStore::open("./usage-data")?;
//! let key = UsageKey::new("shop", "prod", "pages", "checkout")?;
//!
//! store.record(&key, 1)?;
//! let last_week = store.sum_usages(&key, 7)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Days, Local, NaiveDate};
use parking_lot::RwLock;

use crate::compaction::{CompactionReport, Compactor};
use crate::error::{Result, StoreError, StoreResult};
use crate::key::{UsageKey, validate_component};
use crate::locks::LockTable;
use crate::repository::{UsageQuery, UsageRepository};
use crate::series::{self, COMPACTED_FILE, CompactedSeries};

/// Today's local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Dates from `today` back `days - 1` days, newest first.
fn window(today: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..u64::from(days)).map_while(move |delta| today.checked_sub_days(Days::new(delta)))
}

/// Persistent per-day usage counters under a base directory.
#[derive(Debug)]
pub struct CounterStore {
    basedir: PathBuf,
    locks: LockTable,
    compaction_lock: RwLock<()>,
}

impl CounterStore {
    /// Opens (creating if needed) a store rooted at `basedir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CreateDir`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(basedir: P) -> Result<Self> {
        Self::with_lock_table(basedir, LockTable::default())
    }

    /// Opens a store with a custom lock table (e.g. a different idle TTL).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CreateDir`] if the directory cannot be created.
    pub fn with_lock_table<P: AsRef<Path>>(basedir: P, locks: LockTable) -> Result<Self> {
        let basedir = basedir.as_ref().to_path_buf();
        fs::create_dir_all(&basedir).map_err(|e| StoreError::CreateDir {
            path: basedir.clone(),
            source: e,
        })?;
        Ok(Self {
            basedir,
            locks,
            compaction_lock: RwLock::new(()),
        })
    }

    /// The base directory.
    pub fn path(&self) -> &Path {
        &self.basedir
    }

    /// Adds `amount` to the count of `key` on `date`.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`](crate::error::KeyError) for malformed keys and a
    /// [`StoreError`] if the daily file cannot be read or written.
    pub fn increment(&self, key: &UsageKey, amount: u64, date: NaiveDate) -> Result<()> {
        let dir = self.key_dir(key);
        let day_file = dir.join(series::format_day(date));

        let _shared = self.compaction_lock.read();
        let _file = self.locks.acquire(&day_file.to_string_lossy());

        let existing = series::read_count(&day_file)?;
        if existing == 0 {
            fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDir {
                path: dir.clone(),
                source: e,
            })?;
        }
        series::write_count(&day_file, existing.saturating_add(amount))?;
        Ok(())
    }

    /// Adds `amount` to today's count of `key`.
    ///
    /// # Errors
    ///
    /// See [`CounterStore::increment`].
    pub fn record(&self, key: &UsageKey, amount: u64) -> Result<()> {
        self.increment(key, amount, today())
    }

    /// Applications that have recorded anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] if the base directory cannot be read.
    pub fn list_apps(&self) -> Result<Vec<String>> {
        self.list(&[])
    }

    /// Environments of `app`.
    ///
    /// # Errors
    ///
    /// Rejects traversal-unsafe names; returns [`StoreError::List`] on I/O failure.
    pub fn list_environments(&self, app: &str) -> Result<Vec<String>> {
        self.list(&[("app", app)])
    }

    /// Categories of `app/env`.
    ///
    /// # Errors
    ///
    /// Rejects traversal-unsafe names; returns [`StoreError::List`] on I/O failure.
    pub fn list_categories(&self, app: &str, env: &str) -> Result<Vec<String>> {
        self.list(&[("app", app), ("env", env)])
    }

    /// Keys of `app/env/category`.
    ///
    /// # Errors
    ///
    /// Rejects traversal-unsafe names; returns [`StoreError::List`] on I/O failure.
    pub fn list_keys(&self, app: &str, env: &str, category: &str) -> Result<Vec<String>> {
        self.list(&[("app", app), ("env", env), ("category", category)])
    }

    /// Total count of `key` over the last `days` days, today included.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if a daily file or the compacted series cannot
    /// be read.
    pub fn sum_usages(&self, key: &UsageKey, days: u32) -> Result<u64> {
        self.sum_usages_as_of(key, days, today())
    }

    /// [`CounterStore::sum_usages`] with an explicit "today".
    ///
    /// # Errors
    ///
    /// See [`CounterStore::sum_usages`].
    pub fn sum_usages_as_of(&self, key: &UsageKey, days: u32, today: NaiveDate) -> Result<u64> {
        let per_day = self.per_day(key, days, today)?;
        Ok(per_day
            .into_iter()
            .map(|(_, count)| count)
            .fold(0, u64::saturating_add))
    }

    /// Count of `key` per `YYYYMMDD` day over the last `days` days. Always
    /// holds exactly `days` entries; days without data map to zero.
    ///
    /// # Errors
    ///
    /// See [`CounterStore::sum_usages`].
    pub fn usages_by_date(&self, key: &UsageKey, days: u32) -> Result<BTreeMap<String, u64>> {
        self.usages_by_date_as_of(key, days, today())
    }

    /// [`CounterStore::usages_by_date`] with an explicit "today".
    ///
    /// # Errors
    ///
    /// See [`CounterStore::sum_usages`].
    pub fn usages_by_date_as_of(
        &self,
        key: &UsageKey,
        days: u32,
        today: NaiveDate,
    ) -> Result<BTreeMap<String, u64>> {
        Ok(self.per_day(key, days, today)?.into_iter().collect())
    }

    /// Loads the compacted series once and adds the uncompacted daily file
    /// of every day in the window.
    fn per_day(&self, key: &UsageKey, days: u32, today: NaiveDate) -> Result<Vec<(String, u64)>> {
        let dir = self.key_dir(key);

        let _shared = self.compaction_lock.read();
        let compacted = CompactedSeries::load(&dir.join(COMPACTED_FILE))?;

        let mut per_day = Vec::new();
        for date in window(today, days) {
            let day = series::format_day(date);
            let uncompacted = series::read_count(&dir.join(&day))?;
            let count = uncompacted.saturating_add(compacted.get(&day));
            per_day.push((day, count));
        }
        Ok(per_day)
    }

    fn list(&self, parts: &[(&'static str, &str)]) -> Result<Vec<String>> {
        let mut path = self.basedir.clone();
        for &(component, value) in parts {
            validate_component(component, value)?;
            path.push(value);
        }
        Ok(list_subdirs(&path)?)
    }

    /// Directory holding the daily files of `key`.
    pub(crate) fn key_dir(&self, key: &UsageKey) -> PathBuf {
        let mut dir = self.basedir.clone();
        dir.extend(key.components());
        dir
    }

    pub(crate) fn compaction_lock(&self) -> &RwLock<()> {
        &self.compaction_lock
    }

    pub(crate) fn locks(&self) -> &LockTable {
        &self.locks
    }
}

/// Sorted names of the immediate subdirectories of `path`; empty when `path`
/// does not exist or is not a directory.
pub(crate) fn list_subdirs(path: &Path) -> StoreResult<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(StoreError::List {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::List {
            path: path.to_path_buf(),
            source: e,
        })?;
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        if is_dir && let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Daily files in a key directory as `(YYYYMMDD, path)`, oldest first.
/// Anything that is not a day-named file is skipped.
pub(crate) fn day_files(dir: &Path) -> StoreResult<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::List {
                path: dir.to_path_buf(),
                source: e,
            });
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::List {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if series::parse_day(&name).is_some() && entry.file_type().is_ok_and(|t| t.is_file()) {
            files.push((name, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

impl UsageRepository for CounterStore {
    fn record_usages(&self, key: &UsageKey, amount: u64, date: NaiveDate) -> Result<()> {
        self.increment(key, amount, date)
    }

    fn list_apps(&self) -> Result<Vec<String>> {
        CounterStore::list_apps(self)
    }

    fn list_environments(&self, app: &str) -> Result<Vec<String>> {
        CounterStore::list_environments(self, app)
    }

    fn list_categories(&self, app: &str, env: &str) -> Result<Vec<String>> {
        CounterStore::list_categories(self, app, env)
    }

    fn list_keys(&self, app: &str, env: &str, category: &str) -> Result<Vec<String>> {
        CounterStore::list_keys(self, app, env, category)
    }

    fn sum_usages(&self, query: &UsageQuery) -> Result<u64> {
        CounterStore::sum_usages(self, &query.key, query.days)
    }

    fn usages_by_date(&self, query: &UsageQuery) -> Result<BTreeMap<String, u64>> {
        CounterStore::usages_by_date(self, &query.key, query.days)
    }

    fn run_compaction(&self) -> Result<CompactionReport> {
        Compactor::new(self).run()
    }
}
