//! Day stamps, daily count files, and the compacted series file.
//!
//! # File Formats
//!
//! ```text
//! <key dir>/20240115   <- "42"            one ASCII decimal count, no newline
//! <key dir>/_data      <- "20240114 7\n"  one "<YYYYMMDD> <count>" line per date
//! ```
//!
//! Both kinds of file are rewritten through a temporary sibling and a rename,
//! so a reader or a crash never sees a half written count.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{StoreError, StoreResult};

/// File name of the compacted series inside a key directory.
pub const COMPACTED_FILE: &str = "_data";

/// Formats a date as ISO-8601 basic (`YYYYMMDD`).
pub fn format_day(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Parses a `YYYYMMDD` file name; anything else yields `None`.
pub fn parse_day(name: &str) -> Option<NaiveDate> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(name, "%Y%m%d").ok()
}

/// Reads a daily count file. A missing file counts as zero.
///
/// # Errors
///
/// Returns [`StoreError::Read`] on I/O failure and
/// [`StoreError::CorruptCount`] if the content is not a decimal integer.
pub fn read_count(path: &Path) -> StoreResult<u64> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let trimmed = content.trim();
    trimmed.parse::<u64>().map_err(|_| StoreError::CorruptCount {
        path: path.to_path_buf(),
        content: trimmed.to_string(),
    })
}

/// Writes a daily count file.
///
/// The count goes to a dot-prefixed sibling first and is renamed over the
/// daily file, so concurrent readers see either the old or the new count.
/// Callers must hold the file's resource lock.
///
/// # Errors
///
/// Returns [`StoreError::Write`] on I/O failure.
pub fn write_count(path: &Path, count: u64) -> StoreResult<()> {
    let tmp = sibling_tmp(path);
    fs::write(&tmp, count.to_string()).map_err(|e| StoreError::Write {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| StoreError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Per-date counts that have been rolled up out of daily files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactedSeries {
    counts: BTreeMap<String, u64>,
}

impl CompactedSeries {
    /// Loads the series stored at `path`, or an empty one if the file does
    /// not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] on I/O failure and
    /// [`StoreError::CorruptSeries`] for a malformed line.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let mut counts = BTreeMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let parsed = line
                .split_once(' ')
                .and_then(|(day, count)| Some((day, count.trim().parse::<u64>().ok()?)));
            let Some((day, count)) = parsed else {
                return Err(StoreError::CorruptSeries {
                    path: path.to_path_buf(),
                    line: line.to_string(),
                });
            };
            let slot = counts.entry(day.to_string()).or_insert(0u64);
            *slot = slot.saturating_add(count);
        }

        Ok(Self { counts })
    }

    /// Persists the series to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the temporary file cannot be written
    /// or renamed into place.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let tmp = sibling_tmp(path);
        let mut body = String::with_capacity(self.counts.len() * 16);
        for (day, count) in &self.counts {
            body.push_str(day);
            body.push(' ');
            body.push_str(&count.to_string());
            body.push('\n');
        }

        fs::write(&tmp, body).map_err(|e| StoreError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, path).map_err(|e| StoreError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Adds `count` to the value stored for `day`.
    pub fn merge(&mut self, day: &str, count: u64) {
        let slot = self.counts.entry(day.to_string()).or_insert(0);
        *slot = slot.saturating_add(count);
    }

    /// Count rolled up for `day`, zero if none.
    pub fn get(&self, day: &str) -> u64 {
        self.counts.get(day).copied().unwrap_or(0)
    }

    /// Sum over every stored day.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0, |total, &count| total.saturating_add(count))
    }

    /// Number of days held.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no day has been compacted yet.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// `<dir>/.<name>.tmp`; never a valid day name, so readers skip it.
fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
