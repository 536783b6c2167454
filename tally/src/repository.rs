//! The read/write contract shared by every usage repository.
//!
//! Implementations are picked at construction time and used through
//! `Arc<dyn UsageRepository>`:
//!
//! - [`CounterStore`](crate::store::CounterStore): file-backed, compacting
//! - [`ClusterAggregator`](crate::cluster::ClusterAggregator): wraps a store,
//!   adds peer results on read
//! - [`ReadOnlyRepository`](crate::client::ReadOnlyRepository): reads through
//!   an HTTP client, refuses writes

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::compaction::CompactionReport;
use crate::error::Result;
use crate::key::UsageKey;

/// Number of days a query covers when the caller does not say.
pub const DEFAULT_DAYS: u32 = 30;

/// Where a read request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    /// An external client; clustered repositories fan out to peers.
    #[default]
    Client,
    /// Another node of the cluster; answered from local data only.
    Peer,
}

/// A read over the last `days` days of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuery {
    /// The series to read.
    pub key: UsageKey,
    /// How many days back from today (inclusive of today).
    pub days: u32,
    /// Who is asking.
    pub origin: Origin,
}

impl UsageQuery {
    /// A client-originated query.
    pub fn new(key: UsageKey, days: u32) -> Self {
        Self {
            key,
            days,
            origin: Origin::Client,
        }
    }

    /// Marks the query as coming from a peer node.
    #[must_use]
    pub fn from_peer(mut self) -> Self {
        self.origin = Origin::Peer;
        self
    }
}

/// Read/write contract for usage counters.
pub trait UsageRepository: Send + Sync {
    /// Adds `amount` to the counter for `key` on `date`.
    ///
    /// # Errors
    ///
    /// Returns a validation, I/O, or read-only error depending on the backend.
    fn record_usages(&self, key: &UsageKey, amount: u64, date: NaiveDate) -> Result<()>;

    /// Adds `amount` to today's counter for `key`.
    ///
    /// # Errors
    ///
    /// See [`UsageRepository::record_usages`].
    fn record(&self, key: &UsageKey, amount: u64) -> Result<()> {
        self.record_usages(key, amount, crate::store::today())
    }

    /// Lists applications.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be listed.
    fn list_apps(&self) -> Result<Vec<String>>;

    /// Lists environments of `app`.
    ///
    /// # Errors
    ///
    /// Returns an error for traversal-unsafe names or listing failures.
    fn list_environments(&self, app: &str) -> Result<Vec<String>>;

    /// Lists categories of `app/env`.
    ///
    /// # Errors
    ///
    /// Returns an error for traversal-unsafe names or listing failures.
    fn list_categories(&self, app: &str, env: &str) -> Result<Vec<String>>;

    /// Lists keys of `app/env/category`.
    ///
    /// # Errors
    ///
    /// Returns an error for traversal-unsafe names or listing failures.
    fn list_keys(&self, app: &str, env: &str, category: &str) -> Result<Vec<String>>;

    /// Total usages over the query window.
    ///
    /// # Errors
    ///
    /// Returns an error if local data cannot be read.
    fn sum_usages(&self, query: &UsageQuery) -> Result<u64>;

    /// Usages per `YYYYMMDD` day over the query window.
    ///
    /// # Errors
    ///
    /// Returns an error if local data cannot be read.
    fn usages_by_date(&self, query: &UsageQuery) -> Result<BTreeMap<String, u64>>;

    /// Runs one compaction pass, if the backend compacts at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    fn run_compaction(&self) -> Result<CompactionReport> {
        Ok(CompactionReport::default())
    }
}
