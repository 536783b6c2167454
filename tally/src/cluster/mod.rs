//! Read-time aggregation across a cluster of independent nodes.
//!
//! Nodes never replicate writes. Each one stores what it was sent, and a
//! client-originated read is answered with the local count plus whatever
//! every live peer reports for the same query. Peers are asked with
//! peer-tagged requests, so they answer from local data and the fan-out
//! never recurses.
//!
//! ```text
//! client ──GET──▶ node A ──┬── local CounterStore
//!                          ├──X-From-Peer──▶ node B (local only)
//!                          └──X-From-Peer──▶ node C (local only)
//! ```

pub mod monitor;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;

pub use monitor::{MonitorConfig, Peer, PeerMonitor};

use crate::compaction::CompactionReport;
use crate::error::Result;
use crate::key::UsageKey;
use crate::repository::{Origin, UsageQuery, UsageRepository};
use crate::store::CounterStore;

/// How long an aggregated read waits for the first peer check.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`CounterStore`] whose reads include the counts of live peers.
#[derive(Debug)]
pub struct ClusterAggregator {
    local: Arc<CounterStore>,
    monitor: Arc<PeerMonitor>,
    ready_timeout: Duration,
}

impl ClusterAggregator {
    /// Wraps `local`, using `monitor` for the live peer set.
    pub fn new(local: Arc<CounterStore>, monitor: Arc<PeerMonitor>) -> Self {
        Self {
            local,
            monitor,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Sets how long reads wait for the first peer check before answering
    /// with whatever peers are known.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// The wrapped store.
    pub fn local(&self) -> &Arc<CounterStore> {
        &self.local
    }

    /// The peer monitor.
    pub fn monitor(&self) -> &Arc<PeerMonitor> {
        &self.monitor
    }

    /// Asks every live peer in parallel. A failing peer is logged and left
    /// out of the result.
    fn from_peers<T, F>(&self, query: &UsageQuery, ask: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&Peer, [&str; 4], u32) -> Result<T> + Sync,
    {
        if !self.monitor.await_ready(self.ready_timeout) {
            tracing::warn!("first peer check still pending, reading without it");
        }
        let peers = self.monitor.live_peers();
        if peers.is_empty() {
            return Vec::new();
        }

        let components = query.key.components();
        let ask = &ask;
        thread::scope(|scope| {
            let requests: Vec<_> = peers
                .iter()
                .map(|peer| {
                    let handle = scope.spawn(move || ask(&**peer, components, query.days));
                    (peer, handle)
                })
                .collect();

            requests
                .into_iter()
                .filter_map(|(peer, handle)| match handle.join() {
                    Ok(Ok(value)) => Some(value),
                    Ok(Err(e)) => {
                        tracing::warn!(peer = %peer.addr(), key = %query.key, error = %e, "peer query failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(peer = %peer.addr(), key = %query.key, "peer query panicked");
                        None
                    }
                })
                .collect()
        })
    }
}

impl UsageRepository for ClusterAggregator {
    fn record_usages(&self, key: &UsageKey, amount: u64, date: NaiveDate) -> Result<()> {
        self.local.increment(key, amount, date)
    }

    fn list_apps(&self) -> Result<Vec<String>> {
        self.local.list_apps()
    }

    fn list_environments(&self, app: &str) -> Result<Vec<String>> {
        self.local.list_environments(app)
    }

    fn list_categories(&self, app: &str, env: &str) -> Result<Vec<String>> {
        self.local.list_categories(app, env)
    }

    fn list_keys(&self, app: &str, env: &str, category: &str) -> Result<Vec<String>> {
        self.local.list_keys(app, env, category)
    }

    fn sum_usages(&self, query: &UsageQuery) -> Result<u64> {
        let local = self.local.sum_usages(&query.key, query.days)?;
        if query.origin == Origin::Peer {
            return Ok(local);
        }

        let remote = self.from_peers(query, |peer, [app, env, category, key], days| {
            peer.client().usages(app, env, category, key, days)
        });
        Ok(remote.into_iter().fold(local, u64::saturating_add))
    }

    fn usages_by_date(&self, query: &UsageQuery) -> Result<BTreeMap<String, u64>> {
        let mut merged = self.local.usages_by_date(&query.key, query.days)?;
        if query.origin == Origin::Peer {
            return Ok(merged);
        }

        let remote = self.from_peers(query, |peer, [app, env, category, key], days| {
            peer.client().usages_by_date(app, env, category, key, days)
        });
        for by_date in remote {
            for (day, count) in by_date {
                let slot = merged.entry(day).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
        Ok(merged)
    }

    fn run_compaction(&self) -> Result<CompactionReport> {
        self.local.run_compaction()
    }
}
