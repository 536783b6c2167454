//! Per-route request timing, served by `GET /_stats`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Default)]
struct RouteTotals {
    elapsed_ms: AtomicU64,
    count: AtomicU64,
}

/// One row of `GET /_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteStat {
    /// Route pattern, e.g. `GET /:app/:env`.
    pub req: String,
    /// Total milliseconds spent in the route.
    pub total: u64,
    /// Number of invocations.
    pub count: u64,
    /// Mean milliseconds per invocation.
    pub avg: u64,
}

/// Elapsed time and invocation count per route pattern.
#[derive(Debug, Default)]
pub struct RouteStats {
    routes: DashMap<String, RouteTotals>,
}

impl RouteStats {
    /// Adds one invocation of `route` that took `elapsed`.
    pub fn record(&self, route: &str, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let totals = self.routes.entry(route.to_string()).or_default();
        totals.elapsed_ms.fetch_add(millis, Ordering::Relaxed);
        totals.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Rows sorted by route pattern.
    pub fn snapshot(&self) -> Vec<RouteStat> {
        let mut rows: Vec<RouteStat> = self
            .routes
            .iter()
            .map(|entry| {
                let total = entry.elapsed_ms.load(Ordering::Relaxed);
                let count = entry.count.load(Ordering::Relaxed);
                RouteStat {
                    req: entry.key().clone(),
                    total,
                    count,
                    avg: total / count.max(1),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.req.cmp(&b.req));
        rows
    }
}
