//! Client-side write batching.
//!
//! Producers that record many usages call [`WriteBatcher::record_usage`],
//! which only bumps an in-memory counter. A flush sends the buffered counts
//! as one bulk `POST /:app/:env` per destination.
//!
//! Delivery is at-least-once: counts of a destination whose post fails are
//! merged back and retried on the next flush. If the server applied a batch
//! but its acknowledgement was lost, the retry counts that batch twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::client::{ClientConfig, RegisterClient};
use crate::error::Result;
use crate::key::UsageKey;
use crate::task::PeriodicTask;

/// category → key → pending count.
pub type CategoryCounts = HashMap<String, HashMap<String, u64>>;

/// Where a batch is posted: one `app/env` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Destination {
    app: String,
    env: String,
}

/// Settings for a [`WriteBatcher`].
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Connection settings of the target server.
    pub client: ClientConfig,
    /// Delay between automatic flushes.
    pub interval: Duration,
}

impl BatcherConfig {
    /// Flushes every 10 seconds by default.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: ClientConfig::new(base_url),
            interval: Duration::from_secs(10),
        }
    }

    /// Sets the flush interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Destinations whose batch was acknowledged.
    pub sent: usize,
    /// Destinations whose batch was put back for the next flush.
    pub retained: usize,
}

/// Buffers usage increments and posts them in bulk.
#[derive(Debug)]
pub struct WriteBatcher {
    client: RegisterClient,
    interval: Duration,
    buffer: Mutex<HashMap<Destination, CategoryCounts>>,
}

impl WriteBatcher {
    /// Builds a batcher. Nothing is flushed automatically until
    /// [`WriteBatcher::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`](crate::error::ClientError) if the client
    /// cannot be built.
    pub fn new(config: BatcherConfig) -> Result<Self> {
        Ok(Self {
            client: RegisterClient::new(config.client)?,
            interval: config.interval,
            buffer: Mutex::new(HashMap::new()),
        })
    }

    /// Counts one usage of `app/env/category/key`.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`](crate::error::KeyError) if a component would
    /// be rejected by the server; nothing is buffered in that case.
    pub fn record_usage(&self, app: &str, env: &str, category: &str, key: &str) -> Result<()> {
        UsageKey::new(app, env, category, key)?;

        let destination = Destination {
            app: app.to_string(),
            env: env.to_string(),
        };
        let mut buffer = self.buffer.lock();
        let slot = buffer
            .entry(destination)
            .or_default()
            .entry(category.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(0);
        *slot = slot.saturating_add(1);
        Ok(())
    }

    /// Total number of usages not yet acknowledged by the server.
    pub fn pending(&self) -> u64 {
        self.buffer
            .lock()
            .values()
            .flat_map(HashMap::values)
            .flat_map(HashMap::values)
            .fold(0, |total, &count| total.saturating_add(count))
    }

    /// Sends every buffered destination. The buffer is swapped out first, so
    /// recording continues while requests are in flight; failed destinations
    /// are merged back.
    pub fn flush(&self) -> FlushReport {
        let batch = std::mem::take(&mut *self.buffer.lock());
        let mut report = FlushReport::default();

        for (destination, counts) in batch {
            if counts.is_empty() {
                continue;
            }
            match self.client.post_batch(&destination.app, &destination.env, &counts) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(
                        app = %destination.app,
                        env = %destination.env,
                        error = %e,
                        "failed to send usage batch, keeping it for the next flush"
                    );
                    self.restore(destination, counts);
                    report.retained += 1;
                }
            }
        }
        report
    }

    fn restore(&self, destination: Destination, counts: CategoryCounts) {
        let mut buffer = self.buffer.lock();
        let pending = buffer.entry(destination).or_default();
        for (category, keys) in counts {
            let pending_keys = pending.entry(category).or_default();
            for (key, count) in keys {
                let slot = pending_keys.entry(key).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
    }

    /// Flushes on a background thread every configured interval.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn start(self: &Arc<Self>) -> std::io::Result<PeriodicTask> {
        let batcher = Arc::clone(self);
        PeriodicTask::spawn("write-batcher", self.interval, self.interval, move || {
            batcher.flush();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> WriteBatcher {
        WriteBatcher::new(
            BatcherConfig::new("http://127.0.0.1:1").with_timeout(Duration::from_millis(500)),
        )
        .unwrap()
    }

    #[test]
    fn test_records_accumulate() {
        let batcher = unreachable();
        for _ in 0..3 {
            batcher.record_usage("app", "env", "cat", "a").unwrap();
        }
        batcher.record_usage("app", "env", "cat", "b").unwrap();
        batcher.record_usage("app", "other", "cat", "a").unwrap();
        assert_eq!(batcher.pending(), 5);
        assert_eq!(batcher.buffer.lock().len(), 2);
    }

    #[test]
    fn test_invalid_key_is_not_buffered() {
        let batcher = unreachable();
        assert!(batcher.record_usage("app", "..", "cat", "a").is_err());
        assert!(batcher.record_usage("app", "env", "c/t", "a").is_err());
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn test_failed_flush_keeps_counts() {
        let batcher = unreachable();
        batcher.record_usage("app", "env", "cat", "a").unwrap();
        batcher.record_usage("app", "env", "cat", "a").unwrap();

        let report = batcher.flush();
        assert_eq!(report, FlushReport { sent: 0, retained: 1 });
        assert_eq!(batcher.pending(), 2);

        // Recorded after the failure: merged, not overwritten.
        batcher.record_usage("app", "env", "cat", "a").unwrap();
        batcher.flush();
        assert_eq!(batcher.pending(), 3);
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let batcher = unreachable();
        assert_eq!(batcher.flush(), FlushReport::default());
    }
}
