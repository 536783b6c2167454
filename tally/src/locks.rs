//! Per-resource exclusive locks, created on demand and evicted when idle.
//!
//! # Design
//!
//! The table is a sharded concurrent map from a resource name (the full path
//! of a daily file) to an `Arc<Mutex<Instant>>`. The mutex guards the instant
//! the lock was last acquired, which is what idle eviction looks at.
//!
//! Eviction runs under the map's shard write lock and only removes an entry
//! whose `Arc` strong count is 1, i.e. nobody but the table references it.
//! A thread that has looked up a lock and is about to block on it holds its own
//! clone of the `Arc`, so its entry cannot be evicted out from under it, and a
//! later caller can never end up with a different mutex for the same resource
//! while the first one is still in use.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;

/// Default idle time after which an unheld lock is dropped from the table.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60);

/// Held lock on one resource; released on drop.
pub type ResourceGuard = ArcMutexGuard<RawMutex, Instant>;

/// Concurrent table of exclusive per-resource locks.
#[derive(Debug)]
pub struct LockTable {
    locks: DashMap<String, Arc<Mutex<Instant>>>,
    idle_ttl: Duration,
    last_sweep: Mutex<Instant>,
}

impl LockTable {
    /// Creates an empty table with the given idle eviction time.
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            idle_ttl,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Blocks until the lock for `resource` is held by the caller.
    ///
    /// Occasionally sweeps idle entries; the sweep never touches the entry
    /// just acquired because the returned guard keeps it referenced.
    pub fn acquire(&self, resource: &str) -> ResourceGuard {
        // Clone out of the map before locking so no shard lock is held while
        // blocking on the resource.
        let slot = self
            .locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instant::now())))
            .value()
            .clone();

        let mut guard = slot.lock_arc();
        *guard = Instant::now();

        self.maybe_sweep();
        guard
    }

    /// Removes every entry that is unheld, unreferenced and idle for at least
    /// the configured TTL. Returns the number of entries removed.
    pub fn evict_idle(&self) -> usize {
        let before = self.locks.len();
        let ttl = self.idle_ttl;
        self.locks.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            // Strong count 1 under the shard lock: nobody can be holding it.
            match slot.try_lock() {
                Some(last_used) => last_used.elapsed() < ttl,
                None => true,
            }
        });
        before.saturating_sub(self.locks.len())
    }

    /// Number of locks currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the table tracks no locks.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn maybe_sweep(&self) {
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if last.elapsed() < self.idle_ttl {
            return;
        }
        *last = Instant::now();
        drop(last);

        let evicted = self.evict_idle();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.locks.len(), "evicted idle resource locks");
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}
