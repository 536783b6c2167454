//! # tally
//!
//! Daily usage counters on the filesystem, with compaction and cluster-wide
//! read aggregation.
//!
//! tally counts how often things are used, keyed by a four-level hierarchy
//! (application, environment, category, key) at daily granularity. Each node
//! stores what it is sent on its own disk; reads can add up the counts of
//! every live peer without any write-side replication.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - One plain-text file per key per day, merged into a per-key series by compaction
//! - Exact counts: concurrent increments to the same day never lose an update
//! - Keys validated before they reach the filesystem (no traversal, no path delimiters)
//! - Cluster reads fan out to live peers in parallel; a dead peer contributes zero
//! - A batching client that buffers increments and posts them in bulk
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tally::{CounterStore, UsageKey, UsageQuery, UsageRepository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CounterStore::open("./usage-data")?;
//! let key = UsageKey::new("shop", "prod", "pages", "checkout")?;
//!
//! store.record(&key, 1)?;
//!
//! let total = UsageRepository::sum_usages(&store, &UsageQuery::new(key.clone(), 30))?;
//! let per_day = store.usages_by_date(&key, 7)?;
//! for (day, count) in per_day {
//!     println!("{day}: {count}");
//! }
//! # let _ = total;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`CounterStore`]: file-backed counters, the only component that touches disk
//! - [`Compactor`]: merges daily files into a key's compacted series
//! - [`PeerMonitor`]: keeps the live peer set
//! - [`ClusterAggregator`]: adds live peer results to local reads
//! - [`WriteBatcher`]: buffers increments client-side, flushes in bulk
//! - [`UsageRepository`]: the trait the HTTP layer is written against
//!
//! ## Modules
//!
//! - [`key`]: usage keys and path-component validation
//! - [`locks`]: per-file lock table with idle eviction
//! - [`series`]: daily count files and the compacted series format
//! - [`store`]: the counter store
//! - [`compaction`]: compaction passes and reports
//! - [`repository`]: the repository trait and query types
//! - [`peer`]: node identity and peer addresses
//! - [`client`]: blocking HTTP client and the read-only repository
//! - [`cluster`]: peer monitoring and read aggregation
//! - [`batch`]: the write batcher
//! - [`task`]: fixed-delay background jobs
//! - [`error`]: error types

pub mod batch;
pub mod client;
pub mod cluster;
pub mod compaction;
pub mod error;
pub mod key;
pub mod locks;
pub mod peer;
pub mod repository;
pub mod series;
pub mod store;
pub mod task;

// Re-export primary API types at crate root for convenience.
pub use batch::{BatcherConfig, WriteBatcher};
pub use client::{ClientConfig, ReadOnlyRepository, RegisterClient};
pub use cluster::{ClusterAggregator, MonitorConfig, PeerMonitor};
pub use compaction::{CompactionReport, Compactor};
pub use error::{Result, TallyError};
pub use key::UsageKey;
pub use peer::{NodeId, PeerAddr};
pub use repository::{DEFAULT_DAYS, Origin, UsageQuery, UsageRepository};
pub use store::CounterStore;
pub use task::PeriodicTask;
