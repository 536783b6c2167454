//! # tally-server
//!
//! HTTP node serving a [`tally`] counter store.
//!
//! A node owns one data directory. With peers configured it wraps its store
//! in a [`ClusterAggregator`] so client reads include every live peer's
//! counts. Compaction runs on a fixed schedule in the background.
//!
//! The binary is a thin wrapper around [`start_node`]; tests use the same
//! entry point to run several nodes in one process on ephemeral ports.

pub mod config;
pub mod http;
pub mod routes;
pub mod stats;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use tally::cluster::{ClusterAggregator, MonitorConfig, PeerMonitor};
use tally::compaction::Compactor;
use tally::error::TallyError;
use tally::peer::{NodeId, PeerAddr};
use tally::task::PeriodicTask;
use tally::{CounterStore, UsageRepository};
use thiserror::Error;

use crate::config::Config;
use crate::http::{Handler, Request, ServerHandle};
use crate::routes::Router;

/// Failure to start a node.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The store, a peer client, or the peer list could not be set up.
    #[error(transparent)]
    Tally(#[from] TallyError),

    /// A socket or thread could not be set up.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running node: HTTP workers plus its background tasks.
pub struct Node {
    node_id: NodeId,
    store: Arc<CounterStore>,
    repo: Arc<dyn UsageRepository>,
    server: ServerHandle,
    tasks: Vec<PeriodicTask>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("addr", &self.server.addr())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// The node's identity, as returned by `/_ping`.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The address the HTTP server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    /// The local store.
    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// The repository requests are served from: the local store, or a
    /// cluster aggregator around it.
    pub fn repo(&self) -> &Arc<dyn UsageRepository> {
        &self.repo
    }

    /// Blocks for as long as the HTTP server runs.
    pub fn join(self) {
        let Self { server, tasks, .. } = self;
        server.join();
        drop(tasks);
    }

    /// Stops the background tasks and the HTTP server.
    pub fn shutdown(mut self) {
        for task in &mut self.tasks {
            task.stop();
        }
        self.server.shutdown();
    }
}

/// Builds the store and repository for `config`, serves them on `listener`,
/// and starts peer polling and scheduled compaction.
///
/// # Errors
///
/// Returns [`ServerError`] if the data directory, a peer client, a thread,
/// or the listener cannot be set up.
pub fn start_node(
    config: &Config,
    peers: Vec<PeerAddr>,
    listener: TcpListener,
) -> Result<Node, ServerError> {
    let node_id = NodeId::random();
    let store = Arc::new(CounterStore::open(&config.data_dir)?);

    let monitor = if peers.is_empty() {
        None
    } else {
        let monitor_config = MonitorConfig::default()
            .with_interval(config.peer_interval())
            .with_timeout(config.peer_timeout());
        Some(Arc::new(PeerMonitor::new(node_id, peers, monitor_config)?))
    };

    let repo: Arc<dyn UsageRepository> = match &monitor {
        Some(monitor) => Arc::new(ClusterAggregator::new(
            Arc::clone(&store),
            Arc::clone(monitor),
        )),
        None => Arc::clone(&store) as Arc<dyn UsageRepository>,
    };

    let router = Arc::new(Router::new(Arc::clone(&repo), node_id));
    let handler: Handler = Arc::new(move |req: &Request| router.handle(req));
    let server = http::serve(listener, config.workers, handler)?;

    let mut tasks = Vec::new();
    if let Some(monitor) = &monitor {
        tasks.push(monitor.start()?);
    }

    let compaction_store = Arc::clone(&store);
    let threshold = config.compaction_threshold;
    let interval = config.compaction_interval();
    tasks.push(PeriodicTask::spawn("compaction", interval, interval, move || {
        if let Err(e) = Compactor::new(&compaction_store)
            .with_threshold(threshold)
            .run()
        {
            tracing::error!(error = %e, "compaction pass failed");
        }
    })?);

    tracing::info!(
        node_id = %node_id,
        addr = %server.addr(),
        data_dir = %config.data_dir.display(),
        clustered = monitor.is_some(),
        "tally node started"
    );

    Ok(Node {
        node_id,
        store,
        repo,
        server,
        tasks,
    })
}
