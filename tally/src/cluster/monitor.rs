//! Liveness tracking of configured peers.
//!
//! Every polling cycle pings all configured peers in parallel. A peer is
//! live iff the ping succeeds within the client timeout and answers with an
//! id other than ours (a node listed in its own peer list sees itself).
//! The live set is swapped in as a whole, so readers always get a consistent
//! snapshot.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::client::{ClientConfig, RegisterClient};
use crate::error::Result;
use crate::peer::{NodeId, PeerAddr};
use crate::task::PeriodicTask;

/// Polling settings for a [`PeerMonitor`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Delay between polling cycles.
    pub interval: Duration,
    /// Timeout of each ping and of fan-out queries.
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Sets the polling interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A configured peer and the peer-tagged client used to reach it.
#[derive(Debug)]
pub struct Peer {
    addr: PeerAddr,
    client: RegisterClient,
}

impl Peer {
    /// Where the peer listens.
    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    /// Client whose requests carry the peer tag.
    pub fn client(&self) -> &RegisterClient {
        &self.client
    }
}

/// Keeps the set of currently reachable peers.
#[derive(Debug)]
pub struct PeerMonitor {
    node_id: NodeId,
    config: MonitorConfig,
    peers: Vec<Arc<Peer>>,
    live: RwLock<Arc<Vec<Arc<Peer>>>>,
    ready: Mutex<bool>,
    ready_signal: Condvar,
}

impl PeerMonitor {
    /// Builds a monitor for `peers`. Nothing is polled until
    /// [`PeerMonitor::check_availability`] or [`PeerMonitor::start`] runs.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`](crate::error::ClientError) if a peer client
    /// cannot be built.
    pub fn new(node_id: NodeId, peers: Vec<PeerAddr>, config: MonitorConfig) -> Result<Self> {
        let peers = peers
            .into_iter()
            .map(|addr| {
                let client = RegisterClient::new(
                    ClientConfig::new(addr.base_url())
                        .with_timeout(config.timeout)
                        .with_peer_tag(),
                )?;
                Ok(Arc::new(Peer { addr, client }))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            node_id,
            config,
            peers,
            live: RwLock::new(Arc::new(Vec::new())),
            ready: Mutex::new(false),
            ready_signal: Condvar::new(),
        })
    }

    /// This node's identity.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Every configured peer, live or not.
    pub fn configured_peers(&self) -> &[Arc<Peer>] {
        &self.peers
    }

    /// Snapshot of the peers found live by the last completed cycle.
    pub fn live_peers(&self) -> Arc<Vec<Arc<Peer>>> {
        self.live.read().clone()
    }

    /// Runs one polling cycle: pings every configured peer in parallel and
    /// replaces the live set. Opens the readiness gate.
    pub fn check_availability(&self) {
        let available: Vec<Arc<Peer>> = thread::scope(|scope| {
            let probes: Vec<_> = self
                .peers
                .iter()
                .map(|peer| scope.spawn(move || self.is_available(peer).then(|| Arc::clone(peer))))
                .collect();
            probes
                .into_iter()
                .filter_map(|probe| probe.join().ok().flatten())
                .collect()
        });

        let previous = {
            let mut live = self.live.write();
            std::mem::replace(&mut *live, Arc::new(available))
        };
        let current = self.live_peers();

        let addrs = |set: &[Arc<Peer>]| set.iter().map(|p| p.addr.to_string()).collect::<Vec<_>>();
        let (before, after) = (addrs(previous.as_slice()), addrs(current.as_slice()));
        if before != after {
            tracing::info!(peers = ?after, "available peers changed");
        }

        let mut ready = self.ready.lock();
        if !*ready {
            *ready = true;
            self.ready_signal.notify_all();
        }
    }

    fn is_available(&self, peer: &Peer) -> bool {
        match peer.client.ping() {
            Ok(id) if self.node_id.matches(&id) => {
                tracing::debug!(peer = %peer.addr, "peer is this node, skipping");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(peer = %peer.addr, error = %e, "peer unavailable");
                false
            }
        }
    }

    /// Whether the first polling cycle has completed.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Blocks until the first polling cycle has completed or `timeout`
    /// passes. Returns whether the monitor is ready.
    pub fn await_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        while !*ready {
            if self.ready_signal.wait_until(&mut ready, deadline).timed_out() {
                break;
            }
        }
        *ready
    }

    /// Starts polling on a background thread: once right away, then every
    /// configured interval.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn start(self: &Arc<Self>) -> std::io::Result<PeriodicTask> {
        let monitor = Arc::clone(self);
        PeriodicTask::spawn("peer-monitor", Duration::ZERO, self.config.interval, move || {
            monitor.check_availability();
        })
    }
}
