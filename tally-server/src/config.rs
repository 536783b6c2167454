//! Command line and environment configuration of a tally node.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tally::peer::{PeerAddr, parse_peer_list};

/// tally-server: usage counter node.
#[derive(Parser, Debug, Clone)]
#[command(name = "tally-server", version, about)]
pub struct Config {
    /// Directory holding the counter files.
    #[arg(long, env = "DATA_DIR", default_value = "/trail-register-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "PORT", default_value_t = 4567)]
    pub port: u16,

    /// Comma separated peers, `host:port` or `host[port]`.
    #[arg(long, env = "PEERS")]
    pub peers: Option<String>,

    /// Name of an environment variable that holds the peer list instead of
    /// `PEERS`.
    #[arg(long, env = "PEERS_ENV_VAR")]
    pub peers_env_var: Option<String>,

    /// Number of HTTP worker threads.
    #[arg(long, default_value_t = 16)]
    pub workers: usize,

    /// Seconds between peer liveness checks.
    #[arg(long, default_value_t = 60)]
    pub peer_interval_secs: u64,

    /// Timeout in seconds for peer pings and fan-out queries.
    #[arg(long, default_value_t = 5)]
    pub peer_timeout_secs: u64,

    /// Seconds between compaction passes.
    #[arg(long, default_value_t = 86_400)]
    pub compaction_interval_secs: u64,

    /// Daily files a key needs before it is compacted.
    #[arg(long, default_value_t = tally::compaction::DEFAULT_THRESHOLD)]
    pub compaction_threshold: usize,
}

impl Config {
    /// Resolves the peer list. When `peers_env_var` is set, the variable it
    /// names (looked up through `lookup`) wins over `peers`.
    ///
    /// # Errors
    ///
    /// Returns a [`PeerError`](tally::error::PeerError) for a malformed entry.
    pub fn resolve_peers<F>(&self, lookup: F) -> tally::Result<Vec<PeerAddr>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let list = match &self.peers_env_var {
            Some(var) => lookup(var),
            None => self.peers.clone(),
        };
        match list {
            Some(list) => parse_peer_list(&list),
            None => Ok(Vec::new()),
        }
    }

    /// Peer liveness polling interval.
    pub fn peer_interval(&self) -> Duration {
        Duration::from_secs(self.peer_interval_secs)
    }

    /// Peer request timeout.
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    /// Compaction schedule.
    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("tally-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--data-dir",
            "/tmp/tally",
            "--port",
            "8080",
            "--peers",
            "a:1,b[2]",
            "--compaction-threshold",
            "10",
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tally"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.compaction_threshold, 10);

        let peers = config.resolve_peers(|_| None).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].host, "b");
        assert_eq!(peers[1].port, 2);
    }

    #[test]
    fn test_peers_env_var_indirection() {
        let config = parse(&["--peers", "ignored:1", "--peers-env-var", "OTHER"]);
        let peers = config
            .resolve_peers(|name| (name == "OTHER").then(|| "hosta[4567],hostb:123".to_string()))
            .unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].host, "hosta");
        assert_eq!(peers[0].port, 4567);
        assert_eq!(peers[1].host, "hostb");
    }

    #[test]
    fn test_bad_peer_entry() {
        let config = parse(&["--peers", "nope"]);
        assert!(config.resolve_peers(|_| None).is_err());
    }

    #[test]
    fn test_intervals() {
        let config = parse(&["--peer-interval-secs", "2", "--peer-timeout-secs", "1"]);
        assert_eq!(config.peer_interval(), Duration::from_secs(2));
        assert_eq!(config.peer_timeout(), Duration::from_secs(1));
        assert_eq!(config.compaction_interval(), Duration::from_secs(86_400));
    }
}
