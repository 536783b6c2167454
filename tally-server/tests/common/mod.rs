//! Helpers for running tally nodes in-process on ephemeral ports.

#![allow(dead_code)]

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use tally::client::{ClientConfig, RegisterClient};
use tally::peer::PeerAddr;
use tally_server::config::Config;
use tally_server::{Node, start_node};

pub fn config(data_dir: &Path) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        port: 0,
        peers: None,
        peers_env_var: None,
        workers: 4,
        peer_interval_secs: 60,
        peer_timeout_secs: 2,
        compaction_interval_secs: 86_400,
        compaction_threshold: tally::compaction::DEFAULT_THRESHOLD,
    }
}

pub fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").unwrap()
}

pub fn addr_of(listener: &TcpListener) -> PeerAddr {
    let addr = listener.local_addr().unwrap();
    PeerAddr {
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}

pub fn node(data_dir: &Path, peers: Vec<PeerAddr>) -> Node {
    start_node(&config(data_dir), peers, listener()).unwrap()
}

pub fn base_url(node: &Node) -> String {
    format!("http://{}", node.addr())
}

pub fn client(node: &Node) -> RegisterClient {
    RegisterClient::new(ClientConfig::new(base_url(node)).with_timeout(Duration::from_secs(5)))
        .unwrap()
}
