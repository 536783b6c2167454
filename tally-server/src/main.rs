//! tally-server binary: one usage counter node.
//!
//! Configuration comes from flags or the environment (`DATA_DIR`, `PORT`,
//! `PEERS`, `PEERS_ENV_VAR`); see `tally-server --help`.

use std::net::TcpListener;

use clap::Parser;
use tally_server::config::Config;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();

    if let Err(e) = run(&config) {
        tracing::error!("tally-server failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let peers = config.resolve_peers(|name| std::env::var(name).ok())?;
    if !peers.is_empty() {
        tracing::info!(peers = peers.len(), "clustering enabled");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    let node = tally_server::start_node(config, peers, listener)?;
    node.join();

    tracing::info!("tally-server exited cleanly");
    Ok(())
}
