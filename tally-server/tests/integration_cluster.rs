//! Clustered nodes running in one process.

mod common;

use std::time::{Duration, Instant};

use tally::peer::PeerAddr;
use tally::{UsageKey, UsageQuery, UsageRepository};
use tally_server::start_node;
use tempfile::tempdir;

#[test]
fn test_reads_include_live_peers() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();

    let node_a = common::node(dir_a.path(), Vec::new());
    let addr_a = PeerAddr {
        host: "127.0.0.1".to_string(),
        port: node_a.addr().port(),
    };

    // B lists itself too, the way a shared peer list would.
    let listener_b = common::listener();
    let addr_b = common::addr_of(&listener_b);
    let node_b = start_node(
        &common::config(dir_b.path()),
        vec![addr_a, addr_b],
        listener_b,
    )
    .unwrap();

    let client_a = common::client(&node_a);
    let client_b = common::client(&node_b);
    for _ in 0..20 {
        client_a.record_usage("app", "env", "cat", "key").unwrap();
    }
    client_b.record_usage("app", "env", "cat", "key").unwrap();

    assert_eq!(client_b.usages("app", "env", "cat", "key", 30).unwrap(), 21);
    assert_eq!(client_a.usages("app", "env", "cat", "key", 30).unwrap(), 20);
    assert_eq!(client_b.all_usages("app", "env", "cat", 30).unwrap()["key"], 21);

    let by_date = client_b.usages_by_date("app", "env", "cat", "key", 3).unwrap();
    assert_eq!(by_date.values().sum::<u64>(), 21);

    // Self was excluded from the live set.
    let key = UsageKey::new("app", "env", "cat", "key").unwrap();
    let local_only = node_b
        .repo()
        .sum_usages(&UsageQuery::new(key, 30).from_peer())
        .unwrap();
    assert_eq!(local_only, 1);

    node_b.shutdown();
    node_a.shutdown();
}

#[test]
fn test_unreachable_peer_contributes_nothing() {
    let dir = tempdir().unwrap();
    let mut config = common::config(dir.path());
    config.peer_timeout_secs = 1;

    let dead = PeerAddr {
        host: "127.0.0.1".to_string(),
        port: 1,
    };
    let node = start_node(&config, vec![dead], common::listener()).unwrap();
    let client = common::client(&node);

    client.record_usage("app", "env", "cat", "key").unwrap();
    client.record_usage("app", "env", "cat", "key").unwrap();
    assert_eq!(client.usages("app", "env", "cat", "key", 30).unwrap(), 2);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(client.usages("app", "env", "cat", "key", 30).unwrap(), 2);
    node.shutdown();
}

#[test]
fn test_silent_peer_does_not_stall_reads() {
    // Accepts the handshake through the backlog but never answers.
    let silent = common::listener();
    let silent_addr = common::addr_of(&silent);

    let dir = tempdir().unwrap();
    let mut config = common::config(dir.path());
    config.peer_timeout_secs = 1;
    let node = start_node(&config, vec![silent_addr], common::listener()).unwrap();

    let key = UsageKey::new("app", "env", "cat", "key").unwrap();
    node.store().record(&key, 1).unwrap();

    let client = common::client(&node);
    let start = Instant::now();
    assert_eq!(client.usages("app", "env", "cat", "key", 30).unwrap(), 1);
    assert!(start.elapsed() < Duration::from_secs(4), "read took {:?}", start.elapsed());

    node.shutdown();
    drop(silent);
}
