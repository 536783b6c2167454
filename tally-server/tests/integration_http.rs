//! End-to-end tests of a single node over real sockets.

mod common;

use std::collections::{BTreeMap, HashMap};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tally::DEFAULT_DAYS;
use tempfile::tempdir;

#[test]
fn test_register_and_read_back() {
    let dir = tempdir().unwrap();
    let node = common::node(dir.path(), Vec::new());
    let client = common::client(&node);

    for _ in 0..8 {
        client.record_usage("test-app", "prod", "simple", "7").unwrap();
    }
    client.record_usage("test-app", "prod", "simple", "bandit").unwrap();
    client.record_usage("test-app", "prod", "simple", "bandit").unwrap();

    let mut bulk = HashMap::new();
    bulk.insert(
        "simple".to_string(),
        HashMap::from([("bandit".to_string(), 100)]),
    );
    bulk.insert(
        "other".to_string(),
        HashMap::from([("x".to_string(), 3)]),
    );
    client.post_batch("test-app", "prod", &bulk).unwrap();

    assert!(client.ping().unwrap().len() >= 32);
    assert_eq!(client.apps().unwrap(), vec!["test-app"]);
    assert_eq!(client.environments("test-app").unwrap(), vec!["prod"]);
    assert_eq!(
        client.categories("test-app", "prod").unwrap(),
        vec!["other", "simple"]
    );
    assert_eq!(
        client.keys("test-app", "prod", "simple").unwrap(),
        vec!["7", "bandit"]
    );

    let all = client.all_usages("test-app", "prod", "simple", DEFAULT_DAYS).unwrap();
    assert_eq!(all["7"], 8);
    assert_eq!(all["bandit"], 102);
    assert_eq!(client.usages("test-app", "prod", "other", "x", 1).unwrap(), 3);

    let by_date = client
        .usages_by_date("test-app", "prod", "simple", "bandit", 7)
        .unwrap();
    assert_eq!(by_date.len(), 7);
    assert_eq!(by_date.values().sum::<u64>(), 102);

    node.shutdown();
}

#[test]
fn test_health_and_status_codes() {
    let dir = tempdir().unwrap();
    let node = common::node(dir.path(), Vec::new());
    let base = common::base_url(&node);
    let http = Client::new();

    let health = http.get(format!("{base}/health")).send().unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().unwrap(), r#""UP""#);

    let created = http.post(format!("{base}/a/b/c/d")).send().unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let bad_days = http.get(format!("{base}/a/b/c/d?days=x")).send().unwrap();
    assert_eq!(bad_days.status(), StatusCode::BAD_REQUEST);

    let bad_body = http
        .post(format!("{base}/a/b/c"))
        .body("{not json")
        .send()
        .unwrap();
    assert_eq!(bad_body.status(), StatusCode::BAD_REQUEST);

    let missing = http.get(format!("{base}/a/b/c/d/e")).send().unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let stats: Vec<serde_json::Value> = http
        .get(format!("{base}/_stats"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(stats.iter().any(|row| row["req"] == "POST /:app/:env/:cat/:key"));

    node.shutdown();
}

#[test]
fn test_counts_survive_restart() {
    let dir = tempdir().unwrap();

    let node = common::node(dir.path(), Vec::new());
    let client = common::client(&node);
    for _ in 0..5 {
        client.record_usage("app", "env", "cat", "key").unwrap();
    }
    node.shutdown();

    let node = common::node(dir.path(), Vec::new());
    let client = common::client(&node);
    assert_eq!(client.usages("app", "env", "cat", "key", 1).unwrap(), 5);

    let by_date: BTreeMap<String, u64> = client
        .usages_by_date("app", "env", "cat", "key", DEFAULT_DAYS)
        .unwrap();
    assert_eq!(by_date.len(), DEFAULT_DAYS as usize);
    node.shutdown();
}
