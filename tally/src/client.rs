//! Blocking HTTP client for a tally server.
//!
//! Used in three places: peer fan-out in [`ClusterAggregator`], batched
//! writes in [`WriteBatcher`], and the client-backed [`ReadOnlyRepository`].
//!
//! [`ClusterAggregator`]: crate::cluster::ClusterAggregator
//! [`WriteBatcher`]: crate::batch::WriteBatcher
//!
//! # Example
//!
//! ```rust,no_run
//! use tally::client::{ClientConfig, RegisterClient};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RegisterClient::new(ClientConfig::new("http://localhost:4567"))?;
//! client.record_usage("shop", "prod", "pages", "checkout")?;
//! let total = client.usages("shop", "prod", "pages", "checkout", 7)?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::compaction::CompactionReport;
use crate::error::{ClientError, Result, TallyError};
use crate::key::UsageKey;
use crate::repository::{UsageQuery, UsageRepository};

/// Header marking a request as sent by another node of the cluster.
pub const PEER_HEADER: &str = "X-From-Peer";

/// Connection settings for a [`RegisterClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:4567`.
    pub base_url: String,
    /// Timeout applied to every request.
    pub timeout: Duration,
    /// Tag every request with [`PEER_HEADER`].
    pub from_peer: bool,
}

impl ClientConfig {
    /// Defaults: 5s timeout, not peer-tagged.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            from_peer: false,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tags requests as coming from a peer, so the receiving node answers
    /// from its local data only.
    #[must_use]
    pub fn with_peer_tag(mut self) -> Self {
        self.from_peer = true;
        self
    }
}

/// Typed access to the HTTP surface of a tally server.
#[derive(Debug, Clone)]
pub struct RegisterClient {
    http: reqwest::blocking::Client,
    base_url: String,
    from_peer: bool,
}

impl RegisterClient {
    /// Builds a client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if `base_url` is not an absolute
    /// http(s) URL and [`ClientError::ClientCreate`] if the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let parsed = reqwest::Url::parse(&config.base_url).map_err(|e| ClientError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: config.base_url,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            }
            .into());
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::ClientCreate { source: e })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            from_peer: config.from_peer,
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The server's node id, as plain text.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the server is unreachable or answers
    /// with a non-2xx status.
    pub fn ping(&self) -> Result<String> {
        let text = self.get_text(&self.url(&["_ping"], ""))?;
        Ok(text.trim().trim_matches('"').to_string())
    }

    /// Applications known to the server.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] on transport, status, or decode failure.
    pub fn apps(&self) -> Result<Vec<String>> {
        self.get_json(&self.url(&[], ""))
    }

    /// Environments of `app`.
    ///
    /// # Errors
    ///
    /// See [`RegisterClient::apps`].
    pub fn environments(&self, app: &str) -> Result<Vec<String>> {
        self.get_json(&self.url(&[app], ""))
    }

    /// Categories of `app/env`.
    ///
    /// # Errors
    ///
    /// See [`RegisterClient::apps`].
    pub fn categories(&self, app: &str, env: &str) -> Result<Vec<String>> {
        self.get_json(&self.url(&[app, env], ""))
    }

    /// Keys of `app/env/category`.
    ///
    /// # Errors
    ///
    /// See [`RegisterClient::apps`].
    pub fn keys(&self, app: &str, env: &str, category: &str) -> Result<Vec<String>> {
        self.get_json(&self.url(&[app, env, category], "keys=true"))
    }

    /// Total usages of one key over the last `days` days.
    ///
    /// # Errors
    ///
    /// See [`RegisterClient::apps`].
    pub fn usages(&self, app: &str, env: &str, category: &str, key: &str, days: u32) -> Result<u64> {
        self.get_json(&self.url(&[app, env, category, key], &format!("days={days}")))
    }

    /// Usages of one key per `YYYYMMDD` day.
    ///
    /// # Errors
    ///
    /// See [`RegisterClient::apps`].
    pub fn usages_by_date(
        &self,
        app: &str,
        env: &str,
        category: &str,
        key: &str,
        days: u32,
    ) -> Result<BTreeMap<String, u64>> {
        self.get_json(&self.url(
            &[app, env, category, key],
            &format!("by_date=true&days={days}"),
        ))
    }

    /// Total usages of every key in a category.
    ///
    /// # Errors
    ///
    /// See [`RegisterClient::apps`].
    pub fn all_usages(
        &self,
        app: &str,
        env: &str,
        category: &str,
        days: u32,
    ) -> Result<BTreeMap<String, u64>> {
        self.get_json(&self.url(&[app, env, category], &format!("days={days}")))
    }

    /// Records a single usage of one key.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the request fails or is rejected.
    pub fn record_usage(&self, app: &str, env: &str, category: &str, key: &str) -> Result<()> {
        let url = self.url(&[app, env, category, key], "");
        let response = self
            .request(self.http.post(&url))
            .send()
            .map_err(|e| ClientError::RequestFailed {
                url: url.clone(),
                source: e,
            })?;
        check_status(&url, response)?;
        Ok(())
    }

    /// Posts `{category: {key: count}}` for one `app/env` in a single request.
    ///
    /// Any 2xx answer counts as acknowledged.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the request fails or is rejected.
    pub fn post_batch(
        &self,
        app: &str,
        env: &str,
        counts: &HashMap<String, HashMap<String, u64>>,
    ) -> Result<()> {
        let url = self.url(&[app, env], "");
        let response = self
            .request(self.http.post(&url))
            .json(counts)
            .send()
            .map_err(|e| ClientError::RequestFailed {
                url: url.clone(),
                source: e,
            })?;
        check_status(&url, response)?;
        Ok(())
    }

    fn url(&self, segments: &[&str], query: &str) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        if segments.is_empty() {
            url.push('/');
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        if self.from_peer {
            builder.header(PEER_HEADER, "true")
        } else {
            builder
        }
    }

    fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .request(self.http.get(url))
            .send()
            .map_err(|e| ClientError::RequestFailed {
                url: url.to_string(),
                source: e,
            })?;
        let response = check_status(url, response)?;
        response.text().map_err(|e| {
            ClientError::RequestFailed {
                url: url.to_string(),
                source: e,
            }
            .into()
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body).map_err(|e| {
            ClientError::Decode {
                url: url.to_string(),
                source: e,
            }
            .into()
        })
    }
}

fn check_status(
    url: &str,
    response: reqwest::blocking::Response,
) -> std::result::Result<reqwest::blocking::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ClientError::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// A repository that reads through a remote server and refuses writes.
///
/// Lets tools inspect a running node with the same interface as a local
/// [`CounterStore`](crate::store::CounterStore).
#[derive(Debug, Clone)]
pub struct ReadOnlyRepository {
    client: RegisterClient,
}

impl ReadOnlyRepository {
    /// Wraps a client.
    pub fn new(client: RegisterClient) -> Self {
        Self { client }
    }
}

impl UsageRepository for ReadOnlyRepository {
    fn record_usages(&self, _key: &UsageKey, _amount: u64, _date: NaiveDate) -> Result<()> {
        Err(TallyError::ReadOnly)
    }

    fn list_apps(&self) -> Result<Vec<String>> {
        self.client.apps()
    }

    fn list_environments(&self, app: &str) -> Result<Vec<String>> {
        self.client.environments(app)
    }

    fn list_categories(&self, app: &str, env: &str) -> Result<Vec<String>> {
        self.client.categories(app, env)
    }

    fn list_keys(&self, app: &str, env: &str, category: &str) -> Result<Vec<String>> {
        self.client.keys(app, env, category)
    }

    fn sum_usages(&self, query: &UsageQuery) -> Result<u64> {
        let [app, env, category, key] = query.key.components();
        self.client.usages(app, env, category, key, query.days)
    }

    fn usages_by_date(&self, query: &UsageQuery) -> Result<BTreeMap<String, u64>> {
        let [app, env, category, key] = query.key.components();
        self.client.usages_by_date(app, env, category, key, query.days)
    }

    fn run_compaction(&self) -> Result<CompactionReport> {
        Err(TallyError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RegisterClient {
        RegisterClient::new(ClientConfig::new(base)).unwrap()
    }

    #[test]
    fn test_url_building() {
        let c = client("http://localhost:4567/");
        assert_eq!(c.base_url(), "http://localhost:4567");
        assert_eq!(c.url(&[], ""), "http://localhost:4567/");
        assert_eq!(c.url(&["_ping"], ""), "http://localhost:4567/_ping");
        assert_eq!(
            c.url(&["app", "env", "cat"], "keys=true"),
            "http://localhost:4567/app/env/cat?keys=true"
        );
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let c = client("http://localhost:4567");
        assert_eq!(
            c.url(&["my app", "env", "a&b", "k#1"], "days=7"),
            "http://localhost:4567/my%20app/env/a%26b/k%231?days=7"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(RegisterClient::new(ClientConfig::new("not a url")).is_err());
        assert!(RegisterClient::new(ClientConfig::new("ftp://host:21")).is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("http://peer:4567")
            .with_timeout(Duration::from_millis(250))
            .with_peer_tag();
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert!(config.from_peer);
        assert!(!ClientConfig::new("http://peer:4567").from_peer);
    }

    #[test]
    fn test_unreachable_server_is_an_error() {
        // Port 1 on loopback is never a tally server.
        let c = RegisterClient::new(
            ClientConfig::new("http://127.0.0.1:1").with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let err = c.ping().unwrap_err();
        assert!(matches!(err, TallyError::Client(ClientError::RequestFailed { .. })));
    }

    #[test]
    fn test_read_only_repository_rejects_writes() {
        let repo = ReadOnlyRepository::new(client("http://127.0.0.1:1"));
        let key = UsageKey::new("app", "env", "cat", "key").unwrap();
        assert!(matches!(repo.record(&key, 1), Err(TallyError::ReadOnly)));
        assert!(matches!(repo.run_compaction(), Err(TallyError::ReadOnly)));
    }
}
