//! Route table of a tally node.
//!
//! | Method | Path                     | Response                                   |
//! |--------|--------------------------|--------------------------------------------|
//! | GET    | `/_ping`                 | node id, `text/plain`                      |
//! | GET    | `/_stats`                | per-route timing rows                      |
//! | GET    | `/health`                | `"UP"`, or `"DOWN"` with 503               |
//! | GET    | `/`                      | apps                                       |
//! | GET    | `/:app`                  | environments                               |
//! | GET    | `/:app/:env`             | categories                                 |
//! | GET    | `/:app/:env/:cat`        | `{key: sum}`, or keys with `keys=true`     |
//! | GET    | `/:app/:env/:cat/:key`   | sum, or `{YYYYMMDD: count}` with `by_date` |
//! | POST   | `/:app/:env`             | body `{cat: {key: n}}`, 201                |
//! | POST   | `/:app/:env/:cat`        | body `{key: n}`, 201                       |
//! | POST   | `/:app/:env/:cat/:key`   | one usage, 201                             |
//!
//! Reads take `days` (default 30). A request carrying `X-From-Peer: true`
//! is answered from local data only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tally::client::PEER_HEADER;
use tally::error::TallyError;
use tally::{DEFAULT_DAYS, NodeId, Origin, UsageKey, UsageQuery, UsageRepository};
use thiserror::Error;

use crate::http::{Request, Response};
use crate::stats::RouteStats;

/// Largest accepted `days` (about a century).
pub const MAX_DAYS: u32 = 36_600;

/// Why a request was not served.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Unparseable parameter or body.
    #[error("{0}")]
    BadRequest(String),

    /// No route matches.
    #[error("not found")]
    NotFound,

    /// The repository refused or failed.
    #[error(transparent)]
    Tally(#[from] TallyError),
}

impl ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => Response::error(400, &message),
            Self::NotFound => Response::error(404, "not found"),
            Self::Tally(TallyError::Key(e)) => Response::error(400, &e.to_string()),
            Self::Tally(TallyError::ReadOnly) => Response::error(405, "repository is read-only"),
            Self::Tally(e) => {
                tracing::error!(error = %e, "request failed");
                Response::error(500, &e.to_string())
            }
        }
    }
}

type Handled = (Option<&'static str>, Result<Response, ApiError>);

/// Dispatches requests to a [`UsageRepository`].
pub struct Router {
    repo: Arc<dyn UsageRepository>,
    node_id: NodeId,
    stats: RouteStats,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Serves `repo`, answering pings with `node_id`.
    pub fn new(repo: Arc<dyn UsageRepository>, node_id: NodeId) -> Self {
        Self {
            repo,
            node_id,
            stats: RouteStats::default(),
        }
    }

    /// The id returned by `/_ping`.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Handles one request. Timing is recorded under the route pattern only
    /// for requests that were served successfully.
    pub fn handle(&self, req: &Request) -> Response {
        let start = Instant::now();
        let (route, result) = self.dispatch(req);
        if let (Some(route), Ok(_)) = (route, &result) {
            self.stats.record(route, start.elapsed());
        }

        let response = result.unwrap_or_else(ApiError::into_response);
        tracing::debug!(
            method = %req.method,
            path = %req.segments.join("/"),
            status = response.status,
            "handled request"
        );
        response
    }

    fn dispatch(&self, req: &Request) -> Handled {
        let segments: Vec<&str> = req.segments.iter().map(String::as_str).collect();

        match (req.method.as_str(), segments.as_slice()) {
            ("GET", &["_ping"]) => (
                Some("GET /_ping"),
                Ok(Response::text(200, self.node_id.to_string())),
            ),
            ("GET", &["_stats"]) => (
                Some("GET /_stats"),
                Ok(Response::json(200, &self.stats.snapshot())),
            ),
            ("GET", &["health"]) => (Some("GET /health"), Ok(self.health())),
            ("GET", &[]) => (Some("GET /"), self.list(self.repo.list_apps())),
            ("GET", &[app]) => (Some("GET /:app"), self.list(self.repo.list_environments(app))),
            ("GET", &[app, env]) => (
                Some("GET /:app/:env"),
                self.list(self.repo.list_categories(app, env)),
            ),
            ("GET", &[app, env, category]) => (
                Some("GET /:app/:env/:cat"),
                self.category_usages(req, app, env, category),
            ),
            ("GET", &[app, env, category, key]) => (
                Some("GET /:app/:env/:cat/:key"),
                self.key_usages(req, app, env, category, key),
            ),
            ("POST", &[app, env]) => (Some("POST /:app/:env"), self.post_env(req, app, env)),
            ("POST", &[app, env, category]) => (
                Some("POST /:app/:env/:cat"),
                self.post_category(req, app, env, category),
            ),
            ("POST", &[app, env, category, key]) => (
                Some("POST /:app/:env/:cat/:key"),
                self.post_key(app, env, category, key),
            ),
            _ => (None, Err(ApiError::NotFound)),
        }
    }

    fn health(&self) -> Response {
        match self.repo.list_apps() {
            Ok(_) => Response::json(200, "UP"),
            Err(e) => {
                tracing::warn!(error = %e, "health check failed");
                Response::json(503, "DOWN")
            }
        }
    }

    fn list(&self, names: tally::Result<Vec<String>>) -> Result<Response, ApiError> {
        Ok(Response::json(200, &names?))
    }

    fn category_usages(
        &self,
        req: &Request,
        app: &str,
        env: &str,
        category: &str,
    ) -> Result<Response, ApiError> {
        let keys = self.repo.list_keys(app, env, category)?;
        if flag(req, "keys") {
            return Ok(Response::json(200, &keys));
        }

        let days = days(req)?;
        let origin = origin(req);
        let mut usages = BTreeMap::new();
        for name in keys {
            let key = UsageKey::new(app, env, category, name.as_str())?;
            let sum = self.repo.sum_usages(&query(key, days, origin))?;
            usages.insert(name, sum);
        }
        Ok(Response::json(200, &usages))
    }

    fn key_usages(
        &self,
        req: &Request,
        app: &str,
        env: &str,
        category: &str,
        key: &str,
    ) -> Result<Response, ApiError> {
        let query = query(UsageKey::new(app, env, category, key)?, days(req)?, origin(req));
        if flag(req, "by_date") {
            Ok(Response::json(200, &self.repo.usages_by_date(&query)?))
        } else {
            Ok(Response::json(200, &self.repo.sum_usages(&query)?))
        }
    }

    fn post_env(&self, req: &Request, app: &str, env: &str) -> Result<Response, ApiError> {
        let body: HashMap<String, HashMap<String, u64>> = parse_body(req)?;

        let mut writes = Vec::new();
        for (category, keys) in body {
            for (key, count) in keys {
                writes.push((UsageKey::new(app, env, category.as_str(), key)?, count));
            }
        }
        self.record_all(writes)
    }

    fn post_category(
        &self,
        req: &Request,
        app: &str,
        env: &str,
        category: &str,
    ) -> Result<Response, ApiError> {
        let body: HashMap<String, u64> = parse_body(req)?;

        let writes = body
            .into_iter()
            .map(|(key, count)| Ok((UsageKey::new(app, env, category, key)?, count)))
            .collect::<tally::Result<Vec<_>>>()?;
        self.record_all(writes)
    }

    fn post_key(&self, app: &str, env: &str, category: &str, key: &str) -> Result<Response, ApiError> {
        self.record_all(vec![(UsageKey::new(app, env, category, key)?, 1)])
    }

    /// Every key of a request is validated before the first write.
    fn record_all(&self, writes: Vec<(UsageKey, u64)>) -> Result<Response, ApiError> {
        for (key, count) in &writes {
            self.repo.record(key, *count)?;
        }
        Ok(Response::empty(201))
    }
}

fn query(key: UsageKey, days: u32, origin: Origin) -> UsageQuery {
    let query = UsageQuery::new(key, days);
    match origin {
        Origin::Peer => query.from_peer(),
        Origin::Client => query,
    }
}

fn origin(req: &Request) -> Origin {
    match req.header(PEER_HEADER) {
        Some(value) if value.eq_ignore_ascii_case("true") => Origin::Peer,
        _ => Origin::Client,
    }
}

fn flag(req: &Request, name: &str) -> bool {
    req.param(name) == Some("true")
}

fn days(req: &Request) -> Result<u32, ApiError> {
    let Some(raw) = req.param("days") else {
        return Ok(DEFAULT_DAYS);
    };
    match raw.parse::<u32>() {
        Ok(days) if days <= MAX_DAYS => Ok(days),
        _ => Err(ApiError::BadRequest(format!(
            "days must be an integer between 0 and {MAX_DAYS}, got '{raw}'"
        ))),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(req: &Request) -> Result<T, ApiError> {
    serde_json::from_slice(&req.body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}
