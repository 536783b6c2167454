//! Node identity and peer address parsing.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{PeerError, Result};

/// Random identity of a running node, returned by `GET /_ping`.
///
/// A node that pings a peer and gets its own id back has found itself in the
/// peer list and ignores that entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(Uuid);

impl NodeId {
    /// A fresh random (v4) id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether `text` (as returned by a ping, possibly quoted) is this id.
    pub fn matches(&self, text: &str) -> bool {
        Uuid::parse_str(text.trim().trim_matches('"')).is_ok_and(|id| id == self.0)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A peer's HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl PeerAddr {
    /// `http://host:port`, the base URL for a [`RegisterClient`](crate::client::RegisterClient).
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = PeerError;

    /// Accepts `host:port` and the bracketed `host[port]` form.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = |reason: &str| PeerError::InvalidAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let input_trimmed = input.trim();

        let (host, port) = if let Some(rest) = input_trimmed.strip_suffix(']') {
            rest.split_once('[')
                .ok_or_else(|| invalid("unbalanced brackets"))?
        } else {
            input_trimmed
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port or host[port]"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(&format!("bad port: {e}")))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Parses a comma separated peer list. Blank entries are skipped.
///
/// # Errors
///
/// Returns [`PeerError::InvalidAddress`] for the first malformed entry.
pub fn parse_peer_list(list: &str) -> Result<Vec<PeerAddr>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse::<PeerAddr>().map_err(Into::into))
        .collect()
}
