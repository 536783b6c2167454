//! Error types for the tally usage counter store.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all tally operations.
///
/// Validation failures ([`KeyError`]) are the caller's fault and should never
/// be retried. Everything else describes an environmental failure.
#[derive(Error, Debug)]
pub enum TallyError {
    /// A usage key component failed validation.
    #[error("invalid usage key: {0}")]
    Key(#[from] KeyError),

    /// Filesystem failure inside the counter store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Compaction of a single key failed.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// HTTP client failure talking to a remote node.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Peer configuration is invalid.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// A write was attempted through a repository that only supports reads.
    #[error("repository is read-only")]
    ReadOnly,
}

/// Errors raised while validating the components of a usage key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The component is the empty string.
    #[error("{component} may not be empty")]
    Empty {
        /// Which component failed (`app`, `env`, `category`, `key`).
        component: &'static str,
    },

    /// The component contains a path-unsafe character.
    #[error("{component} '{value}' may not contain any of {illegal}")]
    IllegalCharacters {
        /// Which component failed.
        component: &'static str,
        /// The rejected value.
        value: String,
        /// The set of characters that are never allowed.
        illegal: &'static str,
    },

    /// The component is `.` or `..`.
    #[error("{component} must not equal '.' or '..'")]
    Navigational {
        /// Which component failed.
        component: &'static str,
    },
}

/// Errors that can occur while reading or writing the on-disk layout.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A directory could not be created.
    #[error("failed to create directory '{}': {source}", path.display())]
    CreateDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A directory could not be listed.
    #[error("failed to list '{}': {source}", path.display())]
    List {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A count or series file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A count or series file could not be written.
    #[error("failed to write '{}': {source}", path.display())]
    Write {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A merged daily file could not be removed.
    #[error("failed to delete '{}': {source}", path.display())]
    Delete {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A daily file does not hold an ASCII decimal count.
    #[error("daily file '{}' holds '{content}', expected a decimal count", path.display())]
    CorruptCount {
        /// The file path.
        path: PathBuf,
        /// The (trimmed) file content.
        content: String,
    },

    /// A line of a compacted series file could not be parsed.
    #[error("compacted series '{}' has malformed line '{line}'", path.display())]
    CorruptSeries {
        /// The series file path.
        path: PathBuf,
        /// The offending line.
        line: String,
    },
}

/// A compaction pass over one key failed; other keys are unaffected.
#[derive(Error, Debug)]
#[error("compaction of {key} failed: {source}")]
pub struct CompactionError {
    /// The `app/env/category/key` path of the series.
    pub key: String,
    /// The store failure that aborted the pass.
    #[source]
    pub source: StoreError,
}

/// Errors from the blocking HTTP client used for peers and batch writes.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The base URL could not be parsed.
    #[error("invalid base url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Failed to build the HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The request could not be sent or timed out.
    #[error("HTTP request to {url} failed: {source}")]
    RequestFailed {
        /// The request URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{url} returned status {status}: {body}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },

    /// The response body was not the expected JSON.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// The request URL.
        url: String,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors in the peer list configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// A peer entry is not `host:port` or `host[port]`.
    #[error("invalid peer address '{input}': {reason}")]
    InvalidAddress {
        /// The rejected entry.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result of the low-level file helpers, before conversion into [`TallyError`].
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for `Result<T, TallyError>`.
pub type Result<T> = std::result::Result<T, TallyError>;
