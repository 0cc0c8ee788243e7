//! Error types shared by the reporter crates.
//!
//! Remote-communication failures and wait timeouts are recoverable by
//! contract: callers log them and keep reporting. Only configuration errors
//! are allowed to stop a binary before the run starts.

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the reporting service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered with a body we could not interpret.
    #[error("unexpected response: {0}")]
    Response(String),

    /// A temp id was used that this client never issued.
    #[error("unknown item {0}")]
    UnknownItem(String),

    /// The item this call depends on was never created remotely.
    #[error("{what} {id} was not created")]
    DependencyFailed { what: &'static str, id: String },

    /// A dependency did not resolve within the wait budget.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// Failure injected by a test double.
    #[error("{0}")]
    Injected(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A poll loop gave up before its condition held.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("gave up waiting for {label} after {waited:?}")]
pub struct WaitTimeout {
    pub label: String,
    pub waited: Duration,
}

/// Hook title did not carry any known hook-kind label.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognised hook title: {title}")]
pub struct ClassificationError {
    pub title: String,
}

/// A line of the runner event stream could not be decoded.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("empty event line")]
    Empty,

    #[error("malformed event line {line:?}: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration could not be loaded or is incomplete.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid environment: {0}")]
    Env(String),
}
