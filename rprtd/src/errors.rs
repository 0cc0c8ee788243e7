//! Error types for the relay.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("relay request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("relay answered {status}: {body}")]
    Status { status: u16, body: String },
}
