//! Error types for probes and notification channels.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for notification delivery.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Why a single reachability check failed.
///
/// Every variant is a normal check outcome, never a fatal error.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddress(String),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("http request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),
}

/// Errors returned by a notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] ProbeError),

    #[error("endpoint rejected notification with status {0}")]
    Rejected(http::StatusCode),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// The executor refused new work because it has been closed.
#[derive(Debug, Error)]
#[error("executor closed")]
pub struct ExecutorClosed;
