//! Error types for per-request proxy operations.
//!
//! None of these terminate the process: before a response is committed
//! they become an HTTP 500, afterwards the connection is closed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Pooled round-trip request to the upstream failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// HTTP protocol error on a dedicated connection.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid upstream URI: {0}")]
    InvalidUri(String),

    #[error("invalid credentials: {0}")]
    Auth(String),

    #[error("HTTP upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Reading a request body failed.
    #[error("failed to read request body: {0}")]
    Body(String),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<http::uri::InvalidUri> for ProxyError {
    fn from(err: http::uri::InvalidUri) -> Self {
        ProxyError::InvalidUri(err.to_string())
    }
}

impl From<http::Error> for ProxyError {
    fn from(err: http::Error) -> Self {
        ProxyError::InvalidUri(err.to_string())
    }
}
