use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Startup errors. Every variant is fatal: the gateway never serves with a
/// partially applied configuration.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid regular expression {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Owner reference field {0} must not be empty")]
    MissingOwnerField(&'static str),

    #[error("Don't specify both --unix-socket and --port/--address")]
    ConflictingListeners,

    #[error("Invalid path prefix {0:?}: must start with '/'")]
    InvalidPrefix(String),

    #[error("Invalid upstream server: {0}")]
    InvalidUpstream(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
