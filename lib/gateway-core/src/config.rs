//! Immutable gateway configuration, built once at startup

use crate::{FilterPolicy, GatewayError, OwnerReference, Result};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_API_PREFIX: &str = "/";
pub const DEFAULT_STATIC_PREFIX: &str = "/static/";

/// Where the gateway accepts connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenTarget {
    Tcp { address: String, port: u16 },
    Unix(PathBuf),
}

impl ListenTarget {
    /// Resolve the listener from the optional flag values.
    ///
    /// A Unix socket excludes an explicit address or port; without either,
    /// TCP on the default loopback address and port is used.
    pub fn from_flags(
        address: Option<String>,
        port: Option<u16>,
        unix_socket: Option<PathBuf>,
    ) -> Result<Self> {
        match unix_socket {
            Some(_) if address.is_some() || port.is_some() => Err(GatewayError::ConflictingListeners),
            Some(path) => Ok(ListenTarget::Unix(path)),
            None => Ok(ListenTarget::Tcp {
                address: address.unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
                port: port.unwrap_or(DEFAULT_PORT),
            }),
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, ListenTarget::Unix(_))
    }
}

impl fmt::Display for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenTarget::Tcp { address, port } if address.contains(':') => {
                write!(f, "[{}]:{}", address, port)
            }
            ListenTarget::Tcp { address, port } => write!(f, "{}:{}", address, port),
            ListenTarget::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Ensure a routing prefix starts and ends with a slash.
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    if !prefix.starts_with('/') {
        return Err(GatewayError::InvalidPrefix(prefix.to_string()));
    }
    if prefix.ends_with('/') {
        Ok(prefix.to_string())
    } else {
        Ok(format!("{}/", prefix))
    }
}

/// Everything the gateway needs besides upstream credentials.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub listen: ListenTarget,
    /// Prefix routed to the upstream, always slash-terminated.
    pub api_prefix: String,
    /// Directory served under `static_prefix`, if any.
    pub static_dir: Option<PathBuf>,
    /// Prefix for static files, always slash-terminated.
    pub static_prefix: String,
    /// `None` when filtering was disabled.
    pub filter: Option<FilterPolicy>,
    /// `Some` in ownership mode.
    pub owner: Option<OwnerReference>,
}

impl GatewayConfig {
    pub fn new(listen: ListenTarget, api_prefix: &str, static_prefix: &str) -> Result<Self> {
        Ok(Self {
            listen,
            api_prefix: normalize_prefix(api_prefix)?,
            static_dir: None,
            static_prefix: normalize_prefix(static_prefix)?,
            filter: Some(FilterPolicy::with_defaults()?),
            owner: None,
        })
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    pub fn with_filter(mut self, filter: Option<FilterPolicy>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner = owner;
        self
    }

    /// Upstream paths are rooted at `/api` and `/apis`; any other prefix is
    /// a local mount point that must be removed before forwarding.
    pub fn strips_api_prefix(&self) -> bool {
        !self.api_prefix.starts_with("/api")
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: ListenTarget::Tcp {
                address: DEFAULT_ADDRESS.to_string(),
                port: DEFAULT_PORT,
            },
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            static_dir: None,
            static_prefix: DEFAULT_STATIC_PREFIX.to_string(),
            filter: FilterPolicy::with_defaults().ok(),
            owner: None,
        }
    }
}
