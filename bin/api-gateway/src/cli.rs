//! Command-line flags

use clap::{Args, Parser};
use gateway_core::config::{DEFAULT_API_PREFIX, DEFAULT_STATIC_PREFIX};
use gateway_core::policy::{
    DEFAULT_HOST_ACCEPT_RE, DEFAULT_METHOD_REJECT_RE, DEFAULT_PATH_ACCEPT_RE,
    DEFAULT_PATH_REJECT_RE,
};
use gateway_core::{FilterPolicy, GatewayConfig, ListenTarget, OwnerReference};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version)]
#[command(about = "Run a proxy to the Kubernetes API server", long_about = None)]
pub struct Cli {
    /// Also serve static files from the given directory under the static prefix
    #[arg(short = 'w', long = "www")]
    pub www: Option<PathBuf>,

    /// Prefix to serve static files under, if a static file directory is set
    #[arg(short = 'P', long = "www-prefix", default_value = DEFAULT_STATIC_PREFIX)]
    pub www_prefix: String,

    /// Prefix to serve the proxied API under
    #[arg(long, default_value = DEFAULT_API_PREFIX)]
    pub api_prefix: String,

    /// Regular expressions for paths the proxy should accept
    #[arg(long, default_value = DEFAULT_PATH_ACCEPT_RE)]
    pub accept_paths: String,

    /// Regular expressions for paths the proxy should reject, even if
    /// accepted by --accept-paths
    #[arg(long, default_value = DEFAULT_PATH_REJECT_RE)]
    pub reject_paths: String,

    /// Regular expressions for hosts the proxy should accept
    #[arg(long, default_value = DEFAULT_HOST_ACCEPT_RE)]
    pub accept_hosts: String,

    /// Regular expressions for HTTP methods the proxy should reject
    /// (example: --reject-methods='POST,PUT,PATCH')
    #[arg(long, default_value = DEFAULT_METHOD_REJECT_RE)]
    pub reject_methods: String,

    /// Disable request filtering. This is dangerous and can leave you
    /// vulnerable to XSRF attacks when used with an accessible port
    #[arg(long)]
    pub disable_filter: bool,

    /// Port to listen on [default: 8001]. 0 picks a random port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// IP address to listen on [default: 127.0.0.1]
    #[arg(long)]
    pub address: Option<String>,

    /// Unix socket to listen on instead of TCP
    #[arg(short = 'u', long)]
    pub unix_socket: Option<PathBuf>,

    #[command(flatten)]
    pub upstream: UpstreamFlags,

    #[command(flatten)]
    pub owner: OwnerFlags,
}

/// Where the API server is and how to authenticate to it.
#[derive(Args, Debug, Default)]
pub struct UpstreamFlags {
    /// Path to the kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// API server URL; skips kubeconfig discovery
    #[arg(long)]
    pub server: Option<String>,

    /// PEM file with the certificate authority of the API server
    #[arg(long)]
    pub certificate_authority: Option<PathBuf>,

    /// PEM file with the client certificate
    #[arg(long)]
    pub client_certificate: Option<PathBuf>,

    /// PEM file with the client key
    #[arg(long)]
    pub client_key: Option<PathBuf>,

    /// Bearer token for the API server
    #[arg(long)]
    pub token: Option<String>,

    /// Server name to verify the API server certificate against
    #[arg(long)]
    pub tls_server_name: Option<String>,

    /// Do not verify the API server certificate
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,
}

/// Owner injected into every created object. Any of these enables
/// ownership mode, which then requires all four.
#[derive(Args, Debug, Default)]
pub struct OwnerFlags {
    #[arg(long)]
    pub owner_api_version: Option<String>,

    #[arg(long)]
    pub owner_kind: Option<String>,

    #[arg(long)]
    pub owner_name: Option<String>,

    #[arg(long)]
    pub owner_uid: Option<String>,
}

impl OwnerFlags {
    pub fn owner(&self) -> gateway_core::Result<Option<OwnerReference>> {
        let fields = [
            &self.owner_api_version,
            &self.owner_kind,
            &self.owner_name,
            &self.owner_uid,
        ];
        if fields.iter().all(|f| f.is_none()) {
            return Ok(None);
        }
        OwnerReference::new(
            self.owner_api_version.clone().unwrap_or_default(),
            self.owner_kind.clone().unwrap_or_default(),
            self.owner_name.clone().unwrap_or_default(),
            self.owner_uid.clone().unwrap_or_default(),
        )
        .map(Some)
    }
}

impl Cli {
    pub fn filter(&self) -> gateway_core::Result<Option<FilterPolicy>> {
        if self.disable_filter {
            return Ok(None);
        }
        FilterPolicy::from_patterns(
            &self.accept_paths,
            &self.reject_paths,
            &self.accept_hosts,
            &self.reject_methods,
        )
        .map(Some)
    }

    pub fn gateway_config(&self) -> gateway_core::Result<GatewayConfig> {
        let listen = ListenTarget::from_flags(
            self.address.clone(),
            self.port,
            self.unix_socket.clone(),
        )?;
        Ok(GatewayConfig::new(listen, &self.api_prefix, &self.www_prefix)?
            .with_static_dir(self.www.clone())
            .with_filter(self.filter()?)
            .with_owner(self.owner.owner()?))
    }
}

/// Warn about a static directory that cannot be served. Startup continues.
pub fn check_static_dir(dir: &Path) {
    match std::fs::metadata(dir) {
        Err(e) => warn!("Failed to stat static file directory {}: {}", dir.display(), e),
        Ok(meta) if !meta.is_dir() => {
            warn!("Static file directory {} is not a directory", dir.display())
        }
        Ok(_) => {}
    }
}
