//! TLS material for the upstream connection

use crate::error::{ProxyError, ProxyResult};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use rustls_pemfile::certs;
use std::io::BufReader;
use std::sync::Arc;
use tracing::debug;

/// ALPN offered on pooled round-trip connections.
pub const ALPN_ROUND_TRIP: &[&[u8]] = &[b"h2", b"http/1.1"];
/// ALPN offered on upgrade connections: HTTP/1.1 only, since the upgraded
/// socket is handed over raw after the handshake.
pub const ALPN_UPGRADE: &[&[u8]] = &[b"http/1.1"];

/// Install ring as the process-wide rustls provider. Safe to call twice.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }
}

/// Load certificates from PEM-encoded data
pub fn load_certificates(pem_data: &[u8]) -> ProxyResult<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem_data);
    let parsed = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("Failed to parse certificates: {}", e)))?;
    if parsed.is_empty() {
        return Err(ProxyError::Tls("No certificates found in PEM data".into()));
    }
    Ok(parsed)
}

/// Server name presented during the handshake. Bracketed IPv6 hosts, as
/// they appear in URIs, are accepted.
pub fn server_name(host: &str) -> ProxyResult<ServerName<'static>> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {}", host)))
}

/// Clone `base` with a fixed ALPN list.
pub fn with_alpn(base: &ClientConfig, protocols: &[&[u8]]) -> Arc<ClientConfig> {
    let mut config = base.clone();
    config.alpn_protocols = protocols.iter().map(|p| p.to_vec()).collect();
    Arc::new(config)
}
