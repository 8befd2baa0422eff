//! TCP + rustls connector for the upstream server

use crate::error::{ProxyError, ProxyResult};
use crate::tls;
use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tower::{Service, ServiceExt};
use tracing::debug;

/// Connects to the upstream over plain TCP or TLS depending on the URI
/// scheme. Cloning is cheap; clones share the TLS configuration.
#[derive(Clone)]
pub struct UpstreamConnector {
    http: HttpConnector,
    tls: Option<TlsConnector>,
    /// Overrides the name taken from the URI host.
    server_name: Option<ServerName<'static>>,
}

impl UpstreamConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(connect_timeout);
        http.set_keepalive(Some(Duration::from_secs(30)));

        Self {
            http,
            tls: None,
            server_name: None,
        }
    }

    pub fn with_tls(
        mut self,
        config: Arc<ClientConfig>,
        server_name: Option<ServerName<'static>>,
    ) -> Self {
        self.tls = Some(TlsConnector::from(config));
        self.server_name = server_name;
        self
    }

    /// Open a new connection to the authority of `uri`.
    pub async fn connect(&self, uri: Uri) -> ProxyResult<UpstreamStream> {
        let tcp = self
            .http
            .clone()
            .oneshot(uri.clone())
            .await
            .map_err(io::Error::other)?
            .into_inner();

        if uri.scheme_str() != Some("https") {
            debug!("Connected to upstream {} over plain TCP", uri);
            return Ok(UpstreamStream::Plain(TokioIo::new(tcp)));
        }

        let connector = self
            .tls
            .as_ref()
            .ok_or_else(|| ProxyError::Tls("https upstream requires a TLS configuration".into()))?;
        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => tls::server_name(uri.host().unwrap_or_default())?,
        };

        let stream = connector
            .connect(name, tcp)
            .await
            .map_err(|e| ProxyError::Tls(format!("handshake with upstream failed: {}", e)))?;
        debug!(
            "TLS established with upstream {} (alpn: {:?})",
            uri,
            stream.get_ref().1.alpn_protocol().map(String::from_utf8_lossy)
        );
        Ok(UpstreamStream::Tls(Box::new(TokioIo::new(stream))))
    }
}

impl Service<Uri> for UpstreamConnector {
    type Response = UpstreamStream;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = ProxyResult<UpstreamStream>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.connect(uri).await })
    }
}

/// A connection to the upstream, with or without TLS.
pub enum UpstreamStream {
    Plain(TokioIo<TcpStream>),
    Tls(Box<TokioIo<TlsStream<TcpStream>>>),
}

impl Connection for UpstreamStream {
    fn connected(&self) -> Connected {
        match self {
            UpstreamStream::Plain(_) => Connected::new(),
            UpstreamStream::Tls(stream) => {
                let (_, session) = stream.inner().get_ref();
                if session.alpn_protocol() == Some(&b"h2"[..]) {
                    Connected::new().negotiated_h2()
                } else {
                    Connected::new()
                }
            }
        }
    }
}

impl Read for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl Write for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_flush(cx),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            UpstreamStream::Plain(s) => s.is_write_vectored(),
            UpstreamStream::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            UpstreamStream::Tls(s) => Pin::new(&mut **s).poll_write_vectored(cx, bufs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let connector = UpstreamConnector::new(Some(Duration::from_secs(5)));
        let uri: Uri = format!("http://{}/", addr).parse().unwrap();
        let stream = connector.connect(uri).await.expect("plain connect");
        assert!(matches!(stream, UpstreamStream::Plain(_)));
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_https_without_tls_config_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let connector = UpstreamConnector::new(None);
        let uri: Uri = format!("https://{}/", addr).parse().unwrap();
        let err = connector.connect(uri).await.err().expect("should fail");
        assert!(matches!(err, ProxyError::Tls(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = UpstreamConnector::new(Some(Duration::from_secs(5)));
        let uri: Uri = format!("http://{}/", addr).parse().unwrap();
        let err = connector.connect(uri).await.err().expect("should fail");
        assert!(matches!(err, ProxyError::Io(_)));
    }
}
