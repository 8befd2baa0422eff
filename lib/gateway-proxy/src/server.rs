//! Listener and connection loop

use crate::body;
use crate::chain::Handler;
use gateway_core::ListenTarget;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, info};

/// A bound listening socket.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    pub async fn bind(target: &ListenTarget) -> io::Result<Self> {
        match target {
            ListenTarget::Tcp { address, port } => {
                let listener = TcpListener::bind((address.as_str(), *port)).await?;
                Ok(Listener::Tcp(listener))
            }
            #[cfg(unix)]
            ListenTarget::Unix(path) => Ok(Listener::Unix(UnixListener::bind(path)?)),
            #[cfg(not(unix))]
            ListenTarget::Unix(path) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unix sockets are not supported here: {}", path.display()),
            )),
        }
    }

    /// The TCP address actually bound, with the ephemeral port resolved.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(_) => None,
        }
    }

    /// Printable address of the bound socket.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let addr = listener.local_addr()?;
                Ok(addr
                    .as_pathname()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(unnamed)".to_string()))
            }
        }
    }
}

/// Accept connections forever, one task per connection. Returns only when
/// accepting fails.
pub async fn serve(listener: Listener, handler: Arc<dyn Handler>) -> io::Result<()> {
    info!("Accepting connections on {}", listener.local_addr()?);
    loop {
        match &listener {
            Listener::Tcp(tcp) => {
                let (stream, peer) = tcp.accept().await?;
                spawn_connection(stream, peer.to_string(), handler.clone());
            }
            #[cfg(unix)]
            Listener::Unix(unix) => {
                let (stream, _) = unix.accept().await?;
                spawn_connection(stream, "unix socket".to_string(), handler.clone());
            }
        }
    }
}

fn spawn_connection<S>(stream: S, peer: String, handler: Arc<dyn Handler>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::task::spawn(async move {
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req.map(body::incoming)).await) }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await
        {
            debug!("Error serving connection from {}: {}", peer, e);
        }
    });
}
