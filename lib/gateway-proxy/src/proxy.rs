//! Upgrade-aware reverse proxy to the single upstream

use crate::body::{self, ProxyBody};
use crate::chain::Handler;
use crate::error::{ProxyError, ProxyResult};
use crate::headers::{requested_upgrade, strip_hop_by_hop, strip_hop_by_hop_for_upgrade};
use crate::relay::relay;
use crate::transport::{TransportPair, UpstreamTarget};
use http::header::{HeaderValue, HOST};
use http::{StatusCode, Uri, Version};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tracing::{debug, error};

/// Forwards requests to the upstream.
///
/// Ordinary requests go through the pooled round-trip transport and their
/// responses are streamed back. Requests asking for a supported protocol
/// upgrade get a dedicated upstream connection; after a 101 both sockets
/// are handed to [`relay`] and the proxy stops interpreting the bytes.
#[derive(Clone)]
pub struct UpgradeAwareProxy {
    target: Arc<UpstreamTarget>,
    transports: TransportPair,
}

impl UpgradeAwareProxy {
    pub fn new(target: UpstreamTarget, transports: TransportPair) -> Self {
        Self {
            target: Arc::new(target),
            transports,
        }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    pub async fn proxy(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        match requested_upgrade(req.headers()) {
            Some(protocol) => self.upgrade(req, protocol).await,
            None => self.forward(req).await,
        }
    }

    async fn forward(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match self.try_forward(req).await {
            Ok(response) => {
                debug!("{} {} -> {}", method, path, response.status());
                response
            }
            Err(e) => {
                error!("Error proxying {} {}: {}", method, path, e);
                body::internal_error(&e)
            }
        }
    }

    async fn try_forward(&self, req: Request<ProxyBody>) -> ProxyResult<Response<ProxyBody>> {
        let (mut parts, incoming) = req.into_parts();
        parts.uri = self.target.location(parts.uri.path_and_query())?;
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(HOST);

        let response = self
            .transports
            .round_trip
            .send(Request::from_parts(parts, incoming))
            .await?;
        Ok(into_client_response(response))
    }

    async fn upgrade(&self, mut req: Request<ProxyBody>, protocol: &str) -> Response<ProxyBody> {
        let path = req.uri().path().to_string();
        debug!("Upgrading {} {} to {}", req.method(), path, protocol);

        let client_upgrade = hyper::upgrade::on(&mut req);
        let mut response = match self.try_upgrade(req).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error dialing upstream for {}: {}", path, e);
                return body::internal_error(&e);
            }
        };

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            debug!("Upstream declined upgrade of {} with {}", path, response.status());
            return into_client_response(response);
        }

        let upstream_upgrade = hyper::upgrade::on(&mut response);
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client, upstream)) => {
                    relay(TokioIo::new(client), TokioIo::new(upstream)).await;
                }
                Err(e) => {
                    debug!("{}", ProxyError::UpgradeFailed(format!("{}: {}", path, e)));
                }
            }
        });

        let (parts, _) = response.into_parts();
        Response::from_parts(parts, body::empty())
    }

    /// Replay `req` on a fresh upstream connection.
    async fn try_upgrade(&self, req: Request<ProxyBody>) -> ProxyResult<Response<Incoming>> {
        let (mut parts, incoming) = req.into_parts();
        let location = self.target.location(parts.uri.path_and_query())?;
        parts.uri = Uri::from(self.target.request_target(parts.uri.path_and_query())?);
        parts.version = Version::HTTP_11;
        strip_hop_by_hop_for_upgrade(&mut parts.headers);
        let host = HeaderValue::from_str(self.target.authority().as_str())
            .map_err(|e| ProxyError::InvalidUri(e.to_string()))?;
        parts.headers.insert(HOST, host);

        self.transports
            .upgrade
            .handshake(location, Request::from_parts(parts, incoming))
            .await
    }
}

fn into_client_response(response: Response<Incoming>) -> Response<ProxyBody> {
    let (mut parts, incoming) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, body::incoming(incoming))
}

#[async_trait::async_trait]
impl Handler for UpgradeAwareProxy {
    async fn handle(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        self.proxy(req).await
    }
}
