//! Prefix router in front of the API pipeline and the static file handler

use gateway_proxy::body::{self, ProxyBody};
use gateway_proxy::Handler;
use http::{Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Routes each request to the handler with the longest matching prefix.
pub struct Router {
    /// Sorted longest prefix first.
    routes: Vec<(String, Arc<dyn Handler>)>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Mount `handler` under `prefix`. A later route with the same prefix
    /// replaces the earlier one.
    pub fn route(mut self, prefix: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let prefix = prefix.into();
        self.routes.retain(|(p, _)| *p != prefix);
        self.routes.push((prefix, handler));
        self.routes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        self
    }

    /// Match a request path against the mounted prefixes
    pub fn match_path(&self, path: &str) -> Option<(&str, &Arc<dyn Handler>)> {
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(prefix, handler)| (prefix.as_str(), handler))
    }

    pub fn prefixes(&self) -> Vec<&str> {
        self.routes.iter().map(|(p, _)| p.as_str()).collect()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Handler for Router {
    async fn handle(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        match self.match_path(req.uri().path()) {
            Some((prefix, handler)) => {
                debug!("{} {} routed to {}", req.method(), req.uri().path(), prefix);
                handler.handle(req).await
            }
            None => {
                debug!("No route for {}", req.uri().path());
                body::not_found()
            }
        }
    }
}
