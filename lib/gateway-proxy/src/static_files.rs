//! Local directory served under a URL prefix

use crate::body::{self, BoxError, ProxyBody};
use crate::chain::Handler;
use crate::prefix::{replace_path, strip_leave_slash};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::debug;

pub struct StaticFiles {
    prefix: String,
    root: PathBuf,
    files: ServeDir,
}

impl StaticFiles {
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            prefix: prefix.into(),
            files: ServeDir::new(&root),
            root,
        }
    }

    pub async fn serve(&self, mut req: Request<ProxyBody>) -> Response<ProxyBody> {
        let Some(path) = strip_leave_slash(&self.prefix, req.uri().path()) else {
            return body::not_found();
        };
        match replace_path(req.uri(), &path) {
            Ok(uri) => *req.uri_mut() = uri,
            Err(_) => return body::not_found(),
        }
        debug!("Serving {} from {}", path, self.root.display());

        // Boxed so the `Handler` future's `Send` bound is checked against
        // the concrete body type rather than the erased generator witness.
        let files: Pin<Box<dyn Future<Output = _> + Send>> = Box::pin(self.files.clone().oneshot(req));
        match files.await {
            Ok(response) => response.map(|b| b.map_err(BoxError::from).boxed_unsync()),
            Err(never) => match never {},
        }
    }
}

#[async_trait::async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        self.serve(req).await
    }
}
