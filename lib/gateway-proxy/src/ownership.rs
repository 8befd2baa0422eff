//! Injects an owner reference into objects created through the gateway

use crate::body::{self, ProxyBody};
use crate::chain::{Flow, Stage};
use crate::error::ProxyError;
use gateway_core::OwnerReference;
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::Request;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Largest `POST` body buffered for rewriting, matching the API server's
/// own request size limit.
pub const MAX_BODY_BYTES: usize = 3 * 1024 * 1024;

/// Rewrites `POST` bodies so the created object points back at `owner`.
///
/// Bodies that are not JSON objects are forwarded untouched; the upstream
/// is left to reject them. Bodies over the limit get a 413.
pub struct OwnershipRewriter {
    owner: OwnerReference,
    limit: usize,
}

impl OwnershipRewriter {
    pub fn new(owner: OwnerReference) -> Self {
        Self {
            owner,
            limit: MAX_BODY_BYTES,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// The rewritten body, or `None` when `raw` should pass through as is.
    pub fn rewrite(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let mut object: Value = serde_json::from_slice(raw).ok()?;
        if !self.owner.append_to(&mut object) {
            return None;
        }
        serde_json::to_vec(&object).ok()
    }
}

#[async_trait::async_trait]
impl Stage for OwnershipRewriter {
    fn name(&self) -> &'static str {
        "ownership-rewriter"
    }

    async fn on_request(&self, req: Request<ProxyBody>) -> Flow {
        if req.method() != Method::POST {
            return Flow::Continue(req);
        }

        let (mut parts, incoming) = req.into_parts();
        // Boxed so the `Stage` future's `Send` bound is checked against the
        // concrete body type rather than the erased generator witness.
        let collect: Pin<Box<dyn Future<Output = _> + Send>> =
            Box::pin(Limited::new(incoming, self.limit).collect());
        let raw = match collect.await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                debug!("Body of {} exceeds {} bytes", parts.uri.path(), self.limit);
                return Flow::Respond(body::text_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large",
                ));
            }
            Err(e) => {
                warn!("Failed to read body of {} {}: {}", parts.method, parts.uri.path(), e);
                return Flow::Respond(body::internal_error(&ProxyError::Body(e.to_string())));
            }
        };

        let forwarded = match self.rewrite(&raw) {
            Some(rewritten) => {
                debug!(
                    "Added owner {}/{} to {}",
                    self.owner.kind(),
                    self.owner.name(),
                    parts.uri.path()
                );
                Bytes::from(rewritten)
            }
            None => {
                debug!("Body of {} is not an object, forwarding unchanged", parts.uri.path());
                raw
            }
        };

        parts.headers.remove(TRANSFER_ENCODING);
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(forwarded.len()));
        Flow::Continue(Request::from_parts(parts, body::full(forwarded)))
    }
}
