//! Removes a local mount prefix before a request reaches the upstream

use crate::body::{self, ProxyBody};
use crate::chain::{Flow, Stage};
use crate::error::{ProxyError, ProxyResult};
use http::uri::{PathAndQuery, Uri};
use hyper::Request;
use tracing::debug;

/// Strip `prefix` from `path`, keeping a single leading slash. `None` if
/// `path` is not under `prefix`.
pub fn strip_leave_slash(prefix: &str, path: &str) -> Option<String> {
    let trimmed = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(trimmed)?;
    if rest.is_empty() {
        return Some("/".to_string());
    }
    if !rest.starts_with('/') {
        // "/k8s-apix" is not under "/k8s-api/"
        return None;
    }
    Some(rest.to_string())
}

/// Replace the path of `uri`, keeping scheme, authority and query.
pub fn replace_path(uri: &Uri, path: &str) -> ProxyResult<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>()?);
    Uri::from_parts(parts).map_err(|e| ProxyError::InvalidUri(e.to_string()))
}

/// Stage removing the configured API prefix; requests outside it get 404.
pub struct StripPrefix {
    prefix: String,
}

impl StripPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl Stage for StripPrefix {
    fn name(&self) -> &'static str {
        "strip-prefix"
    }

    async fn on_request(&self, mut req: Request<ProxyBody>) -> Flow {
        let Some(path) = strip_leave_slash(&self.prefix, req.uri().path()) else {
            return Flow::Respond(body::not_found());
        };
        match replace_path(req.uri(), &path) {
            Ok(uri) => {
                debug!("Stripped {} from {}", self.prefix, req.uri().path());
                *req.uri_mut() = uri;
                Flow::Continue(req)
            }
            Err(e) => Flow::Respond(body::text_response(
                http::StatusCode::BAD_REQUEST,
                &e.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_strip_leave_slash() {
        assert_eq!(strip_leave_slash("/k8s-api/", "/k8s-api/v1/pods").as_deref(), Some("/v1/pods"));
        assert_eq!(strip_leave_slash("/k8s-api/", "/k8s-api/").as_deref(), Some("/"));
        assert_eq!(strip_leave_slash("/k8s-api/", "/k8s-api").as_deref(), Some("/"));
        assert_eq!(strip_leave_slash("/k8s-api/", "/k8s-apix/v1"), None);
        assert_eq!(strip_leave_slash("/k8s-api/", "/other"), None);
        assert_eq!(strip_leave_slash("/", "/api/v1").as_deref(), Some("/api/v1"));
    }

    #[test]
    fn test_replace_path_keeps_query() {
        let uri: Uri = "/k8s-api/v1/pods?watch=1&limit=5".parse().unwrap();
        let replaced = replace_path(&uri, "/v1/pods").unwrap();
        assert_eq!(replaced.to_string(), "/v1/pods?watch=1&limit=5");

        let absolute: Uri = "http://localhost:8001/k8s-api/healthz".parse().unwrap();
        let replaced = replace_path(&absolute, "/healthz").unwrap();
        assert_eq!(replaced.to_string(), "http://localhost:8001/healthz");
    }

    #[tokio::test]
    async fn test_stage_rewrites_uri() {
        let stage = StripPrefix::new("/k8s-api/");
        let req = Request::builder()
            .uri("/k8s-api/v1/pods?watch=true")
            .body(body::empty())
            .unwrap();
        match stage.on_request(req).await {
            Flow::Continue(req) => assert_eq!(req.uri().to_string(), "/v1/pods?watch=true"),
            Flow::Respond(_) => panic!("expected the request to continue"),
        }
    }

    #[tokio::test]
    async fn test_stage_outside_prefix_is_not_found() {
        let stage = StripPrefix::new("/k8s-api/");
        let req = Request::builder().uri("/api/v1").body(body::empty()).unwrap();
        match stage.on_request(req).await {
            Flow::Respond(resp) => assert_eq!(resp.status(), StatusCode::NOT_FOUND),
            Flow::Continue(_) => panic!("expected 404"),
        }
    }
}
