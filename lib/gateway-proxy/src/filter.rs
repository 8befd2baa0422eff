//! Admission filter stage

use crate::body::{self, ProxyBody};
use crate::chain::{Flow, Stage};
use gateway_core::policy::host_without_port;
use gateway_core::FilterPolicy;
use http::header::HOST;
use hyper::Request;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Rejects requests the [`FilterPolicy`] does not accept with a 403.
pub struct AdmissionFilter {
    policy: Arc<FilterPolicy>,
}

impl AdmissionFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

}

/// Percent-decoded request path, the form the upstream routes on. `None`
/// when the decoded bytes are not UTF-8.
fn decoded_path<B>(req: &Request<B>) -> Option<Cow<'_, str>> {
    urlencoding::decode(req.uri().path()).ok()
}

/// Host used for filtering: the Host header, falling back to the URI
/// authority, without its port.
fn request_host<B>(req: &Request<B>) -> &str {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default();
    host_without_port(host)
}

#[async_trait::async_trait]
impl Stage for AdmissionFilter {
    fn name(&self) -> &'static str {
        "admission-filter"
    }

    async fn on_request(&self, req: Request<ProxyBody>) -> Flow {
        let host = request_host(&req);
        let accepted = match decoded_path(&req) {
            Some(path) => self.policy.accepts(req.method().as_str(), host, &path),
            None => {
                debug!("Path {} does not decode to UTF-8", req.uri().path());
                false
            }
        };
        if accepted {
            return Flow::Continue(req);
        }
        debug!(
            "Filter rejected {} {} (host {:?})",
            req.method(),
            req.uri().path(),
            host
        );
        Flow::Respond(body::forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};

    fn request(method: Method, host: &str, path: &str) -> Request<ProxyBody> {
        Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, host)
            .body(body::empty())
            .unwrap()
    }

    async fn status(filter: &AdmissionFilter, req: Request<ProxyBody>) -> Option<StatusCode> {
        match filter.on_request(req).await {
            Flow::Continue(_) => None,
            Flow::Respond(resp) => Some(resp.status()),
        }
    }

    #[tokio::test]
    async fn test_defaults_accept_loopback() {
        let filter = AdmissionFilter::new(FilterPolicy::with_defaults().unwrap());
        for host in ["localhost:8001", "127.0.0.1:8001", "[::1]:8001", "localhost"] {
            let req = request(Method::GET, host, "/api/v1/namespaces");
            assert_eq!(status(&filter, req).await, None, "host {}", host);
        }
    }

    #[tokio::test]
    async fn test_defaults_reject_foreign_host() {
        let filter = AdmissionFilter::new(FilterPolicy::with_defaults().unwrap());
        let req = request(Method::GET, "evil.example:8001", "/api/v1/namespaces");
        assert_eq!(status(&filter, req).await, Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_defaults_reject_exec() {
        let filter = AdmissionFilter::new(FilterPolicy::with_defaults().unwrap());
        let req = request(
            Method::POST,
            "localhost",
            "/api/v1/namespaces/default/pods/web/exec",
        );
        assert_eq!(status(&filter, req).await, Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_defaults_reject_encoded_exec_and_attach() {
        let filter = AdmissionFilter::new(FilterPolicy::with_defaults().unwrap());
        for path in [
            "/api/v1/namespaces/default/pods/web/%65xec",
            "/api/v1/namespaces/default/pods/web/%61ttach",
            "/api/v1/namespaces/default/pods/web/ex%65c",
            "/api/v1/namespaces/default/pods%2Fweb/exec",
        ] {
            let req = request(Method::POST, "localhost", path);
            assert_eq!(status(&filter, req).await, Some(StatusCode::FORBIDDEN), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_non_utf8_path_is_rejected() {
        let filter = AdmissionFilter::new(FilterPolicy::with_defaults().unwrap());
        let req = request(Method::GET, "localhost", "/api/v1/namespaces/%ff%fe");
        assert_eq!(status(&filter, req).await, Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_encoded_path_is_forwarded_unchanged() {
        let filter = AdmissionFilter::new(FilterPolicy::with_defaults().unwrap());
        let req = request(Method::GET, "localhost", "/api/v1/namespaces/my%20ns/pods");
        match filter.on_request(req).await {
            Flow::Continue(req) => assert_eq!(req.uri().path(), "/api/v1/namespaces/my%20ns/pods"),
            Flow::Respond(resp) => panic!("unexpected {}", resp.status()),
        }
    }

    #[test]
    fn test_decoded_path() {
        let req = Request::builder().uri("/a/%65xec").body(()).unwrap();
        assert_eq!(decoded_path(&req).as_deref(), Some("/a/exec"));
        let req = Request::builder().uri("/a/%C3%A9").body(()).unwrap();
        assert_eq!(decoded_path(&req).as_deref(), Some("/a/é"));
        let req = Request::builder().uri("/a/%ff").body(()).unwrap();
        assert_eq!(decoded_path(&req), None);
    }

    #[tokio::test]
    async fn test_rejected_method() {
        let policy = FilterPolicy::from_patterns("", "", "", "^POST$,^DELETE$").unwrap();
        let filter = AdmissionFilter::new(policy);
        assert_eq!(
            status(&filter, request(Method::DELETE, "anywhere", "/api")).await,
            Some(StatusCode::FORBIDDEN)
        );
        assert_eq!(status(&filter, request(Method::GET, "anywhere", "/api")).await, None);
    }

    #[test]
    fn test_host_falls_back_to_authority() {
        let req = Request::builder()
            .uri("http://127.0.0.1:8001/api")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req), "127.0.0.1");
        assert_eq!(request_host(&Request::new(())), "");
    }
}
