//! Ordered request stages in front of a handler

use crate::body::ProxyBody;
use hyper::{Request, Response};
use std::sync::Arc;
use tracing::{debug, debug_span, Instrument};

/// Anything that turns a request into a response.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: Request<ProxyBody>) -> Response<ProxyBody>;
}

/// Outcome of a single stage.
pub enum Flow {
    /// Hand the (possibly rewritten) request to the next stage.
    Continue(Request<ProxyBody>),
    /// Stop here and answer the client.
    Respond(Response<ProxyBody>),
}

/// A request-transforming step. Stages may rewrite the request or answer
/// it themselves; they never see the upstream response.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, req: Request<ProxyBody>) -> Flow;
}

/// Stages run in insertion order; the first `Respond` short-circuits.
#[derive(Clone)]
pub struct StageChain {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageChain {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage to the end of the chain
    pub fn add<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut req: Request<ProxyBody>) -> Flow {
        for stage in &self.stages {
            let span = debug_span!("stage", name = stage.name());
            match stage.on_request(req).instrument(span).await {
                Flow::Continue(next) => req = next,
                Flow::Respond(response) => {
                    debug!("Stage {} answered with {}", stage.name(), response.status());
                    return Flow::Respond(response);
                }
            }
        }
        Flow::Continue(req)
    }
}

impl Default for StageChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tag(&'static str);

    #[async_trait::async_trait]
    impl Stage for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn on_request(&self, mut req: Request<ProxyBody>) -> Flow {
            req.headers_mut().append("x-stage", self.0.parse().unwrap());
            Flow::Continue(req)
        }
    }

    struct Deny(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Stage for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        async fn on_request(&self, _req: Request<ProxyBody>) -> Flow {
            self.0.fetch_add(1, Ordering::SeqCst);
            Flow::Respond(body::forbidden())
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let chain = StageChain::new().add(Tag("first")).add(Tag("second"));
        assert_eq!(chain.names(), vec!["first", "second"]);

        let req = Request::new(body::empty());
        let Flow::Continue(req) = chain.run(req).await else {
            panic!("expected the request to continue");
        };
        let seen: Vec<_> = req.headers().get_all("x-stage").iter().collect();
        assert_eq!(seen, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_respond_short_circuits() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = StageChain::new()
            .add(Deny(hits.clone()))
            .add(Deny(hits.clone()));

        match chain.run(Request::new(body::empty())).await {
            Flow::Respond(resp) => assert_eq!(resp.status(), StatusCode::FORBIDDEN),
            Flow::Continue(_) => panic!("expected a response"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_continues() {
        let chain = StageChain::default();
        assert!(chain.names().is_empty());
        assert!(matches!(chain.run(Request::new(body::empty())).await, Flow::Continue(_)));
    }
}
