//! The handler chain mounted under the API prefix

use crate::body::ProxyBody;
use crate::chain::{Flow, Handler, StageChain};
use crate::filter::AdmissionFilter;
use crate::ownership::OwnershipRewriter;
use crate::prefix::StripPrefix;
use crate::proxy::UpgradeAwareProxy;
use gateway_core::GatewayConfig;
use hyper::{Request, Response};
use tracing::info;

/// Stages in front of the [`UpgradeAwareProxy`], in this order:
///
/// 1. `OwnershipRewriter` (ownership mode only)
/// 2. `StripPrefix` (only when the API prefix is a local mount point)
/// 3. `AdmissionFilter` (unless filtering is disabled)
///
/// The rewriter runs first but only touches bodies, so the filter still
/// decides on the unmodified method, host and path.
pub struct ApiPipeline {
    stages: StageChain,
    proxy: UpgradeAwareProxy,
}

impl ApiPipeline {
    pub fn build(config: &GatewayConfig, proxy: UpgradeAwareProxy) -> Self {
        let mut stages = StageChain::new();
        if let Some(owner) = &config.owner {
            stages = stages.add(OwnershipRewriter::new(owner.clone()));
        }
        if config.strips_api_prefix() {
            stages = stages.add(StripPrefix::new(config.api_prefix.clone()));
        }
        if let Some(policy) = &config.filter {
            stages = stages.add(AdmissionFilter::new(policy.clone()));
        }
        info!(
            "API pipeline on {}: [{}] -> {}",
            config.api_prefix,
            stages.names().join(", "),
            proxy.target()
        );
        Self { stages, proxy }
    }
}

#[async_trait::async_trait]
impl Handler for ApiPipeline {
    async fn handle(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        match self.stages.run(req).await {
            Flow::Continue(req) => self.proxy.proxy(req).await,
            Flow::Respond(response) => response,
        }
    }
}
