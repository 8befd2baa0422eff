use anyhow::{Context, Result};
use clap::Parser;
use gateway_core::GatewayConfig;
use gateway_proxy::{serve, tls, ApiPipeline, Listener, StaticFiles, UpgradeAwareProxy};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod router;
mod upstream;

use cli::Cli;
use router::Router;
use upstream::UpstreamSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.gateway_config()?;
    info!("Starting api-gateway...");

    tls::install_crypto_provider();
    let upstream = UpstreamSettings::load(&cli.upstream)
        .await
        .context("failed to load upstream configuration")?;
    let transports = upstream.transports()?;
    let proxy = UpgradeAwareProxy::new(upstream.target, transports);

    warn_if_unfiltered(&config);
    if let Some(owner) = &config.owner {
        info!(
            "Ownership mode: created objects are owned by {} {} ({})",
            owner.kind(),
            owner.name(),
            owner.uid()
        );
    }

    let mut router = Router::new().route(
        config.api_prefix.clone(),
        Arc::new(ApiPipeline::build(&config, proxy)),
    );
    if let Some(dir) = &config.static_dir {
        cli::check_static_dir(dir);
        info!("Serving {} under {}", dir.display(), config.static_prefix);
        router = router.route(
            config.static_prefix.clone(),
            Arc::new(StaticFiles::new(config.static_prefix.clone(), dir.clone())),
        );
    }

    // Bind before serving so an ephemeral port can be reported.
    let listener = Listener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    println!("Starting to serve on {}", listener.local_addr()?);

    serve(listener, Arc::new(router))
        .await
        .context("server stopped accepting connections")?;
    Ok(())
}

fn warn_if_unfiltered(config: &GatewayConfig) {
    if config.filter.is_some() {
        return;
    }
    if config.listen.is_unix() {
        warn!("Request filter disabled; requests through this socket are not checked for XSRF");
    } else {
        warn!("Request filter disabled, your proxy is vulnerable to XSRF attacks, please be cautious");
    }
}
