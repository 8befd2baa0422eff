//! Upstream credentials, resolved once at startup through the kube config loader

use crate::cli::UpstreamFlags;
use anyhow::{Context, Result};
use gateway_core::GatewayError;
use gateway_proxy::body::{BoxError, ProxyBody};
use gateway_proxy::tls::load_certificates;
use gateway_proxy::{
    AuthWrapper, CredentialProvider, ProxyError, ProxyResult, TransportPair, UpstreamTarget,
    UpstreamTransportBuilder,
};
use http::{Request, Response};
use kube::client::middleware::AuthLayer;
use kube::client::ConfigExt;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceExt};
use tracing::{info, warn};

/// Everything needed to build the transports to the API server.
pub struct UpstreamSettings {
    pub target: UpstreamTarget,
    pub tls: Option<rustls::ClientConfig>,
    pub server_name: Option<String>,
    pub auth: AuthWrapper,
    pub connect_timeout: Option<Duration>,
}

impl UpstreamSettings {
    pub async fn load(flags: &UpstreamFlags) -> Result<Self> {
        let mut config = kube_config(flags).await?;
        apply_overrides(&mut config, flags)?;
        Self::from_config(&config, flags.token.as_deref())
    }

    /// Derive settings from a resolved kube config. An explicit `token`
    /// wins over whatever credentials the config carries.
    pub fn from_config(config: &Config, token: Option<&str>) -> Result<Self> {
        let target = UpstreamTarget::from_uri(&config.cluster_url)
            .map_err(|e| GatewayError::InvalidUpstream(e.to_string()))?;

        let tls = if target.is_https() {
            let client_config = config
                .rustls_client_config()
                .map_err(|e| GatewayError::Tls(e.to_string()))?;
            Some(client_config)
        } else {
            None
        };

        let auth = match token {
            Some(token) => AuthWrapper::bearer(token)?,
            None => match config
                .auth_layer()
                .context("failed to load upstream credentials")?
            {
                Some(layer) => AuthWrapper::provider(KubeCredentials { layer }),
                None => AuthWrapper::None,
            },
        };

        info!(
            "Upstream {} (tls: {}, client certificate: {}, auth: {})",
            target,
            tls.is_some(),
            config.auth_info.client_certificate.is_some()
                || config.auth_info.client_certificate_data.is_some(),
            auth.kind()
        );

        Ok(Self {
            target,
            tls,
            server_name: config.tls_server_name.clone(),
            auth,
            connect_timeout: config.connect_timeout,
        })
    }

    pub fn transports(&self) -> Result<TransportPair> {
        let mut builder = UpstreamTransportBuilder::new(self.target.clone())
            .auth(self.auth.clone())
            .connect_timeout(self.connect_timeout);
        if let Some(tls) = &self.tls {
            builder = builder.tls_config(tls.clone());
        }
        if let Some(name) = &self.server_name {
            builder = builder.server_name(name.clone());
        }
        Ok(builder.build()?)
    }
}

async fn kube_config(flags: &UpstreamFlags) -> Result<Config> {
    if let Some(server) = &flags.server {
        let uri: http::Uri = server
            .parse()
            .map_err(|_| GatewayError::InvalidUpstream(server.clone()))?;
        return Ok(Config::new(uri));
    }

    let options = KubeConfigOptions {
        context: flags.context.clone(),
        ..Default::default()
    };
    match &flags.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            Ok(Config::from_custom_kubeconfig(kubeconfig, &options).await?)
        }
        None if flags.context.is_some() => Ok(Config::from_kubeconfig(&options).await?),
        None => Ok(Config::infer().await.context("failed to infer upstream configuration")?),
    }
}

/// Apply the command-line TLS flags on top of the loaded config.
fn apply_overrides(config: &mut Config, flags: &UpstreamFlags) -> Result<()> {
    if let Some(path) = &flags.certificate_authority {
        let pem = std::fs::read(path).map_err(|e| {
            GatewayError::Tls(format!("unreadable certificate authority {}: {}", path.display(), e))
        })?;
        let roots = load_certificates(&pem)?;
        config.root_cert = Some(roots.iter().map(|c| c.to_vec()).collect());
    }
    if let Some(path) = &flags.client_certificate {
        config.auth_info.client_certificate = Some(path.display().to_string());
        config.auth_info.client_certificate_data = None;
    }
    if let Some(path) = &flags.client_key {
        config.auth_info.client_key = Some(path.display().to_string());
        config.auth_info.client_key_data = None;
    }
    if flags.insecure_skip_tls_verify {
        warn!("Skipping verification of the API server certificate");
        config.accept_invalid_certs = true;
    }
    if let Some(name) = &flags.tls_server_name {
        config.tls_server_name = Some(name.clone());
    }
    Ok(())
}

/// Credentials of the kubeconfig user, applied through kube's auth layer:
/// basic auth, bearer tokens, token files re-read as they rotate, and
/// exec or auth-provider plugins.
struct KubeCredentials {
    layer: AuthLayer,
}

#[async_trait::async_trait]
impl CredentialProvider for KubeCredentials {
    async fn authorize(&self, req: Request<ProxyBody>) -> ProxyResult<Request<ProxyBody>> {
        // The inner service hands the authorized request back as its body.
        let passthrough = service_fn(|req: Request<ProxyBody>| async move {
            Ok::<_, BoxError>(Response::new(req))
        });
        // Boxed so the `CredentialProvider` future's `Send` bound is checked
        // against the concrete body type rather than the erased generator
        // witness.
        let authorized: Pin<Box<dyn Future<Output = _> + Send>> =
            Box::pin(self.layer.layer(passthrough).oneshot(req));
        let response = authorized
            .await
            .map_err(|e| ProxyError::Auth(e.to_string()))?;
        Ok(response.into_body())
    }
}
