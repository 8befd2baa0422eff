//! Transports to the upstream server.
//!
//! Two transports are built from one TLS configuration:
//! - round trip: pooled client, negotiates h2 or HTTP/1.1
//! - upgrade: one fresh HTTP/1.1 connection per upgrade request, whose raw
//!   socket is handed to the relay once the upstream switches protocols
//!
//! Both apply the same authentication so upgraded streams are authorized
//! exactly like ordinary requests.

use crate::body::ProxyBody;
use crate::connector::UpstreamConnector;
use crate::error::{ProxyError, ProxyResult};
use crate::tls::{self, ALPN_ROUND_TRIP, ALPN_UPGRADE};
use http::header::{HeaderValue, AUTHORIZATION};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// The single upstream server, resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamTarget {
    scheme: Scheme,
    authority: Authority,
    /// Path the server is mounted under, without trailing slash.
    base_path: String,
}

impl UpstreamTarget {
    pub fn from_uri(uri: &Uri) -> ProxyResult<Self> {
        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::HTTP,
            Some("https") => Scheme::HTTPS,
            other => {
                return Err(ProxyError::InvalidUri(format!(
                    "unsupported scheme {:?} in {}",
                    other, uri
                )))
            }
        };
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::InvalidUri(format!("missing host in {}", uri)))?;
        let base_path = uri.path().trim_end_matches('/').to_string();
        Ok(Self {
            scheme,
            authority,
            base_path,
        })
    }

    pub fn parse(server: &str) -> ProxyResult<Self> {
        Self::from_uri(&server.parse::<Uri>()?)
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Origin-form target: base path joined with the request path and query.
    pub fn request_target(&self, path_and_query: Option<&PathAndQuery>) -> ProxyResult<PathAndQuery> {
        let requested = path_and_query.map(PathAndQuery::as_str).unwrap_or("/");
        let joined = if requested.starts_with('/') {
            format!("{}{}", self.base_path, requested)
        } else {
            format!("{}/{}", self.base_path, requested)
        };
        Ok(joined.parse::<PathAndQuery>()?)
    }

    /// Absolute URI of a request on the upstream.
    pub fn location(&self, path_and_query: Option<&PathAndQuery>) -> ProxyResult<Uri> {
        Ok(Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(self.request_target(path_and_query)?)
            .build()?)
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

/// Source of credentials that can change while the gateway runs, such as a
/// token file that is re-read or an exec plugin.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authorize(&self, req: Request<ProxyBody>) -> ProxyResult<Request<ProxyBody>>;
}

/// Credentials attached to every upstream request.
#[derive(Clone, Default)]
pub enum AuthWrapper {
    #[default]
    None,
    Bearer(HeaderValue),
    Provider(Arc<dyn CredentialProvider>),
}

impl AuthWrapper {
    pub fn bearer(token: &str) -> ProxyResult<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| ProxyError::Auth("bearer token contains invalid characters".into()))?;
        value.set_sensitive(true);
        Ok(AuthWrapper::Bearer(value))
    }

    pub fn provider(provider: impl CredentialProvider + 'static) -> Self {
        AuthWrapper::Provider(Arc::new(provider))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthWrapper::None => "none",
            AuthWrapper::Bearer(_) => "bearer",
            AuthWrapper::Provider(_) => "provider",
        }
    }

    /// Add credentials unless the client already sent its own.
    pub async fn apply(&self, mut req: Request<ProxyBody>) -> ProxyResult<Request<ProxyBody>> {
        if req.headers().contains_key(AUTHORIZATION) {
            return Ok(req);
        }
        match self {
            AuthWrapper::None => Ok(req),
            AuthWrapper::Bearer(value) => {
                req.headers_mut().insert(AUTHORIZATION, value.clone());
                Ok(req)
            }
            AuthWrapper::Provider(provider) => provider.authorize(req).await,
        }
    }
}

impl std::fmt::Debug for AuthWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthWrapper({})", self.kind())
    }
}

/// Builds the [`TransportPair`] for one upstream.
pub struct UpstreamTransportBuilder {
    target: UpstreamTarget,
    tls: Option<ClientConfig>,
    server_name: Option<String>,
    auth: AuthWrapper,
    connect_timeout: Option<Duration>,
}

impl UpstreamTransportBuilder {
    pub fn new(target: UpstreamTarget) -> Self {
        Self {
            target,
            tls: None,
            server_name: None,
            auth: AuthWrapper::None,
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Trust roots and client identity shared by both transports. ALPN is
    /// overwritten per transport.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn auth(mut self, auth: AuthWrapper) -> Self {
        self.auth = auth;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> ProxyResult<TransportPair> {
        if self.target.is_https() && self.tls.is_none() {
            return Err(ProxyError::Tls(format!(
                "upstream {} uses https but no TLS configuration was provided",
                self.target
            )));
        }
        let server_name = self
            .server_name
            .as_deref()
            .map(tls::server_name)
            .transpose()?;

        let mut round_trip_connector = UpstreamConnector::new(self.connect_timeout);
        let mut upgrade_connector = UpstreamConnector::new(self.connect_timeout);
        if let Some(base) = &self.tls {
            round_trip_connector = round_trip_connector
                .with_tls(tls::with_alpn(base, ALPN_ROUND_TRIP), server_name.clone());
            upgrade_connector =
                upgrade_connector.with_tls(tls::with_alpn(base, ALPN_UPGRADE), server_name);
        }

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_timer(TokioTimer::new())
            .build::<_, ProxyBody>(round_trip_connector);

        info!(
            "Upstream transports ready for {} (tls: {}, auth: {})",
            self.target,
            self.tls.is_some(),
            self.auth.kind()
        );

        Ok(TransportPair {
            round_trip: RoundTripTransport {
                client,
                auth: self.auth.clone(),
            },
            upgrade: UpgradeTransport {
                connector: upgrade_connector,
                auth: self.auth,
            },
        })
    }
}

/// Round-trip and upgrade transports sharing trust material.
#[derive(Clone)]
pub struct TransportPair {
    pub round_trip: RoundTripTransport,
    pub upgrade: UpgradeTransport,
}

/// Pooled transport for ordinary requests.
#[derive(Clone)]
pub struct RoundTripTransport {
    client: Client<UpstreamConnector, ProxyBody>,
    auth: AuthWrapper,
}

impl RoundTripTransport {
    /// Send `req`, whose URI must be absolute, and return the response with
    /// its body still streaming.
    pub async fn send(&self, req: Request<ProxyBody>) -> ProxyResult<Response<Incoming>> {
        let req = self.auth.apply(req).await?;
        Ok(self.client.request(req).await?)
    }
}

/// Dedicated-connection transport for protocol upgrades.
#[derive(Clone)]
pub struct UpgradeTransport {
    connector: UpstreamConnector,
    auth: AuthWrapper,
}

impl UpgradeTransport {
    /// Open a new connection to `location` and replay `req` on it. `req`
    /// must carry an origin-form URI and a Host header.
    ///
    /// The connection task keeps running after the response so that
    /// `hyper::upgrade::on` can take the socket over on a 101.
    pub async fn handshake(
        &self,
        location: Uri,
        req: Request<ProxyBody>,
    ) -> ProxyResult<Response<Incoming>> {
        let req = self.auth.apply(req).await?;
        let stream = self.connector.connect(location).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(stream).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!("Upstream upgrade connection ended: {}", e);
            }
        });
        Ok(sender.send_request(req).await?)
    }
}
