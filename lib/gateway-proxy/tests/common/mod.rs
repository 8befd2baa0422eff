//! Local upstream and gateway used by the integration tests

#![allow(dead_code)]

use gateway_core::{GatewayConfig, ListenTarget};
use gateway_proxy::{
    serve, ApiPipeline, AuthWrapper, Listener, UpgradeAwareProxy, UpstreamTarget,
    UpstreamTransportBuilder,
};
use http::header::{HeaderMap, CONNECTION, CONTENT_TYPE, UPGRADE};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub const TOKEN: &str = "integration-token";
pub const DEADLINE: Duration = Duration::from_secs(5);

pub struct Upstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start an upstream that echoes requests back as JSON and, for upgrade
/// requests, answers 101 and echoes raw bytes. A path ending in `/hangup`
/// writes `bye` and closes instead of echoing.
pub async fn start_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    echo(req)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await;
            });
        }
    });

    Upstream { addr, hits }
}

pub async fn echo(mut req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if let Some(protocol) = req.headers().get(UPGRADE).cloned() {
        let hangup = req.uri().path().ends_with("/hangup");
        let on_upgrade = hyper::upgrade::on(&mut req);
        tokio::spawn(async move {
            let Ok(upgraded) = on_upgrade.await else {
                return;
            };
            let mut io = TokioIo::new(upgraded);
            if hangup {
                let _ = io.write_all(b"bye").await;
                let _ = io.shutdown().await;
                return;
            }
            let (mut reader, mut writer) = tokio::io::split(io);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
            let _ = writer.shutdown().await;
        });
        return Ok(Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, protocol)
            .body(Full::default())
            .unwrap());
    }

    let status = req
        .headers()
        .get("x-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(200);
    let method = req.method().to_string();
    let version = format!("{:?}", req.version());
    let uri = req.uri().to_string();
    let headers: Map<String, Value> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
        .collect();
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let echo = json!({
        "method": method,
        "version": version,
        "uri": uri,
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });
    Ok(Response::builder()
        .status(status)
        .header("x-upstream", "echo")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(echo.to_string())))
        .unwrap())
}

/// Start the gateway in front of `upstream` on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig, upstream: SocketAddr) -> SocketAddr {
    let target = UpstreamTarget::parse(&format!("http://{}", upstream)).unwrap();
    let transports = UpstreamTransportBuilder::new(target.clone())
        .auth(AuthWrapper::bearer(TOKEN).unwrap())
        .build()
        .unwrap();
    let proxy = UpgradeAwareProxy::new(target, transports);
    let pipeline = ApiPipeline::build(&config, proxy);

    let listen = ListenTarget::Tcp {
        address: "127.0.0.1".to_string(),
        port: 0,
    };
    let listener = Listener::bind(&listen).await.unwrap();
    let addr = listener.tcp_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(pipeline)));
    addr
}

/// Open a raw connection to the gateway, send an upgrade request for
/// `path` and return the stream positioned after the response head.
pub async fn upgrade(gateway: SocketAddr, path: &str, protocol: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(gateway).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: {}\r\n\r\n",
        path, protocol
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = timeout(DEADLINE, stream.read(&mut byte)).await.unwrap().unwrap();
        assert_eq!(n, 1, "connection closed before the response head ended");
        head.push(byte[0]);
    }
    (stream, String::from_utf8(head).unwrap())
}

pub fn config(api_prefix: &str) -> GatewayConfig {
    let listen = ListenTarget::Tcp {
        address: "127.0.0.1".to_string(),
        port: 0,
    };
    GatewayConfig::new(listen, api_prefix, "/static/").unwrap()
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn echo(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(req: Request<Full<Bytes>>) -> Reply {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let response = client.request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: body.collect().await.unwrap().to_bytes(),
    }
}
