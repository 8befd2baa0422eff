mod common;

use common::{config, start_gateway, start_upstream, upgrade, DEADLINE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

#[tokio::test]
async fn test_upgrade_relays_and_closes_with_client() {
    let upstream = start_upstream().await;
    let gateway = start_gateway(config("/"), upstream.addr).await;

    let (mut stream, head) =
        upgrade(gateway, "/api/v1/namespaces/default/pods/web/portforward", "SPDY/3.1").await;
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {}", head);
    assert!(head.to_ascii_lowercase().contains("upgrade: spdy/3.1"));

    stream.write_all(b"hello through the tunnel").await.unwrap();
    let mut echoed = [0u8; 24];
    timeout(DEADLINE, stream.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello through the tunnel");

    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    timeout(DEADLINE, stream.read_to_end(&mut rest))
        .await
        .expect("gateway should close the client side")
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_upstream_close_reaches_client() {
    let upstream = start_upstream().await;
    let gateway = start_gateway(config("/"), upstream.addr).await;

    let (mut stream, head) = upgrade(gateway, "/api/v1/stream/hangup", "websocket").await;
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {}", head);

    let mut rest = Vec::new();
    timeout(DEADLINE, stream.read_to_end(&mut rest))
        .await
        .expect("gateway should close after the upstream hangs up")
        .unwrap();
    assert_eq!(&rest[..], b"bye");
}

#[tokio::test]
async fn test_unsupported_protocol_is_plain_request() {
    let upstream = start_upstream().await;
    let gateway = start_gateway(config("/"), upstream.addr).await;

    // The echo upstream answers 101 to anything carrying an Upgrade header;
    // the gateway must drop the header instead of switching protocols.
    let (_stream, head) = upgrade(gateway, "/api/v1/namespaces", "h2c").await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected head: {}", head);
}

#[tokio::test]
async fn test_upgrade_still_filtered() {
    let upstream = start_upstream().await;
    let gateway = start_gateway(config("/"), upstream.addr).await;

    let (_stream, head) =
        upgrade(gateway, "/api/v1/namespaces/default/pods/web/exec", "SPDY/3.1").await;
    assert!(head.starts_with("HTTP/1.1 403"), "unexpected head: {}", head);
    assert_eq!(upstream.hits(), 0);
}
