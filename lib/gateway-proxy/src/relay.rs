//! Raw byte relay between two upgraded connections

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::debug;

/// Bytes moved in each direction once both sides are closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Copy bytes between `client` and `upstream` until either side closes or
/// fails, then close both.
///
/// Each direction runs in its own task. The first one to finish raises a
/// shared stop signal; the other stops copying, and each task shuts down
/// its own write half exactly once before returning.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let outbound = tokio::spawn(pump(
        "client->upstream",
        client_read,
        upstream_write,
        stop_tx.clone(),
        stop_rx.clone(),
    ));
    let inbound = tokio::spawn(pump(
        "upstream->client",
        upstream_read,
        client_write,
        stop_tx,
        stop_rx,
    ));

    let (outbound, inbound) = tokio::join!(outbound, inbound);
    let stats = RelayStats {
        client_to_upstream: outbound.unwrap_or_default(),
        upstream_to_client: inbound.unwrap_or_default(),
    };
    debug!(
        "Relay closed ({} bytes up, {} bytes down)",
        stats.client_to_upstream, stats.upstream_to_client
    );
    stats
}

async fn pump<R, W>(
    direction: &'static str,
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    stop_tx: Arc<watch::Sender<bool>>,
    mut stop_rx: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + AsyncWrite,
    W: AsyncRead + AsyncWrite,
{
    let mut copied = 0u64;
    let stopped = async {
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    };
    let result = tokio::select! {
        r = copy(&mut reader, &mut writer, &mut copied) => r,
        _ = stopped => Ok(()),
    };
    if let Err(e) = result {
        debug!("Relay {} ended with error: {}", direction, e);
    }

    stop_tx.send_replace(true);
    if let Err(e) = writer.shutdown().await {
        debug!("Relay {} shutdown: {}", direction, e);
    }
    copied
}

/// Like `tokio::io::copy`, but counts into `copied` so a cancelled copy
/// still reports progress.
async fn copy<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}
