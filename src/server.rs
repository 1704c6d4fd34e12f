//! Echo server built on the bridge.
//!
//! Pulls connections through the demand-driven stream and echoes each one
//! on its own task. On shutdown the listener is unbound first, then the
//! in-flight connections are drained.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch};
use tokio_util::task::TaskTracker;

use crate::bridge::{self, Binding};
use crate::config::Config;
use crate::connection::IncomingConnection;

/// Copy everything read from a connection back to it.
pub async fn echo<Io>(mut reader: ReadHalf<Io>, mut writer: WriteHalf<Io>) -> std::io::Result<u64>
where
    Io: AsyncRead + AsyncWrite,
{
    tokio::io::copy(&mut reader, &mut writer).await
}

fn spawn_echo<Io>(tasks: &TaskTracker, connection: IncomingConnection<Io>)
where
    Io: AsyncRead + AsyncWrite + Send + 'static,
{
    let peer = connection.remote_addr();
    let pipeline = connection.into_flow().join(echo);
    tasks.spawn(async move {
        match pipeline.await {
            Ok(Ok(bytes)) => tracing::debug!(peer = %peer, bytes, "Connection closed"),
            Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "Connection error"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "Connection task failed"),
        }
    });
}

/// Serve connections from `binding` until shutdown or until the bridge ends.
///
/// Reports the bound address through `ready` once known.
pub async fn serve<Io>(
    binding: Binding<Io>,
    mut shutdown_rx: watch::Receiver<bool>,
    ready: Option<oneshot::Sender<SocketAddr>>,
) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let addr = binding
        .local_addr
        .wait()
        .await
        .context("listener did not bind")?;
    tracing::info!(address = %addr, "Accepting connections");
    if let Some(ready) = ready {
        let _ = ready.send(addr);
    }

    let unbind = binding.unbind.wait().await?;
    let mut incoming = binding.publisher.into_stream()?;
    let tasks = TaskTracker::new();

    loop {
        tokio::select! {
            next = incoming.next() => match next {
                Some(Ok(connection)) => spawn_echo(&tasks, connection),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Listener failed");
                    break;
                }
                None => {
                    tracing::info!("Listener completed");
                    break;
                }
            },
            _ = shutdown_rx.changed() => {
                tracing::info!("Shutdown signal received, unbinding listener");
                break;
            }
        }
    }

    unbind
        .unbind()
        .wait()
        .await
        .context("listener did not unbind cleanly")?;
    drop(incoming);

    tracing::info!(connections = tasks.len(), "Draining connections");
    tasks.close();
    tasks.wait().await;
    Ok(())
}

/// Run the tcp-sluice echo server.
///
/// # Arguments
///
/// * `config` - Server configuration
/// * `shutdown_rx` - Receiver for shutdown signal
///
/// # Returns
///
/// Returns when the listener is unbound and all connections have closed.
pub async fn run_server(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let request = config.bind_request();
    tracing::info!(
        address = %request.local_endpoint(),
        backlog = request.backlog(),
        "Starting tcp-sluice"
    );
    serve(bridge::bind_tcp(request), shutdown_rx, None).await?;
    tracing::info!("Server stopped");
    Ok(())
}
