//! Coordination listener and accept loop.
//!
//! Handles graceful shutdown on ctrl-c: stops accepting new
//! connections and waits for in-flight handlers to drain before
//! exiting.

use std::sync::Arc;

use parley_cluster::{CoordMessage, CoordinationConfig, PeerRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::fabric::TcpFabric;
use crate::handler::Coordinator;

/// Maximum concurrent coordination connections. Coordination traffic is
/// a handful of peers, so this only guards against runaway clients.
const MAX_CONNECTIONS: usize = 1_024;

/// Binds the coordination listener and runs the accept loop until
/// ctrl-c.
pub async fn run(
    registry: Arc<PeerRegistry>,
    config: CoordinationConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = registry.local().coordination_addr();
    let listener = TcpListener::bind(&addr).await?;
    let semaphore = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    let coordinator = Arc::new(Coordinator::new(
        registry.clone(),
        Arc::new(TcpFabric::new()),
        config,
    ));
    tokio::spawn(coordinator.clone().heartbeat_loop());
    tokio::spawn(coordinator.clone().failure_loop());

    info!(
        "node {} listening for coordination on {addr} ({} peers configured)",
        registry.local_id(),
        registry.peer_count()
    );
    coordinator.bootstrap().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received, draining connections...");
                break;
            }

            result = listener.accept() => {
                let (stream, peer) = result?;

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, dropping connection from {peer}");
                        drop(stream);
                        continue;
                    }
                };

                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, coordinator).await {
                        error!("connection error from {peer}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    // wait for all connection handlers to finish by acquiring all permits
    info!("waiting for active connections to close...");
    let _ = semaphore.acquire_many(MAX_CONNECTIONS as u32).await;
    info!("all connections drained, shutting down");

    Ok(())
}

/// Reads newline-delimited messages off one connection until the peer
/// closes it. Malformed lines are dropped; the connection survives.
async fn handle_connection(
    stream: TcpStream,
    coordinator: Arc<Coordinator<TcpFabric>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        let msg = match CoordMessage::decode_line(&line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("dropping message: {e}");
                continue;
            }
        };
        if let Some(reply) = coordinator.handle(msg).await {
            write_half.write_all(reply.encode_line().as_bytes()).await?;
        }
    }
}
