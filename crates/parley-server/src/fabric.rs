//! TCP implementation of the coordination fabric.
//!
//! One short-lived connection per message: connect, write one JSON
//! line, optionally read one line back, close. Coordination traffic is
//! low-rate, so connection reuse buys nothing and a fresh connect per
//! message doubles as a reachability probe.

use std::time::Duration;

use parley_cluster::{ClusterError, CoordMessage, Fabric, Peer, PeerId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::debug;

/// Fabric over plain TCP, one JSON line per message.
#[derive(Debug, Default, Clone)]
pub struct TcpFabric;

impl TcpFabric {
    pub fn new() -> Self {
        Self
    }

    async fn connect(peer: &Peer, timeout: Duration) -> Result<TcpStream, ClusterError> {
        let addr = peer.coordination_addr();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClusterError::PeerUnreachable(format!("{addr}: connect timed out")))?
            .map_err(|e| ClusterError::PeerUnreachable(format!("{addr}: {e}")))?;
        Ok(stream)
    }

    async fn send_one(peer: &Peer, msg: &CoordMessage, timeout: Duration) -> Result<(), ClusterError> {
        let mut stream = Self::connect(peer, timeout).await?;
        stream
            .write_all(msg.encode_line().as_bytes())
            .await
            .map_err(|e| {
                ClusterError::PeerUnreachable(format!("{}: {e}", peer.coordination_addr()))
            })?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    async fn exchange_one(
        peer: &Peer,
        msg: &CoordMessage,
        timeout: Duration,
    ) -> Result<CoordMessage, ClusterError> {
        let addr = peer.coordination_addr();
        let stream = Self::connect(peer, timeout).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(msg.encode_line().as_bytes())
            .await
            .map_err(|e| ClusterError::PeerUnreachable(format!("{addr}: {e}")))?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| ClusterError::PeerUnreachable(format!("{addr}: reply timed out")))?
            .map_err(|e| ClusterError::PeerUnreachable(format!("{addr}: {e}")))?;
        if read == 0 {
            return Err(ClusterError::PeerUnreachable(format!(
                "{addr}: closed without reply"
            )));
        }
        CoordMessage::decode_line(&line)
    }
}

/// Send timeout for fire-and-forget deliveries, where the caller does
/// not supply one.
const FORGET_TIMEOUT: Duration = Duration::from_secs(5);

impl Fabric for TcpFabric {
    async fn send_and_forget(&self, peers: &[Peer], msg: &CoordMessage) {
        let mut tasks = JoinSet::new();
        for peer in peers {
            let peer = peer.clone();
            let msg = msg.clone();
            tasks.spawn(async move {
                if let Err(e) = Self::send_one(&peer, &msg, FORGET_TIMEOUT).await {
                    debug!("dropping send to peer {}: {e}", peer.id);
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn ask(
        &self,
        peers: &[Peer],
        msg: &CoordMessage,
        timeout: Duration,
    ) -> Vec<(PeerId, CoordMessage)> {
        let mut tasks = JoinSet::new();
        for peer in peers {
            let peer = peer.clone();
            let msg = msg.clone();
            tasks.spawn(async move {
                match Self::exchange_one(&peer, &msg, timeout).await {
                    Ok(reply) => Some((peer.id, reply)),
                    Err(e) => {
                        debug!("no answer from peer {}: {e}", peer.id);
                        None
                    }
                }
            });
        }
        let mut replies = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(reply)) = joined {
                replies.push(reply);
            }
        }
        replies
    }

    async fn contact(
        &self,
        peer: &Peer,
        msg: &CoordMessage,
        timeout: Duration,
    ) -> Result<CoordMessage, ClusterError> {
        Self::exchange_one(peer, msg, timeout).await
    }
}
