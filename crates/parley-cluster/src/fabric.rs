//! Transport seam between the protocols and the network.
//!
//! Election, gossip, and consensus never open sockets themselves; they
//! speak through this trait. The server binary provides a TCP
//! implementation, the test suites provide in-memory ones.

use std::future::Future;
use std::time::Duration;

use crate::{ClusterError, CoordMessage, Peer, PeerId};

/// Message transport used by all coordination protocols.
///
/// Fan-out methods absorb individual peer failures: a dead target is a
/// normal condition for gossip and election, so only [`Fabric::contact`]
/// surfaces transport errors to the caller.
pub trait Fabric: Send + Sync + 'static {
    /// Fire-and-forget delivery to each peer. Unreachable peers are
    /// skipped silently.
    fn send_and_forget(
        &self,
        peers: &[Peer],
        msg: &CoordMessage,
    ) -> impl Future<Output = ()> + Send;

    /// Sends `msg` to each peer and collects whatever replies arrive
    /// within `timeout`. Peers that time out, refuse the connection, or
    /// answer garbage simply do not appear in the result.
    fn ask(
        &self,
        peers: &[Peer],
        msg: &CoordMessage,
        timeout: Duration,
    ) -> impl Future<Output = Vec<(PeerId, CoordMessage)>> + Send;

    /// Point-to-point request expecting exactly one reply.
    fn contact(
        &self,
        peer: &Peer,
        msg: &CoordMessage,
        timeout: Duration,
    ) -> impl Future<Output = Result<CoordMessage, ClusterError>> + Send;
}
