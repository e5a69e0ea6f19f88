//! parley-cluster: peer-to-peer coordination for a sharded chat service.
//!
//! A set of independent server processes agree on a single leader,
//! detect peer failures without a central authority, keep a loosely
//! consistent view of cluster membership, and answer "is this value
//! globally unique?" with one authoritative verdict.
//!
//! # Architecture
//!
//! - **Peer registry**: static member table loaded once at startup
//! - **Gossip heartbeats**: randomized flood of liveness timestamps
//! - **Failure detection**: staleness scanning plus minority-partition
//!   self-quarantine
//! - **Leader election**: Bully protocol, highest live id wins
//! - **Uniqueness consensus**: leader-mediated claim verification for
//!   identities and room ids
//!
//! The protocols tolerate lost messages, duplicate heartbeats, and
//! concurrent elections, converging through idempotent state
//! transitions and timeouts rather than strict ordering. This is not a
//! linearizable consensus layer; there is no durable log and no
//! Byzantine tolerance.
//!
//! Networking goes through the [`Fabric`] trait so the protocols stay
//! testable without sockets; the server binary supplies the TCP
//! implementation.

mod config;
mod consensus;
mod election;
mod error;
mod fabric;
mod failure;
mod gossip;
mod message;
mod registry;
mod state;

pub use config::CoordinationConfig;
pub use consensus::Consensus;
pub use election::Election;
pub use error::ClusterError;
pub use fabric::Fabric;
pub use failure::FailureDetector;
pub use gossip::HeartbeatGossip;
pub use message::{BullyMessage, ConsensusMessage, CoordMessage, GossipMessage, ValueKind};
pub use registry::{Peer, PeerId, PeerRegistry};
pub use state::{ClusterState, HeartbeatObservation, UniquenessLedger};

/// Milliseconds since the Unix epoch, the clock carried by heartbeats.
///
/// Wall-clock time is only compared against timestamps produced by the
/// same peer, so clock skew between nodes does not affect liveness.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
