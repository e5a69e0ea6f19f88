//! Coordination wire messages.
//!
//! Messages are flat key-value JSON records, one per line, sharing a
//! `type` discriminator (`bully` | `consensus` | `gossip`) and a
//! per-type `kind` sub-discriminator. The encoding is self-describing
//! so peers can skip records they do not understand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ClusterError, PeerId};

/// Top-level coordination message, tagged with `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CoordMessage {
    Bully(BullyMessage),
    Consensus(ConsensusMessage),
    Gossip(GossipMessage),
}

/// Leader-election messages. `sender` is the peer the message speaks
/// for: the election starter, the replier, or the announced leader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BullyMessage {
    /// Starter asks a higher-id peer to take over the election.
    Election { sender: PeerId },
    /// Higher-id peer acknowledges it outranks the starter.
    Ok { sender: PeerId },
    /// Lower-id peer explicitly declines, so the starter does not have
    /// to rely on timeout alone.
    Pass { sender: PeerId },
    /// Starter informs the highest responder that it won.
    Elected { sender: PeerId },
    /// Winner announces itself to the full cluster.
    Coordinator { sender: PeerId },
}

/// Which uniqueness namespace a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Identity,
    RoomId,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Identity => write!(f, "identity"),
            ValueKind::RoomId => write!(f, "room id"),
        }
    }
}

/// Uniqueness-verification messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsensusMessage {
    /// Leader probes a peer's local ledger.
    VerifyUnique { value: String, value_kind: ValueKind },
    /// Peer's answer to a probe: `unique` is true when the value is
    /// absent from its ledger.
    ReplyVerifyUnique {
        value: String,
        value_kind: ValueKind,
        unique: bool,
    },
    /// Follower asks the leader to verify and claim an identity.
    RequestToCreateIdentity { identity: String, requester: PeerId },
    /// Follower asks the leader to verify and claim a room id.
    RequestToCreateRoom { room_id: String, requester: PeerId },
    /// Leader's verdict on an identity claim.
    ReplyToCreateIdentity { success: bool, identity: String },
    /// Leader's verdict on a room-id claim.
    ReplyToCreateRoom { success: bool, room_id: String },
}

/// Gossip messages: liveness plus ledger maintenance notices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GossipMessage {
    /// A node's liveness timestamp, forwarded peer to peer.
    Heartbeat { sender: PeerId, timestamp: u64 },
    /// A new identity was claimed cluster-wide.
    InformNewIdentity { identity: String, owner: PeerId },
    /// An identity was released (owner left or its server failed).
    InformDeleteIdentity { identity: String },
    /// A new room was claimed cluster-wide.
    InformNewRoom { room_id: String, owner: PeerId },
    /// A room was deleted.
    InformDeleteRoom { room_id: String },
    /// Full ledger snapshot the leader sends to a re-admitted peer.
    LeaderState {
        identities: BTreeMap<String, PeerId>,
        rooms: BTreeMap<String, PeerId>,
    },
}

impl CoordMessage {
    /// Encodes the message as one JSON line, newline included.
    pub fn encode_line(&self) -> String {
        // these enums always serialize to JSON maps
        let mut line =
            serde_json::to_string(self).expect("coordination messages serialize to JSON");
        line.push('\n');
        line
    }

    /// Decodes a single JSON line. Unknown types, unknown kinds, and
    /// truncated payloads all surface as [`ClusterError::MalformedMessage`].
    pub fn decode_line(line: &str) -> Result<Self, ClusterError> {
        serde_json::from_str(line.trim_end()).map_err(|e| {
            ClusterError::MalformedMessage(format!("{e} in {:?}", line.trim_end()))
        })
    }
}
