//! Gossip dissemination: heartbeats and ledger notices.
//!
//! Every node periodically advances its own liveness timestamp and
//! floods it to a small random sample of peers; receivers forward fresh
//! heartbeats the same way. The monotonic timestamp check in
//! [`ClusterState::observe_heartbeat`] stops the flood: a duplicate or
//! older timestamp is dropped without forwarding, so each heartbeat
//! traverses the cluster a bounded number of times.
//!
//! The engine is pure with respect to the network. Each entry point
//! returns the `(target, message)` pairs to transmit and the caller
//! performs the sends, which keeps every protocol decision testable
//! without sockets.

use std::sync::Arc;

use tracing::{debug, info};

use crate::message::GossipMessage;
use crate::{ClusterState, CoordMessage, HeartbeatObservation, Peer, PeerId, PeerRegistry};

/// Heartbeat gossip engine.
pub struct HeartbeatGossip {
    registry: Arc<PeerRegistry>,
    state: Arc<ClusterState>,
    fanout: usize,
}

impl HeartbeatGossip {
    pub fn new(registry: Arc<PeerRegistry>, state: Arc<ClusterState>, fanout: usize) -> Self {
        Self {
            registry,
            state,
            fanout,
        }
    }

    /// One heartbeat period: advance own timestamp, emit it to a random
    /// sample of peers.
    pub fn tick(&self, now_ms: u64) -> Vec<(Peer, CoordMessage)> {
        self.state.touch_self(now_ms);
        let beat = CoordMessage::Gossip(GossipMessage::Heartbeat {
            sender: self.state.self_id(),
            timestamp: now_ms,
        });
        self.registry
            .sample(self.fanout)
            .into_iter()
            .map(|peer| (peer, beat.clone()))
            .collect()
    }

    /// Handles a heartbeat received from the network. Fresh heartbeats
    /// are recorded and forwarded to a new random sample; stale ones
    /// die here. When the local node is the leader and the heartbeat
    /// re-admits a previously failed peer, the reply includes a full
    /// ledger snapshot so the returnee catches up on claims it missed.
    pub fn on_heartbeat(&self, sender: PeerId, timestamp: u64) -> Vec<(Peer, CoordMessage)> {
        if sender == self.state.self_id() {
            // own heartbeat looped back through the flood
            return Vec::new();
        }
        let was_failed = self.state.is_failed(sender);
        let observation = self.state.observe_heartbeat(sender, timestamp);
        if observation == HeartbeatObservation::Stale {
            return Vec::new();
        }

        let mut out: Vec<(Peer, CoordMessage)> = Vec::new();
        if was_failed {
            info!("peer {sender} is alive again");
            if self.state.is_self_leader() {
                if let Some(peer) = self.registry.get(sender) {
                    let (identities, rooms) = self.state.with_ledger(|l| l.snapshot());
                    out.push((
                        peer.clone(),
                        CoordMessage::Gossip(GossipMessage::LeaderState { identities, rooms }),
                    ));
                }
            }
        } else if observation == HeartbeatObservation::Discovered {
            debug!("first heartbeat from peer {sender}");
        }

        let beat = CoordMessage::Gossip(GossipMessage::Heartbeat { sender, timestamp });
        out.extend(
            self.registry
                .sample(self.fanout)
                .into_iter()
                .map(|peer| (peer, beat.clone())),
        );
        out
    }

    /// Applies a new-claim notice to the local ledger.
    pub fn on_inform_new(&self, kind: crate::ValueKind, value: &str, owner: PeerId) {
        let recorded = self.state.with_ledger(|l| l.claim(kind, value, owner));
        if recorded {
            debug!("recorded {kind} {value:?} for peer {owner}");
        }
    }

    /// Applies a deletion notice to the local ledger.
    pub fn on_inform_delete(&self, kind: crate::ValueKind, value: &str) {
        self.state.with_ledger(|l| l.release(kind, value));
        debug!("released {kind} {value:?}");
    }

    /// Absorbs the leader's ledger snapshot after re-admission.
    pub fn on_leader_state(
        &self,
        identities: std::collections::BTreeMap<String, PeerId>,
        rooms: std::collections::BTreeMap<String, PeerId>,
    ) {
        info!(
            identities = identities.len(),
            rooms = rooms.len(),
            "absorbing leader state snapshot"
        );
        self.state.with_ledger(|l| l.merge(identities, rooms));
    }
}
