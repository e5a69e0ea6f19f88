//! Failure detection and minority-partition quarantine.
//!
//! The detector periodically scans the liveness map: any peer whose
//! last heartbeat is older than the failure threshold is moved to the
//! failed set. When more than half of the configured cluster appears
//! failed, the more likely explanation is that this node sits on the
//! minority side of a network split, so it quarantines itself rather
//! than keep serving decisions it cannot make consistently.
//!
//! The majority test needs a strict majority of the configured cluster
//! size. In a two-node cluster one missing peer is exactly half, so
//! neither side ever quarantines and a split brain is possible; three
//! nodes is the minimum for the test to be meaningful.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::message::GossipMessage;
use crate::{ClusterState, CoordMessage, Peer, PeerRegistry, ValueKind};

/// Periodic liveness scanner.
pub struct FailureDetector {
    registry: Arc<PeerRegistry>,
    state: Arc<ClusterState>,
    threshold: Duration,
}

impl FailureDetector {
    pub fn new(registry: Arc<PeerRegistry>, state: Arc<ClusterState>, threshold: Duration) -> Self {
        Self {
            registry,
            state,
            threshold,
        }
    }

    /// One detection round. Expires stale peers, re-evaluates the
    /// partition condition, and, on the leader, releases every claim
    /// held by a failed peer. Returns the deletion notices to broadcast
    /// to the surviving peers.
    pub fn tick(&self, now_ms: u64) -> Vec<(Peer, CoordMessage)> {
        let expired = self
            .state
            .expire_stale(now_ms, self.threshold.as_millis() as u64);
        for peer in &expired {
            error!("peer {peer} failed: no heartbeat within {:?}", self.threshold);
        }

        if self.update_partition() {
            return Vec::new();
        }

        if !self.state.is_self_leader() {
            return Vec::new();
        }

        // leader releases the dead peers' claims so their identities and
        // rooms become available again. The whole failed set is walked,
        // not just this round's expirations: a leader elected after a
        // peer already failed still owns that cleanup. Repeat rounds
        // find nothing left to purge and emit no duplicate notices.
        let mut purged = Vec::new();
        for peer in self.state.failed_peers() {
            purged.extend(self.state.with_ledger(|l| l.purge_owner(peer)));
        }
        if purged.is_empty() {
            return Vec::new();
        }

        let survivors: Vec<Peer> = self
            .registry
            .peers()
            .filter(|p| !self.state.is_failed(p.id))
            .cloned()
            .collect();
        let mut out = Vec::new();
        for (kind, value) in purged {
            info!("releasing {kind} {value:?} owned by a failed peer");
            let notice = match kind {
                ValueKind::Identity => GossipMessage::InformDeleteIdentity { identity: value },
                ValueKind::RoomId => GossipMessage::InformDeleteRoom { room_id: value },
            };
            let msg = CoordMessage::Gossip(notice);
            out.extend(survivors.iter().map(|p| (p.clone(), msg.clone())));
        }
        out
    }

    /// Re-evaluates the minority-partition condition and applies the
    /// quarantine or recovery transition. Returns the current
    /// partitioned flag.
    fn update_partition(&self) -> bool {
        let minority = self.state.failed_count() > self.registry.cluster_size() / 2;
        match (minority, self.state.is_partitioned()) {
            (true, false) => {
                error!(
                    failed = self.state.failed_count(),
                    cluster = self.registry.cluster_size(),
                    "majority of the cluster is unreachable, entering quarantine"
                );
                self.state.set_partitioned(true);
                self.state.quarantine();
            }
            (false, true) => {
                warn!("majority reachable again, leaving quarantine");
                self.state.set_partitioned(false);
            }
            _ => {}
        }
        self.state.is_partitioned()
    }
}
