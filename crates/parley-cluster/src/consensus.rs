//! Leader-mediated uniqueness consensus.
//!
//! Chat identities and room ids must be unique across the whole
//! cluster even though each server only registers its own clients. The
//! leader arbitrates: it checks its ledger, probes every peer's local
//! view, and only when nobody objects does it record the claim and
//! gossip the result. A peer that stays silent has no conflicting
//! claim; a dead peer's clients are dead with it, so silence is safe
//! to treat as consent.
//!
//! Followers relay their claims to the leader. When the leader cannot
//! be reached the caller triggers a re-election and retries once, so a
//! leader crash costs one election round rather than a failed signup.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::message::{ConsensusMessage, GossipMessage};
use crate::{
    ClusterError, ClusterState, CoordMessage, CoordinationConfig, Election, Fabric, PeerId,
    PeerRegistry, ValueKind,
};

/// Uniqueness-verification engine.
pub struct Consensus<F: Fabric> {
    registry: Arc<PeerRegistry>,
    state: Arc<ClusterState>,
    fabric: Arc<F>,
    election: Arc<Election<F>>,
    config: CoordinationConfig,
    /// Serializes leader-side verifications so two racing claims for
    /// the same value cannot both pass the ledger check.
    verify_serial: tokio::sync::Mutex<()>,
}

impl<F: Fabric> Consensus<F> {
    pub fn new(
        registry: Arc<PeerRegistry>,
        state: Arc<ClusterState>,
        fabric: Arc<F>,
        election: Arc<Election<F>>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            registry,
            state,
            fabric,
            election,
            config,
            verify_serial: tokio::sync::Mutex::new(()),
        }
    }

    /// Verifies that `value` is globally unique and, if so, claims it
    /// for this node. `Ok(false)` means the value is taken; errors mean
    /// no verdict could be obtained even after a re-election.
    pub async fn verify_unique(&self, kind: ValueKind, value: &str) -> Result<bool, ClusterError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.verify_once(kind, value).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) if e.triggers_reelection() && attempt < self.config.verify_attempts => {
                    warn!("cannot verify {kind} {value:?} ({e}), re-electing and retrying");
                    self.election.clone().start_election().await;
                    tokio::time::sleep(self.config.election_settle).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn verify_once(&self, kind: ValueKind, value: &str) -> Result<bool, ClusterError> {
        if self.state.is_electing() {
            // a verdict issued mid-election could come from a deposed
            // leader
            return Err(ClusterError::NoLeaderKnown);
        }
        if self.state.is_self_leader() {
            Ok(self.verify_as_leader(kind, value, self.state.self_id()).await)
        } else {
            self.ask_leader(kind, value).await
        }
    }

    /// Leader-side verification and claim on behalf of `owner`.
    async fn verify_as_leader(&self, kind: ValueKind, value: &str, owner: PeerId) -> bool {
        let _serial = self.verify_serial.lock().await;

        if self.state.with_ledger(|l| l.contains(kind, value)) {
            debug!("{kind} {value:?} already claimed");
            return false;
        }

        let probe = CoordMessage::Consensus(ConsensusMessage::VerifyUnique {
            value: value.to_string(),
            value_kind: kind,
        });
        let replies = self
            .fabric
            .ask(&self.registry.all_peers(), &probe, self.config.conn_timeout)
            .await;
        let conflict = replies.iter().any(|(peer, msg)| match msg {
            CoordMessage::Consensus(ConsensusMessage::ReplyVerifyUnique { unique, .. }) => {
                if !unique {
                    info!("peer {peer} reports {kind} {value:?} as taken");
                }
                !unique
            }
            _ => false,
        });
        if conflict {
            return false;
        }

        // record the claim before releasing the serial lock, then let
        // the cluster know
        let claimed = self.state.with_ledger(|l| l.claim(kind, value, owner));
        if claimed {
            info!("{kind} {value:?} claimed for peer {owner}");
            let notice = match kind {
                ValueKind::Identity => GossipMessage::InformNewIdentity {
                    identity: value.to_string(),
                    owner,
                },
                ValueKind::RoomId => GossipMessage::InformNewRoom {
                    room_id: value.to_string(),
                    owner,
                },
            };
            self.fabric
                .send_and_forget(&self.registry.all_peers(), &CoordMessage::Gossip(notice))
                .await;
        }
        claimed
    }

    /// Follower side: relay the claim to the current leader.
    async fn ask_leader(&self, kind: ValueKind, value: &str) -> Result<bool, ClusterError> {
        let leader = self.state.leader().ok_or(ClusterError::NoLeaderKnown)?;
        let request = match kind {
            ValueKind::Identity => ConsensusMessage::RequestToCreateIdentity {
                identity: value.to_string(),
                requester: self.state.self_id(),
            },
            ValueKind::RoomId => ConsensusMessage::RequestToCreateRoom {
                room_id: value.to_string(),
                requester: self.state.self_id(),
            },
        };
        let reply = self
            .fabric
            .contact(
                &leader,
                &CoordMessage::Consensus(request),
                self.config.conn_timeout,
            )
            .await
            .map_err(|e| {
                ClusterError::LeaderUnreachable(format!("{} ({e})", leader.coordination_addr()))
            })?;
        match reply {
            CoordMessage::Consensus(ConsensusMessage::ReplyToCreateIdentity { success, .. })
            | CoordMessage::Consensus(ConsensusMessage::ReplyToCreateRoom { success, .. }) => {
                Ok(success)
            }
            other => Err(ClusterError::MalformedMessage(format!(
                "unexpected reply to create request: {other:?}"
            ))),
        }
    }

    /// This node's answer to a leader probe: is `value` absent from the
    /// local ledger?
    pub fn local_answer(&self, kind: ValueKind, value: &str) -> bool {
        !self.state.with_ledger(|l| l.contains(kind, value))
    }

    /// Handles a follower's create request. Only the leader may issue a
    /// verdict; a node that receives a relay while not leading denies
    /// it and lets the requester's retry find the real leader.
    pub async fn handle_create_request(
        &self,
        kind: ValueKind,
        value: &str,
        requester: PeerId,
    ) -> bool {
        if !self.state.is_self_leader() {
            warn!("create request for {kind} {value:?} received while not leader");
            return false;
        }
        self.verify_as_leader(kind, value, requester).await
    }
}
