//! Coordination message dispatch and background protocol loops.

use std::sync::Arc;

use parley_cluster::{
    now_millis, BullyMessage, ClusterState, Consensus, ConsensusMessage, CoordMessage,
    CoordinationConfig, Election, Fabric, FailureDetector, GossipMessage, HeartbeatGossip, Peer,
    PeerRegistry, ValueKind,
};
use tracing::{debug, warn};

/// Ties the protocol engines together for a running node: incoming
/// messages are routed to the right engine and the engines' outgoing
/// messages go back out through the fabric.
pub struct Coordinator<F: Fabric> {
    state: Arc<ClusterState>,
    fabric: Arc<F>,
    config: CoordinationConfig,
    election: Arc<Election<F>>,
    consensus: Arc<Consensus<F>>,
    gossip: HeartbeatGossip,
    failure: FailureDetector,
}

impl<F: Fabric> Coordinator<F> {
    pub fn new(registry: Arc<PeerRegistry>, fabric: Arc<F>, config: CoordinationConfig) -> Self {
        let state = Arc::new(ClusterState::new(registry.local_id()));
        let election = Arc::new(Election::new(
            registry.clone(),
            state.clone(),
            fabric.clone(),
            config.clone(),
        ));
        let consensus = Arc::new(Consensus::new(
            registry.clone(),
            state.clone(),
            fabric.clone(),
            election.clone(),
            config.clone(),
        ));
        let gossip = HeartbeatGossip::new(registry.clone(), state.clone(), config.gossip_fanout);
        let failure = FailureDetector::new(registry, state.clone(), config.failure_threshold);
        Self {
            state,
            fabric,
            config,
            election,
            consensus,
            gossip,
            failure,
        }
    }

    /// The verification entry point the chat layer calls when a client
    /// picks an identity or creates a room.
    pub fn consensus(&self) -> &Arc<Consensus<F>> {
        &self.consensus
    }

    /// Joins the cluster: announce liveness immediately, then find out
    /// who leads.
    pub async fn bootstrap(&self) {
        self.dispatch(self.gossip.tick(now_millis())).await;
        self.election.clone().start_election().await;
    }

    /// Routes one incoming message. Returns the reply to write back on
    /// the same connection, if the message calls for one.
    pub async fn handle(&self, msg: CoordMessage) -> Option<CoordMessage> {
        match msg {
            CoordMessage::Bully(bully) => self.handle_bully(bully).await,
            CoordMessage::Consensus(consensus) => self.handle_consensus(consensus).await,
            CoordMessage::Gossip(gossip) => {
                self.handle_gossip(gossip).await;
                None
            }
        }
    }

    async fn handle_bully(&self, msg: BullyMessage) -> Option<CoordMessage> {
        match msg {
            BullyMessage::Election { sender } => {
                Some(CoordMessage::Bully(self.election.on_election(sender)))
            }
            BullyMessage::Elected { .. } => {
                // continuing the election involves our own network asks,
                // so it runs off the connection task
                let election = self.election.clone();
                tokio::spawn(async move { election.on_elected().await });
                None
            }
            BullyMessage::Coordinator { sender } => {
                self.election.clone().on_coordinator(sender);
                None
            }
            BullyMessage::Ok { sender } | BullyMessage::Pass { sender } => {
                // replies only make sense inside an ask round trip
                debug!("unsolicited election reply from peer {sender}");
                None
            }
        }
    }

    async fn handle_consensus(&self, msg: ConsensusMessage) -> Option<CoordMessage> {
        match msg {
            ConsensusMessage::VerifyUnique { value, value_kind } => {
                let unique = self.consensus.local_answer(value_kind, &value);
                Some(CoordMessage::Consensus(ConsensusMessage::ReplyVerifyUnique {
                    value,
                    value_kind,
                    unique,
                }))
            }
            ConsensusMessage::RequestToCreateIdentity {
                identity,
                requester,
            } => {
                let success = self
                    .consensus
                    .handle_create_request(ValueKind::Identity, &identity, requester)
                    .await;
                Some(CoordMessage::Consensus(
                    ConsensusMessage::ReplyToCreateIdentity { success, identity },
                ))
            }
            ConsensusMessage::RequestToCreateRoom { room_id, requester } => {
                let success = self
                    .consensus
                    .handle_create_request(ValueKind::RoomId, &room_id, requester)
                    .await;
                Some(CoordMessage::Consensus(ConsensusMessage::ReplyToCreateRoom {
                    success,
                    room_id,
                }))
            }
            ConsensusMessage::ReplyVerifyUnique { .. }
            | ConsensusMessage::ReplyToCreateIdentity { .. }
            | ConsensusMessage::ReplyToCreateRoom { .. } => {
                warn!("unsolicited consensus reply");
                None
            }
        }
    }

    async fn handle_gossip(&self, msg: GossipMessage) {
        match msg {
            GossipMessage::Heartbeat { sender, timestamp } => {
                self.dispatch(self.gossip.on_heartbeat(sender, timestamp)).await;
            }
            GossipMessage::InformNewIdentity { identity, owner } => {
                self.gossip.on_inform_new(ValueKind::Identity, &identity, owner);
            }
            GossipMessage::InformDeleteIdentity { identity } => {
                self.gossip.on_inform_delete(ValueKind::Identity, &identity);
            }
            GossipMessage::InformNewRoom { room_id, owner } => {
                self.gossip.on_inform_new(ValueKind::RoomId, &room_id, owner);
            }
            GossipMessage::InformDeleteRoom { room_id } => {
                self.gossip.on_inform_delete(ValueKind::RoomId, &room_id);
            }
            GossipMessage::LeaderState { identities, rooms } => {
                self.gossip.on_leader_state(identities, rooms);
            }
        }
    }

    /// Periodic heartbeat emission.
    pub async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.dispatch(self.gossip.tick(now_millis())).await;
        }
    }

    /// Periodic failure detection. When the detector notices the leader
    /// among the newly failed peers, an election is started right away
    /// instead of waiting for the next consensus call to stumble over
    /// the dead leader.
    pub async fn failure_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.failure_check_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let leader_before = self.state.leader().map(|l| l.id);
            self.dispatch(self.failure.tick(now_millis())).await;
            if let Some(leader) = leader_before {
                if self.state.is_failed(leader) && !self.state.is_partitioned() {
                    warn!("leader {leader} failed, starting election");
                    self.state.clear_leader();
                    self.election.clone().start_election().await;
                }
            }
        }
    }

    async fn dispatch(&self, sends: Vec<(Peer, CoordMessage)>) {
        for (peer, msg) in sends {
            self.fabric
                .send_and_forget(std::slice::from_ref(&peer), &msg)
                .await;
        }
    }
}
