//! Test helpers: an in-memory cluster where every node runs the real
//! protocol engines and messages travel through a shared router
//! instead of sockets.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_cluster::{
    BullyMessage, ClusterError, ClusterState, Consensus, ConsensusMessage, CoordMessage,
    CoordinationConfig, Election, Fabric, FailureDetector, GossipMessage, HeartbeatGossip, Peer,
    PeerId, PeerRegistry, ValueKind,
};

/// Delivers messages between in-process nodes. Nodes taken down simply
/// stop answering, which is exactly how a crashed peer looks.
#[derive(Default)]
pub struct Router {
    nodes: Mutex<HashMap<PeerId, Arc<Node>>>,
    down: Mutex<HashSet<PeerId>>,
}

impl Router {
    fn register(&self, node: Arc<Node>) {
        self.nodes.lock().unwrap().insert(node.id(), node);
    }

    pub fn take_down(&self, id: PeerId) {
        self.down.lock().unwrap().insert(id);
    }

    pub fn bring_up(&self, id: PeerId) {
        self.down.lock().unwrap().remove(&id);
    }

    fn reachable(&self, id: PeerId) -> Option<Arc<Node>> {
        if self.down.lock().unwrap().contains(&id) {
            return None;
        }
        self.nodes.lock().unwrap().get(&id).cloned()
    }
}

impl Fabric for Router {
    async fn send_and_forget(&self, peers: &[Peer], msg: &CoordMessage) {
        for peer in peers {
            if let Some(node) = self.reachable(peer.id) {
                let msg = msg.clone();
                tokio::spawn(async move {
                    let _ = node.answer(msg).await;
                });
            }
        }
    }

    async fn ask(
        &self,
        peers: &[Peer],
        msg: &CoordMessage,
        _timeout: Duration,
    ) -> Vec<(PeerId, CoordMessage)> {
        let mut replies = Vec::new();
        for peer in peers {
            if let Some(node) = self.reachable(peer.id) {
                if let Some(reply) = node.answer(msg.clone()).await {
                    replies.push((peer.id, reply));
                }
            }
        }
        replies
    }

    async fn contact(
        &self,
        peer: &Peer,
        msg: &CoordMessage,
        _timeout: Duration,
    ) -> Result<CoordMessage, ClusterError> {
        let node = self
            .reachable(peer.id)
            .ok_or_else(|| ClusterError::PeerUnreachable(peer.coordination_addr()))?;
        node.answer(msg.clone())
            .await
            .ok_or_else(|| ClusterError::PeerUnreachable(peer.coordination_addr()))
    }
}

/// One cluster member with the full engine set wired to the router.
pub struct Node {
    pub registry: Arc<PeerRegistry>,
    pub state: Arc<ClusterState>,
    pub election: Arc<Election<Router>>,
    pub consensus: Arc<Consensus<Router>>,
    pub gossip: HeartbeatGossip,
    pub failure: FailureDetector,
    router: Arc<Router>,
}

impl Node {
    pub fn id(&self) -> PeerId {
        self.registry.local_id()
    }

    /// Routes one incoming message the way the server's connection
    /// handler does. Boxed because the leader's fan-outs re-enter the
    /// router, which re-enters this function on another node.
    pub fn answer(
        self: Arc<Self>,
        msg: CoordMessage,
    ) -> Pin<Box<dyn Future<Output = Option<CoordMessage>> + Send>> {
        Box::pin(async move {
            match msg {
                CoordMessage::Bully(BullyMessage::Election { sender }) => {
                    Some(CoordMessage::Bully(self.election.on_election(sender)))
                }
                CoordMessage::Bully(BullyMessage::Elected { .. }) => {
                    let election = self.election.clone();
                    tokio::spawn(async move { election.on_elected().await });
                    None
                }
                CoordMessage::Bully(BullyMessage::Coordinator { sender }) => {
                    self.election.clone().on_coordinator(sender);
                    None
                }
                CoordMessage::Bully(_) => None,
                CoordMessage::Consensus(ConsensusMessage::VerifyUnique { value, value_kind }) => {
                    let unique = self.consensus.local_answer(value_kind, &value);
                    Some(CoordMessage::Consensus(ConsensusMessage::ReplyVerifyUnique {
                        value,
                        value_kind,
                        unique,
                    }))
                }
                CoordMessage::Consensus(ConsensusMessage::RequestToCreateIdentity {
                    identity,
                    requester,
                }) => {
                    let success = self
                        .consensus
                        .handle_create_request(ValueKind::Identity, &identity, requester)
                        .await;
                    Some(CoordMessage::Consensus(
                        ConsensusMessage::ReplyToCreateIdentity { success, identity },
                    ))
                }
                CoordMessage::Consensus(ConsensusMessage::RequestToCreateRoom {
                    room_id,
                    requester,
                }) => {
                    let success = self
                        .consensus
                        .handle_create_request(ValueKind::RoomId, &room_id, requester)
                        .await;
                    Some(CoordMessage::Consensus(ConsensusMessage::ReplyToCreateRoom {
                        success,
                        room_id,
                    }))
                }
                CoordMessage::Consensus(_) => None,
                CoordMessage::Gossip(gossip) => {
                    self.apply_gossip(gossip).await;
                    None
                }
            }
        })
    }

    async fn apply_gossip(&self, msg: GossipMessage) {
        match msg {
            GossipMessage::Heartbeat { sender, timestamp } => {
                for (peer, forward) in self.gossip.on_heartbeat(sender, timestamp) {
                    self.router
                        .send_and_forget(std::slice::from_ref(&peer), &forward)
                        .await;
                }
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

    /// Emits one heartbeat round into the router.
    pub async fn beat(&self, now_ms: u64) {
        for (peer, msg) in self.gossip.tick(now_ms) {
            self.router
                .send_and_forget(std::slice::from_ref(&peer), &msg)
                .await;
        }
    }

    /// Runs one failure-detection round, delivering any notices.
    pub async fn detect(&self, now_ms: u64) {
        for (peer, msg) in self.failure.tick(now_ms) {
            self.router
                .send_and_forget(std::slice::from_ref(&peer), &msg)
                .await;
        }
    }
}

pub struct TestCluster {
    pub router: Arc<Router>,
    nodes: Vec<Arc<Node>>,
}

impl TestCluster {
    pub fn node(&self, id: u32) -> Arc<Node> {
        self.nodes
            .iter()
            .find(|n| n.id() == PeerId(id))
            .cloned()
            .unwrap_or_else(|| panic!("no node {id} in test cluster"))
    }

    pub fn leaders(&self) -> Vec<Option<PeerId>> {
        self.nodes
            .iter()
            .map(|n| n.state.leader().map(|l| l.id))
            .collect()
    }
}

/// Protocol timings tightened for in-memory tests.
pub fn test_config(cluster_size: u32) -> CoordinationConfig {
    CoordinationConfig {
        conn_timeout: Duration::from_millis(200),
        election_settle: Duration::from_millis(150),
        failure_threshold: Duration::from_millis(1_000),
        gossip_fanout: cluster_size as usize - 1,
        verify_attempts: 2,
        coordinator_jitter_ms: 1..10,
        ..CoordinationConfig::default()
    }
}

/// Builds a cluster of `size` nodes with ids 1..=size.
pub fn cluster(size: u32) -> TestCluster {
    let table: String = (1..=size)
        .map(|i| format!("{i}\t127.0.0.1\t{}\t{}\n", 4000 + i, 5000 + i))
        .collect();
    let router = Arc::new(Router::default());
    let config = test_config(size);

    let mut nodes = Vec::new();
    for i in 1..=size {
        let registry = Arc::new(PeerRegistry::parse(&table, PeerId(i)).unwrap());
        let state = Arc::new(ClusterState::new(PeerId(i)));
        let election = Arc::new(Election::new(
            registry.clone(),
            state.clone(),
            router.clone(),
            config.clone(),
        ));
        let consensus = Arc::new(Consensus::new(
            registry.clone(),
            state.clone(),
            router.clone(),
            election.clone(),
            config.clone(),
        ));
        let gossip = HeartbeatGossip::new(registry.clone(), state.clone(), config.gossip_fanout);
        let failure =
            FailureDetector::new(registry.clone(), state.clone(), config.failure_threshold);
        let node = Arc::new(Node {
            registry,
            state,
            election,
            consensus,
            gossip,
            failure,
            router: router.clone(),
        });
        router.register(node.clone());
        nodes.push(node);
    }
    TestCluster { router, nodes }
}

/// Waits out spawned deliveries (coordinator broadcasts, gossip
/// forwards) before asserting.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
