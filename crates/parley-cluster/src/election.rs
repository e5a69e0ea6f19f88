//! Bully leader election.
//!
//! Any node may start an election; the live node with the highest id
//! always wins. The starter asks every higher-id peer to take over. A
//! higher peer that is alive answers `ok`; the starter hands the
//! election to the highest responder with `elected`, and that node
//! repeats the process until someone finds no higher peer alive and
//! announces itself with `coordinator`. Lower-id peers answer `pass` so
//! the starter can distinguish "outranked" from "dead" without waiting
//! out the timeout.
//!
//! Concurrent elections converge because every step is idempotent and
//! the same comparison decides every conflict. A coordinator
//! announcement from a node with a lower id than our own is a sign the
//! announcer could not see us; after a randomized backoff we challenge
//! it with a fresh election.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::message::BullyMessage;
use crate::{ClusterState, CoordMessage, CoordinationConfig, Fabric, PeerId, PeerRegistry};

/// Election engine. Cheap to share behind an [`Arc`]; the handoff
/// methods take `self: Arc<Self>` because challenges re-enter the
/// engine from a spawned task.
pub struct Election<F: Fabric> {
    registry: Arc<PeerRegistry>,
    state: Arc<ClusterState>,
    fabric: Arc<F>,
    config: CoordinationConfig,
    in_progress: AtomicBool,
}

impl<F: Fabric> Election<F> {
    pub fn new(
        registry: Arc<PeerRegistry>,
        state: Arc<ClusterState>,
        fabric: Arc<F>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            registry,
            state,
            fabric,
            config,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Starts an election round from this node. A no-op when a round is
    /// already running locally; concurrent starters elsewhere are fine.
    pub async fn start_election(self: Arc<Self>) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            debug!("election already running locally");
            return;
        }
        info!("starting election");
        self.state.set_electing(true);
        self.state.clear_leader();

        let higher = self.registry.higher_peers();
        if higher.is_empty() {
            self.become_leader().await;
            self.in_progress.store(false, Ordering::SeqCst);
            return;
        }

        let ask = CoordMessage::Bully(BullyMessage::Election {
            sender: self.state.self_id(),
        });
        let replies = self
            .fabric
            .ask(&higher, &ask, self.config.conn_timeout)
            .await;

        // the highest peer that acknowledged takes the election over
        let winner = replies
            .into_iter()
            .filter_map(|(_, msg)| match msg {
                CoordMessage::Bully(BullyMessage::Ok { sender }) => Some(sender),
                _ => None,
            })
            .max();

        match winner {
            None => {
                // no higher peer is alive
                self.become_leader().await;
            }
            Some(id) => {
                debug!("handing election to peer {id}");
                if let Some(peer) = self.registry.get(id) {
                    let handoff = CoordMessage::Bully(BullyMessage::Elected {
                        sender: self.state.self_id(),
                    });
                    self.fabric
                        .send_and_forget(std::slice::from_ref(peer), &handoff)
                        .await;
                }
                // stay in electing state until the winner's coordinator
                // announcement arrives
            }
        }
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// Handles an `election` ask from `starter`. Returns the reply to
    /// send back.
    pub fn on_election(&self, starter: PeerId) -> BullyMessage {
        self.state.set_electing(true);
        self.state.clear_leader();
        let me = self.state.self_id();
        if me > starter {
            BullyMessage::Ok { sender: me }
        } else {
            BullyMessage::Pass { sender: me }
        }
    }

    /// Handles an `elected` handoff: this node was the highest live
    /// responder, so it continues the election from its own position.
    pub async fn on_elected(self: Arc<Self>) {
        debug!("received election handoff");
        // if a local round is already in flight it will conclude on its
        // own; the guard inside start_election handles the overlap
        self.start_election().await;
    }

    /// Handles a `coordinator` announcement. A node that was electing
    /// accepts the announcer unconditionally; otherwise only a
    /// higher-or-equal-id announcer is accepted. An announcer this node
    /// outranks could not have seen us, so its claim is not installed;
    /// instead a challenge election is scheduled after a randomized
    /// backoff to converge the conflicting rounds.
    pub fn on_coordinator(self: Arc<Self>, sender: PeerId) {
        let me = self.state.self_id();
        if sender == me {
            // own announcement echoed back
            return;
        }
        let Some(peer) = self.registry.get(sender) else {
            warn!("coordinator announcement from unknown peer {sender}");
            return;
        };

        if sender < me && !self.state.is_electing() {
            let delay = {
                let mut rng = rand::rng();
                rng.random_range(self.config.coordinator_jitter_ms.clone())
            };
            warn!("ignoring coordinator claim from outranked peer {sender}, challenging in {delay}ms");
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                this.start_election().await;
            });
            return;
        }

        info!("peer {sender} announced itself as leader");
        self.state.set_leader(peer.clone());
        self.state.set_electing(false);
    }

    async fn become_leader(&self) {
        info!("no higher peer answered, assuming leadership");
        self.state.set_leader(self.registry.local().clone());
        self.state.set_electing(false);
        let announce = CoordMessage::Bully(BullyMessage::Coordinator {
            sender: self.state.self_id(),
        });
        self.fabric
            .send_and_forget(&self.registry.all_peers(), &announce)
            .await;
    }
}
