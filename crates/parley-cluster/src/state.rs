//! Shared mutable cluster state.
//!
//! One explicitly constructed instance is owned by the composition root
//! and injected into every protocol component, never held as ambient
//! global state. Each structure is guarded by its own lock; no protocol
//! step needs cross-structure atomicity, so there are no compound
//! transactions.
//!
//! Write ownership: the liveness map and failed set belong to gossip
//! and the failure detector, the leader reference to election, the
//! ledger to consensus (leader side) and gossip notices. Everyone else
//! only reads.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::{Peer, PeerId, ValueKind};

/// Outcome of recording a received heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatObservation {
    /// First heartbeat seen for this peer, a discovery or re-admission.
    Discovered,
    /// Strictly newer timestamp for an already-known peer.
    Advanced,
    /// Not newer than the stored timestamp; dropped without effect.
    Stale,
}

/// Leader-held ownership map from identity or room id to owning peer.
#[derive(Debug, Default)]
pub struct UniquenessLedger {
    identities: BTreeMap<String, PeerId>,
    rooms: BTreeMap<String, PeerId>,
}

impl UniquenessLedger {
    fn table(&self, kind: ValueKind) -> &BTreeMap<String, PeerId> {
        match kind {
            ValueKind::Identity => &self.identities,
            ValueKind::RoomId => &self.rooms,
        }
    }

    fn table_mut(&mut self, kind: ValueKind) -> &mut BTreeMap<String, PeerId> {
        match kind {
            ValueKind::Identity => &mut self.identities,
            ValueKind::RoomId => &mut self.rooms,
        }
    }

    pub fn contains(&self, kind: ValueKind, value: &str) -> bool {
        self.table(kind).contains_key(value)
    }

    /// Records `owner` for `value`. Returns false (and changes nothing)
    /// when the value is already claimed.
    pub fn claim(&mut self, kind: ValueKind, value: &str, owner: PeerId) -> bool {
        let table = self.table_mut(kind);
        if table.contains_key(value) {
            return false;
        }
        table.insert(value.to_string(), owner);
        true
    }

    /// Drops a claim, if present.
    pub fn release(&mut self, kind: ValueKind, value: &str) {
        self.table_mut(kind).remove(value);
    }

    /// Removes every value owned by `owner`, returning what was purged.
    pub fn purge_owner(&mut self, owner: PeerId) -> Vec<(ValueKind, String)> {
        let mut purged = Vec::new();
        for kind in [ValueKind::Identity, ValueKind::RoomId] {
            let table = self.table_mut(kind);
            let doomed: Vec<String> = table
                .iter()
                .filter(|(_, o)| **o == owner)
                .map(|(v, _)| v.clone())
                .collect();
            for value in doomed {
                table.remove(&value);
                purged.push((kind, value));
            }
        }
        purged
    }

    /// Full copy of both tables, for the leader-state snapshot sent to
    /// re-admitted peers.
    pub fn snapshot(&self) -> (BTreeMap<String, PeerId>, BTreeMap<String, PeerId>) {
        (self.identities.clone(), self.rooms.clone())
    }

    /// Merges a leader snapshot. Snapshot entries win: the re-admitted
    /// node's own view is stale by definition.
    pub fn merge(
        &mut self,
        identities: BTreeMap<String, PeerId>,
        rooms: BTreeMap<String, PeerId>,
    ) {
        self.identities.extend(identities);
        self.rooms.extend(rooms);
    }

    pub fn clear(&mut self) {
        self.identities.clear();
        self.rooms.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.rooms.is_empty()
    }
}

/// The shared record every coordination component reads and mutates.
pub struct ClusterState {
    self_id: PeerId,
    /// Peer id to last-seen timestamp (ms). Monotonic per peer.
    liveness: Mutex<HashMap<PeerId, u64>>,
    /// Peers currently believed dead.
    failed: Mutex<HashSet<PeerId>>,
    /// Currently recognized leader; None means queries must fail fast
    /// or trigger an election.
    leader: Mutex<Option<Peer>>,
    /// True while this node believes it sits on the minority side of a
    /// network split.
    partitioned: AtomicBool,
    /// True from the moment an election touches this node until a
    /// coordinator announcement settles it.
    electing: AtomicBool,
    ledger: Mutex<UniquenessLedger>,
}

impl ClusterState {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            liveness: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
            leader: Mutex::new(None),
            partitioned: AtomicBool::new(false),
            electing: AtomicBool::new(false),
            ledger: Mutex::new(UniquenessLedger::default()),
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    // -- liveness map --

    /// Advances the local node's own entry. Called on every gossip tick.
    pub fn touch_self(&self, now_ms: u64) {
        self.lock_liveness().insert(self.self_id, now_ms);
    }

    /// Records a peer heartbeat and clears the peer from the failed set
    /// unless the heartbeat is stale. A peer's entry only ever moves
    /// forward: duplicates and out-of-order timestamps are dropped.
    pub fn observe_heartbeat(&self, peer: PeerId, timestamp: u64) -> HeartbeatObservation {
        let observation = {
            let mut liveness = self.lock_liveness();
            match liveness.get(&peer) {
                Some(&stored) if stored >= timestamp => HeartbeatObservation::Stale,
                Some(_) => {
                    liveness.insert(peer, timestamp);
                    HeartbeatObservation::Advanced
                }
                None => {
                    liveness.insert(peer, timestamp);
                    HeartbeatObservation::Discovered
                }
            }
        };
        if observation != HeartbeatObservation::Stale {
            self.lock_failed().remove(&peer);
        }
        observation
    }

    pub fn liveness_of(&self, peer: PeerId) -> Option<u64> {
        self.lock_liveness().get(&peer).copied()
    }

    /// Moves every peer whose entry is older than `threshold_ms` into
    /// the failed set (the local node's own entry is exempt). Returns
    /// the peers that failed this round.
    pub fn expire_stale(&self, now_ms: u64, threshold_ms: u64) -> Vec<PeerId> {
        let mut liveness = self.lock_liveness();
        let doomed: Vec<PeerId> = liveness
            .iter()
            .filter(|(id, &ts)| **id != self.self_id && now_ms.saturating_sub(ts) > threshold_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            liveness.remove(id);
        }
        drop(liveness);
        if !doomed.is_empty() {
            let mut failed = self.lock_failed();
            failed.extend(doomed.iter().copied());
        }
        doomed
    }

    // -- failed set --

    pub fn is_failed(&self, peer: PeerId) -> bool {
        self.lock_failed().contains(&peer)
    }

    pub fn failed_count(&self) -> usize {
        self.lock_failed().len()
    }

    pub fn failed_peers(&self) -> Vec<PeerId> {
        self.lock_failed().iter().copied().collect()
    }

    // -- leader reference --

    pub fn set_leader(&self, peer: Peer) {
        debug!("leader is now {}", peer.id);
        *self.lock_leader() = Some(peer);
    }

    pub fn clear_leader(&self) {
        *self.lock_leader() = None;
    }

    pub fn leader(&self) -> Option<Peer> {
        self.lock_leader().clone()
    }

    pub fn is_self_leader(&self) -> bool {
        self.lock_leader()
            .as_ref()
            .is_some_and(|l| l.id == self.self_id)
    }

    // -- flags --

    pub fn set_electing(&self, value: bool) {
        self.electing.store(value, Ordering::SeqCst);
    }

    pub fn is_electing(&self) -> bool {
        self.electing.load(Ordering::SeqCst)
    }

    pub fn set_partitioned(&self, value: bool) {
        self.partitioned.store(value, Ordering::SeqCst);
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned.load(Ordering::SeqCst)
    }

    // -- uniqueness ledger --

    /// Runs `f` with the ledger locked.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&mut UniquenessLedger) -> R) -> R {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut ledger)
    }

    /// Destructive reset taken on the minority side of a partition:
    /// this node can no longer make globally consistent decisions, so
    /// the leader, election progress, and ledger are all discarded. The
    /// failed set is kept so recovery can be observed once heartbeats
    /// resume.
    pub fn quarantine(&self) {
        self.clear_leader();
        self.set_electing(false);
        self.with_ledger(|l| l.clear());
    }

    fn lock_liveness(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, u64>> {
        self.liveness.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failed(&self) -> std::sync::MutexGuard<'_, HashSet<PeerId>> {
        self.failed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_leader(&self) -> std::sync::MutexGuard<'_, Option<Peer>> {
        self.leader.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("self_id", &self.self_id)
            .field("partitioned", &self.is_partitioned())
            .field("electing", &self.is_electing())
            .finish_non_exhaustive()
    }
}
