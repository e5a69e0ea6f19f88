//! Static peer registry.
//!
//! The member table is loaded once at startup from a tab-separated
//! file (`id, address, client port, coordination port`) and never
//! mutated afterwards. Failure is tracked separately in the cluster
//! state, so a recovered peer can be re-admitted without touching the
//! registry.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::ClusterError;

/// Integer peer identifier.
///
/// Numeric ordering is the sole tie-break key everywhere: elections and
/// max-responder selection compare ids as numbers, never as strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cluster member from the static configuration. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub address: String,
    pub client_port: u16,
    pub coordination_port: u16,
}

impl Peer {
    /// `host:port` for the peer's coordination listener.
    pub fn coordination_addr(&self) -> String {
        format!("{}:{}", self.address, self.coordination_port)
    }
}

/// All configured cluster members, keyed by id.
///
/// The local node is held separately so protocol fan-outs never target
/// self.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    local: Peer,
    peers: BTreeMap<PeerId, Peer>,
}

impl PeerRegistry {
    /// Loads the peer table from `path`.
    pub fn from_file(path: &Path, self_id: PeerId) -> Result<Self, ClusterError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ClusterError::Configuration(format!("cannot read peer table {}: {e}", path.display()))
        })?;
        Self::parse(&raw, self_id)
    }

    /// Parses the tab-separated peer table. One row per node; blank
    /// lines are skipped. `self_id` must appear in the table.
    pub fn parse(raw: &str, self_id: PeerId) -> Result<Self, ClusterError> {
        let mut peers = BTreeMap::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 4 {
                return Err(ClusterError::Configuration(format!(
                    "peer table line {}: expected 4 tab-separated fields, got {}",
                    idx + 1,
                    fields.len()
                )));
            }
            let id = fields[0].parse::<u32>().map_err(|_| {
                ClusterError::Configuration(format!(
                    "peer table line {}: invalid id {:?}",
                    idx + 1,
                    fields[0]
                ))
            })?;
            let peer = Peer {
                id: PeerId(id),
                address: fields[1].to_string(),
                client_port: parse_port(fields[2], idx)?,
                coordination_port: parse_port(fields[3], idx)?,
            };
            if peers.insert(peer.id, peer).is_some() {
                return Err(ClusterError::Configuration(format!(
                    "peer table line {}: duplicate id {id}",
                    idx + 1
                )));
            }
        }
        let local = peers.remove(&self_id).ok_or_else(|| {
            ClusterError::Configuration(format!("self id {self_id} not present in peer table"))
        })?;
        Ok(Self { local, peers })
    }

    /// The local node's own entry.
    pub fn local(&self) -> &Peer {
        &self.local
    }

    pub fn local_id(&self) -> PeerId {
        self.local.id
    }

    /// Looks up a remote peer by id. The local node is not returned.
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// All remote peers, in id order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Owned copy of every remote peer, for fan-out calls.
    pub fn all_peers(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    /// Number of configured remote peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Total cluster size: configured peers plus self. This is the
    /// denominator of the minority-partition test.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Remote peers with a numerically higher id than the local node,
    /// the targets of an election ask.
    pub fn higher_peers(&self) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|p| p.id > self.local.id)
            .cloned()
            .collect()
    }

    /// `n` remote peers sampled uniformly with replacement. Duplicates
    /// only cause redundant gossip sends, which the monotonic timestamp
    /// check deduplicates on arrival.
    pub fn sample(&self, n: usize) -> Vec<Peer> {
        let pool: Vec<&Peer> = self.peers.values().collect();
        if pool.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::rng();
        (0..n)
            .filter_map(|_| pool.choose(&mut rng).map(|p| (*p).clone()))
            .collect()
    }
}

fn parse_port(field: &str, idx: usize) -> Result<u16, ClusterError> {
    field.parse::<u16>().map_err(|_| {
        ClusterError::Configuration(format!(
            "peer table line {}: invalid port {field:?}",
            idx + 1
        ))
    })
}
