//! Timing knobs for the coordination protocols.

use std::ops::Range;
use std::time::Duration;

/// Configuration shared by gossip, failure detection, election, and
/// consensus.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// How often a node advances and gossips its own heartbeat.
    pub heartbeat_period: Duration,
    /// How often the failure detector scans the liveness map
    /// (roughly twice the heartbeat period).
    pub failure_check_period: Duration,
    /// Liveness entries older than this are moved to the failed set.
    pub failure_threshold: Duration,
    /// Bound on a connect-and-reply round trip to a single peer, and on
    /// collecting fan-out replies.
    pub conn_timeout: Duration,
    /// Number of peers sampled per gossip emission (with replacement).
    pub gossip_fanout: usize,
    /// Wait after triggering a re-election before retrying consensus.
    pub election_settle: Duration,
    /// Total uniqueness-verification attempts: the first try plus the
    /// documented one retry after a re-election.
    pub verify_attempts: u32,
    /// Backoff range before re-electing on a conflicting coordinator
    /// announcement, in milliseconds.
    pub coordinator_jitter_ms: Range<u64>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(3),
            failure_check_period: Duration::from_secs(6),
            failure_threshold: Duration::from_secs(10),
            conn_timeout: Duration::from_secs(5),
            gossip_fanout: 2,
            election_settle: Duration::from_secs(5),
            verify_attempts: 2,
            coordinator_jitter_ms: 100..1600,
        }
    }
}
