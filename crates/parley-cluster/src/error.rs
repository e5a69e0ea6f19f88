//! Error types for coordination operations.

/// Errors produced by the coordination layer.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Consensus was attempted while no leader is known.
    #[error("no leader known")]
    NoLeaderKnown,

    /// The leader did not answer within the connection timeout.
    #[error("leader unreachable: {0}")]
    LeaderUnreachable(String),

    /// A single fan-out or gossip target failed. Absorbed locally by
    /// every multi-peer operation; only point-to-point sends surface it.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// A payload could not be parsed as a coordination message. The
    /// handling worker drops the message and survives.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The peer table could not be loaded or is invalid.
    #[error("invalid cluster configuration: {0}")]
    Configuration(String),
}

impl ClusterError {
    /// Returns true for the errors that should trigger a re-election
    /// and retry from the consensus caller.
    pub fn triggers_reelection(&self) -> bool {
        matches!(
            self,
            ClusterError::NoLeaderKnown | ClusterError::LeaderUnreachable(_)
        )
    }
}
