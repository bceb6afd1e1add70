//! Error type for the swarm core.
//!
//! Channel loss is deliberately absent: a dropped delta is a modeled
//! condition, surfaced only through drift metrics.

/// Errors raised by the swarm library.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    /// Malformed configuration or operation argument. Raised before any tick runs.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The caller supplied a different number of oracles than there are agents.
    #[error("expected {expected} outcome oracles (one per agent), got {got}")]
    OracleMismatch { expected: usize, got: usize },

    /// An agent task in the async runtime exited before answering.
    #[error("agent {agent} stopped before the tick completed")]
    AgentStopped { agent: String },

    /// The broadcast fan-out has no live receivers.
    #[error("sync channel closed")]
    ChannelClosed,

    #[error("snapshot (de)serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("snapshot storage failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SwarmError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SwarmError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
