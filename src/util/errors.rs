use std::io;

use crate::replication::types::{Checksum, PeerId, Version};

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("No peers connected")]
    NoPeers,

    #[error("This node is not the leader")]
    NotLeader,

    #[error("Stale version {version} (committed: {committed})")]
    StaleVersion { version: Version, committed: Version },

    #[error("Quorum not reached for version {version}: {acks}/{required} acks before timeout")]
    QuorumTimeout {
        version: Version,
        acks: usize,
        required: usize,
    },

    #[error("Checksums diverged for version {version}: {checksums:?}")]
    Diverged {
        version: Version,
        checksums: Vec<(PeerId, Checksum)>,
    },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Annotation error: {0}")]
    Annotation(String),

    #[error("Blob store error: {0}")]
    BlobStore(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Log inconsistency: expected version {expected}, got {got}")]
    LogInconsistency { expected: Version, got: Version },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReplicationError {
    /// Whether the failure came out of quorum evaluation, i.e. the caller may
    /// simply submit again.
    pub fn is_quorum_failure(&self) -> bool {
        matches!(
            self,
            ReplicationError::QuorumTimeout { .. } | ReplicationError::Diverged { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
