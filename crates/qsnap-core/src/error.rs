//! Snapshot protocol error taxonomy.

use thiserror::Error;

use crate::protocol::{LoadPhase, Verb};
use crate::traits::ChannelError;

/// Failure of a snapshot operation.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The response carried the error sentinel.
    #[error("Remote rejected {verb}: {response}")]
    RemoteRejected { verb: Verb, response: String },
    /// The echoed name is not the one that was requested.
    #[error("Name mismatch: requested {expected:?}, remote answered {actual:?}")]
    NameMismatch { expected: String, actual: String },
    /// Client-side catalog lookup failed before sending.
    #[error("Snapshot {0} not found")]
    NotFound(String),
    #[error("Malformed {verb} response: {reason}")]
    MalformedResponse { verb: Verb, reason: String },
    /// The remote side consumed a different number of bytes than the chunk carried.
    #[error(
        "Chunk size mismatch at offset {offset} (state: {phase}): sent {sent} bytes, remote acknowledged {acknowledged}"
    )]
    ChunkSizeMismatch {
        phase: LoadPhase,
        offset: usize,
        sent: usize,
        acknowledged: i128,
    },
    /// The name would break the request grammar.
    #[error("Invalid snapshot name {0:?}")]
    InvalidName(String),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Kind of a [`SnapshotError`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RemoteRejected,
    NameMismatch,
    NotFound,
    MalformedResponse,
    ChunkSizeMismatch,
    InvalidName,
    Channel,
}

impl SnapshotError {
    /// Build a [`SnapshotError::MalformedResponse`].
    pub fn malformed(verb: Verb, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            verb,
            reason: reason.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Self::NameMismatch { .. } => ErrorKind::NameMismatch,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::ChunkSizeMismatch { .. } => ErrorKind::ChunkSizeMismatch,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::Channel(_) => ErrorKind::Channel,
        }
    }
}
