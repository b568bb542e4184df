//! Error taxonomy for the synchronization engine.
//!
//! Every fault is classified by [`FaultKind`]; only transport faults drive
//! the reconnect machinery, and none of them may leave the pending/in-flight
//! buffers in a state they could not have reached without the fault.

use uuid::Uuid;

use crate::layout::LayoutError;
use crate::protocol::{DocumentId, Version};

/// How a fault is handled by the engine and the client loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Version or base disagreement, malformed message, rejected layout
    /// gesture. Logged, the offending input is discarded.
    Protocol,
    /// Socket closed or failed. Triggers a reconnect.
    Transport,
    /// Something the user believes succeeded did not.
    UserFacing,
    /// Content hash mismatch. Reported, never auto-repaired.
    Consistency,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("version mismatch on document {id}: buffered edits are based on {buffered}, new edit on {got}")]
    VersionMismatch {
        id: DocumentId,
        buffered: Version,
        got: Version,
    },

    #[error("update for document {id} is based on {base}, but the last acknowledged version is {acked}")]
    BaseMismatch {
        id: DocumentId,
        base: Version,
        acked: Version,
    },

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("layout: {0}")]
    Layout(#[from] LayoutError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("session changed from {previous} to {current}; local state has to be resynchronized")]
    SessionConflict { previous: Uuid, current: Uuid },

    #[error("content of document {id} at version {version} does not match: expected hash {expected}, actual hash {actual}")]
    ContentMismatch {
        id: DocumentId,
        version: Version,
        expected: String,
        actual: String,
    },
}

impl SyncError {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::VersionMismatch { .. }
            | Self::BaseMismatch { .. }
            | Self::MalformedHandshake(_)
            | Self::Layout(_)
            | Self::Codec(_) => FaultKind::Protocol,
            Self::Transport(_) => FaultKind::Transport,
            Self::NotConnected | Self::SessionConflict { .. } => FaultKind::UserFacing,
            Self::ContentMismatch { .. } => FaultKind::Consistency,
        }
    }

    /// Whether the session keeps running after this fault.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), FaultKind::UserFacing)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
