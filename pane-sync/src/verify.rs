//! Content verification against authority-reported hashes.
//!
//! A job snapshots the local text when the hash arrives; digesting happens
//! later, off the event loop, and only ever reports.

use sha2::{Digest, Sha256};

use crate::delta::{Delta, Operation};
use crate::error::SyncError;
use crate::protocol::{ContentHash, DocumentId, Version};

/// Lowercase hex SHA-256 of `text`.
pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationJob {
    id: DocumentId,
    version: Version,
    expected: String,
    text: String,
}

impl VerificationJob {
    /// Snapshot `content` for checking, if the hash is for the version we hold.
    pub fn prepare(
        id: DocumentId,
        expected: &ContentHash,
        local_version: Version,
        content: &Delta,
    ) -> Option<Self> {
        if expected.version != local_version {
            log::debug!(
                "Skipping verification of document {}: hash is for version {}, local is {}",
                id,
                expected.version,
                local_version
            );
            return None;
        }
        Some(Self {
            id,
            version: local_version,
            expected: expected.hash.clone(),
            text: content.inserted_text(),
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Digest the snapshot and compare.
    pub fn run(self) -> Result<(), SyncError> {
        let actual = content_digest(&self.text);
        if actual == self.expected {
            return Ok(());
        }
        Err(SyncError::ContentMismatch {
            id: self.id,
            version: self.version,
            expected: self.expected,
            actual,
        })
    }

    /// Run on the blocking pool.
    pub async fn run_blocking(self) -> Result<(), SyncError> {
        let id = self.id;
        joined(id, tokio::task::spawn_blocking(move || self.run()).await)
    }
}

fn joined(
    id: DocumentId,
    outcome: Result<Result<(), SyncError>, tokio::task::JoinError>,
) -> Result<(), SyncError> {
    outcome.unwrap_or_else(|e| {
        log::warn!("Verification of document {} did not finish: {}", id, e);
        Err(SyncError::Transport(format!(
            "verification of document {} did not finish: {}",
            id, e
        )))
    })
}
