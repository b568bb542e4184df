//! Per-document buffering of local edits.
//!
//! A document holds at most one pending change (edits not yet sent) and at
//! most one in-flight change (sent, waiting for the authority to commit it).
//! New local edits always land in pending, never in the in-flight slot.

use std::collections::{BTreeMap, HashMap};

use crate::delta::{Delta, Operation};
use crate::error::SyncError;
use crate::protocol::{ClientChange, DocumentId, Version};

/// Local edits not yet sent, composed against remote version `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange<O = Delta> {
    pub id: DocumentId,
    pub delta: O,
    pub base: Version,
}

/// A sent change awaiting commit, stamped with its client version.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightChange<O = Delta> {
    pub id: DocumentId,
    pub delta: O,
    pub base: Version,
    pub client_version: u32,
}

impl<O: Clone> InFlightChange<O> {
    pub fn to_client_change(&self) -> ClientChange<O> {
        ClientChange {
            id: self.id,
            delta: self.delta.clone(),
            base: self.base,
            client_version: self.client_version,
        }
    }
}

/// Result of promoting pending changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushOutcome<O = Delta> {
    /// Changes to put on the wire, ordered by document id.
    pub changes: Vec<ClientChange<O>>,
    /// Documents whose pending edits stay buffered behind an in-flight change.
    pub held_back: Vec<DocumentId>,
}

impl<O> FlushOutcome<O> {
    pub fn is_held_back(&self) -> bool {
        !self.held_back.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChangeBuffer<O = Delta> {
    pending: BTreeMap<DocumentId, PendingChange<O>>,
    in_flight: BTreeMap<DocumentId, InFlightChange<O>>,
    /// Highest client version the authority committed, per document.
    committed: HashMap<DocumentId, u32>,
}

impl<O> Default for ChangeBuffer<O> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            committed: HashMap::new(),
        }
    }
}

impl<O: Operation> ChangeBuffer<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose a local edit into the pending change for `id`.
    ///
    /// Fails without touching the buffer when a pending change exists with a
    /// different base. A composition that cancels out drops the entry.
    pub fn record(&mut self, id: DocumentId, delta: &O, base: Version) -> Result<(), SyncError> {
        let emptied = match self.pending.get_mut(&id) {
            Some(pending) if pending.base != base => {
                return Err(SyncError::VersionMismatch {
                    id,
                    buffered: pending.base,
                    got: base,
                });
            }
            Some(pending) => {
                pending.delta = pending.delta.compose(delta);
                pending.delta.is_noop()
            }
            None => {
                if !delta.is_noop() {
                    self.pending.insert(
                        id,
                        PendingChange {
                            id,
                            delta: delta.clone(),
                            base,
                        },
                    );
                }
                false
            }
        };
        if emptied {
            self.pending.remove(&id);
        }
        Ok(())
    }

    /// Promote pending changes to in-flight.
    ///
    /// A document that already has an in-flight change keeps its pending
    /// edits and is reported in `held_back`. With `resend_in_flight`, every
    /// outstanding in-flight change is included again.
    pub fn flush(&mut self, resend_in_flight: bool) -> FlushOutcome<O> {
        let mut held_back = Vec::new();
        let mut promoted = Vec::new();

        let ids: Vec<DocumentId> = self.pending.keys().copied().collect();
        for id in ids {
            if self.in_flight.contains_key(&id) {
                held_back.push(id);
                continue;
            }
            if let Some(pending) = self.pending.remove(&id) {
                let change = InFlightChange {
                    id,
                    delta: pending.delta,
                    base: pending.base,
                    client_version: self.last_committed(id) + 1,
                };
                log::debug!(
                    "Promoting change on document {} (base {}, client version {})",
                    id,
                    change.base,
                    change.client_version
                );
                self.in_flight.insert(id, change);
                promoted.push(id);
            }
        }

        let changes = self
            .in_flight
            .values()
            .filter(|c| resend_in_flight || promoted.contains(&c.id))
            .map(InFlightChange::to_client_change)
            .collect();

        FlushOutcome { changes, held_back }
    }

    /// Record that the authority committed client versions up to
    /// `last_committed` for `id`.
    ///
    /// Returns true when this clears the in-flight change.
    pub fn acknowledge(&mut self, id: DocumentId, last_committed: u32) -> bool {
        let committed = self.committed.entry(id).or_insert(0);
        *committed = (*committed).max(last_committed);

        match self.in_flight.get(&id) {
            Some(change) if last_committed >= change.client_version => {
                log::debug!(
                    "Document {} acknowledged client version {}",
                    id,
                    change.client_version
                );
                self.in_flight.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Rebase local edits for `id` over a remote delta now at `version`.
    ///
    /// The remote delta wins position ties. Returns the remote delta
    /// transformed so it applies on top of the local edits.
    pub fn rebase(&mut self, id: DocumentId, remote: &O, version: Version) -> O {
        let mut remote = remote.clone();

        if let Some(change) = self.in_flight.get_mut(&id) {
            let local = remote.transform(&change.delta, true);
            remote = change.delta.transform(&remote, false);
            change.delta = local;
            change.base = version;
        }
        if let Some(change) = self.pending.get_mut(&id) {
            let local = remote.transform(&change.delta, true);
            remote = change.delta.transform(&remote, false);
            change.delta = local;
            change.base = version;
        }

        remote
    }

    pub fn pending(&self, id: DocumentId) -> Option<&PendingChange<O>> {
        self.pending.get(&id)
    }

    pub fn in_flight(&self, id: DocumentId) -> Option<&InFlightChange<O>> {
        self.in_flight.get(&id)
    }

    pub fn has_pending(&self, id: DocumentId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn has_in_flight(&self, id: DocumentId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Whether `id` has local edits the authority has not committed.
    pub fn is_unsynced(&self, id: DocumentId) -> bool {
        self.has_pending(id) || self.has_in_flight(id)
    }

    pub fn last_committed(&self, id: DocumentId) -> u32 {
        self.committed.get(&id).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.committed.clear();
    }
}
