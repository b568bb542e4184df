//! Reconciliation of remote updates with buffered local edits.

use std::collections::BTreeMap;

use crate::buffer::{ChangeBuffer, FlushOutcome};
use crate::delta::{Delta, Operation};
use crate::error::SyncError;
use crate::protocol::{DocumentId, RemoteUpdate, Version};

/// Last acknowledged remote version per document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckTable {
    versions: BTreeMap<DocumentId, Version>,
}

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known version of `id`, 0 when nothing was received yet.
    pub fn get(&self, id: DocumentId) -> Version {
        self.versions.get(&id).copied().unwrap_or(0)
    }

    /// Returns true when the stored version changed.
    pub fn set(&mut self, id: DocumentId, version: Version) -> bool {
        self.versions.insert(id, version) != Some(version)
    }

    pub fn snapshot(&self) -> BTreeMap<DocumentId, Version> {
        self.versions.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn clear(&mut self) {
        self.versions.clear();
    }
}

/// Outcome of reconciling one remote update.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<O = Delta> {
    pub id: DocumentId,
    /// Remote delta rebased over local edits, ready to apply to local content.
    pub delta: O,
    pub version: Version,
    /// The in-flight change for `id` was committed by this update.
    pub acknowledged: bool,
    pub ack_changed: bool,
}

/// Change buffer plus ack table: everything needed to keep one client's
/// documents converging with the authority.
#[derive(Debug, Clone)]
pub struct Reconciler<O = Delta> {
    buffer: ChangeBuffer<O>,
    acks: AckTable,
}

impl<O> Default for Reconciler<O> {
    fn default() -> Self {
        Self {
            buffer: ChangeBuffer::default(),
            acks: AckTable::default(),
        }
    }
}

impl<O: Operation> Reconciler<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_edit(
        &mut self,
        id: DocumentId,
        delta: &O,
        base: Version,
    ) -> Result<(), SyncError> {
        self.buffer.record(id, delta, base)
    }

    pub fn flush(&mut self, resend_in_flight: bool) -> FlushOutcome<O> {
        self.buffer.flush(resend_in_flight)
    }

    /// Reconcile a remote update for `id`.
    ///
    /// An update whose base disagrees with the ack table is rejected and
    /// leaves every buffer untouched.
    pub fn reconcile(
        &mut self,
        id: DocumentId,
        update: &RemoteUpdate<O>,
    ) -> Result<Reconciled<O>, SyncError> {
        let acked = self.acks.get(id);
        if update.base != acked {
            log::warn!(
                "Discarding update for document {}: base {} does not match acknowledged {}",
                id,
                update.base,
                acked
            );
            return Err(SyncError::BaseMismatch {
                id,
                base: update.base,
                acked,
            });
        }

        let acknowledged = self.buffer.acknowledge(id, update.last_committed());
        let delta = self.buffer.rebase(id, &update.delta, update.version);
        let ack_changed = self.acks.set(id, update.version);

        Ok(Reconciled {
            id,
            delta,
            version: update.version,
            acknowledged,
            ack_changed,
        })
    }

    pub fn acks(&self) -> &AckTable {
        &self.acks
    }

    pub fn buffer(&self) -> &ChangeBuffer<O> {
        &self.buffer
    }

    pub fn is_unsynced(&self, id: DocumentId) -> bool {
        self.buffer.is_unsynced(id)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.acks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(base: Version, version: Version, delta: Delta, committed: Option<u32>) -> RemoteUpdate {
        RemoteUpdate {
            base,
            version,
            delta,
            last_committed_client_version: committed,
        }
    }

    #[test]
    fn test_ack_table_set_reports_change() {
        let mut acks = AckTable::new();
        assert_eq!(acks.get(3), 0);
        assert!(acks.set(3, 2));
        assert!(!acks.set(3, 2));
        assert!(acks.set(3, 4));
        assert_eq!(acks.snapshot(), BTreeMap::from([(3, 4)]));
    }

    #[test]
    fn test_base_mismatch_leaves_state_unchanged() {
        let mut reconciler = Reconciler::new();
        reconciler
            .reconcile(2, &update(0, 3, Delta::from_text("abc"), None))
            .unwrap();
        reconciler.record_local_edit(2, &Delta::new().insert("x"), 3).unwrap();
        reconciler.flush(false);
        reconciler
            .record_local_edit(2, &Delta::new().retain(1).insert("y"), 3)
            .unwrap();

        let buffer_before = reconciler.buffer().clone();
        let acks_before = reconciler.acks().clone();

        let err = reconciler
            .reconcile(2, &update(5, 6, Delta::new().insert("z"), Some(1)))
            .unwrap_err();
        assert_eq!(err, SyncError::BaseMismatch { id: 2, base: 5, acked: 3 });

        assert_eq!(reconciler.acks(), &acks_before);
        assert_eq!(reconciler.buffer().pending(2), buffer_before.pending(2));
        assert_eq!(reconciler.buffer().in_flight(2), buffer_before.in_flight(2));
        assert_eq!(reconciler.buffer().last_committed(2), 0);
    }

    #[test]
    fn test_acknowledgement_clears_in_flight() {
        let mut reconciler = Reconciler::new();
        reconciler.record_local_edit(4, &Delta::new().insert("a"), 0).unwrap();
        let sent = reconciler.flush(false);
        assert_eq!(sent.changes[0].client_version, 1);

        let result = reconciler
            .reconcile(4, &update(0, 1, Delta::new(), Some(1)))
            .unwrap();
        assert!(result.acknowledged);
        assert!(result.ack_changed);
        assert!(result.delta.is_noop());
        assert!(!reconciler.is_unsynced(4));
        assert_eq!(reconciler.acks().get(4), 1);
    }

    #[test]
    fn test_unrelated_update_keeps_in_flight() {
        let mut reconciler = Reconciler::new();
        reconciler.record_local_edit(4, &Delta::new().insert("a"), 0).unwrap();
        reconciler.flush(false);

        let result = reconciler
            .reconcile(4, &update(0, 1, Delta::new().insert("b"), None))
            .unwrap();
        assert!(!result.acknowledged);
        assert!(reconciler.buffer().has_in_flight(4));
        // remote insert wins the tie at position 0
        assert_eq!(result.delta.apply_to_text("a"), "ba");
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let mut reconciler = Reconciler::new();
        reconciler
            .reconcile(2, &update(0, 1, Delta::from_text("hello world"), None))
            .unwrap();

        let local = Delta::new().retain(5).insert(",");
        reconciler.record_local_edit(2, &local, 1).unwrap();
        let local_content = local.apply_to_text("hello world");

        let remote = Delta::new().retain(6).delete(5).insert("there");
        let result = reconciler.reconcile(2, &update(1, 2, remote.clone(), None)).unwrap();
        let client_view = result.delta.apply_to_text(&local_content);

        let rebased = &reconciler.buffer().pending(2).unwrap().delta;
        let authority_view = rebased.apply_to_text(&remote.apply_to_text("hello world"));

        assert_eq!(client_view, authority_view);
        assert_eq!(client_view, "hello, there");
        assert_eq!(reconciler.buffer().pending(2).unwrap().base, 2);
    }
}
