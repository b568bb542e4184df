//! The synchronization engine.
//!
//! One `SyncEngine` owns every piece of sync state for a session: the change
//! buffer and ack table, the layout document and queued verifications. The
//! editor side is reached through [`EditorHost`], the wire through
//! [`Transport`]. All methods run to completion on the caller's task.

use std::collections::BTreeMap;

use crate::connection::Transport;
use crate::delta::Delta;
use crate::error::{FaultKind, SyncError};
use crate::layout::{Column, Gesture, Layout, LayoutError, SizeHint};
use crate::protocol::{
    Action, DocumentId, InboundMessage, OutboundMessage, OutboundPayload, Version, LAYOUT_ID,
};
use crate::reconciler::Reconciler;
use crate::verify::VerificationJob;

/// A document that advanced to a new remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowChange {
    pub id: DocumentId,
    pub version: Version,
}

/// Merged changes for the rendering layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewUpdate {
    /// New column tree, when it changed.
    pub layout: Option<Vec<Column>>,
    pub rows: Vec<RowChange>,
    /// Per document: whether it still has unsynced local edits.
    pub dirty_changes: BTreeMap<DocumentId, bool>,
}

impl ViewUpdate {
    pub fn is_empty(&self) -> bool {
        self.layout.is_none() && self.rows.is_empty() && self.dirty_changes.is_empty()
    }
}

/// The editor widget side of the engine.
pub trait EditorHost {
    /// Apply a reconciled remote delta to the local content of `id`.
    fn apply_remote_delta(&mut self, id: DocumentId, delta: &Delta, version: Version);

    /// Replace the whole local content of `id`. Used when the authority
    /// sends a document from version 0 and nothing local is unsynced.
    fn replace_content(&mut self, id: DocumentId, content: &Delta, version: Version);

    /// Current local content of `id`, for verification.
    fn contents(&self, id: DocumentId) -> Option<Delta>;

    fn render(&mut self, update: ViewUpdate);

    /// Surface a fault to the user.
    fn signal_error(&mut self, error: &SyncError);
}

pub struct SyncEngine<H, T> {
    host: H,
    transport: T,
    reconciler: Reconciler<Delta>,
    layout: Layout,
    verifications: Vec<VerificationJob>,
}

impl<H: EditorHost, T: Transport> SyncEngine<H, T> {
    pub fn new(host: H, transport: T) -> Self {
        Self {
            host,
            transport,
            reconciler: Reconciler::new(),
            layout: Layout::new(),
            verifications: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Local input
    // ---------------------------------------------------------------

    /// Buffer a local edit to document `id`, made against remote `base`.
    pub fn record_local_edit(
        &mut self,
        id: DocumentId,
        delta: &Delta,
        base: Version,
    ) -> Result<(), SyncError> {
        if let Err(e) = self.reconciler.record_local_edit(id, delta, base) {
            log::warn!("Rejected local edit: {}", e);
            return Err(e);
        }
        self.host.render(ViewUpdate {
            dirty_changes: BTreeMap::from([(id, self.reconciler.is_unsynced(id))]),
            ..ViewUpdate::default()
        });
        Ok(())
    }

    /// Dispatch a user action. Column commands stay local; everything else
    /// goes out with the buffered changes.
    pub fn action(&mut self, action: Action) -> Result<(), SyncError> {
        if !action.is_local() {
            return self.flush(Some(action));
        }
        match action {
            Action::AddColumn => {
                self.layout.add_column();
                self.render_layout();
                Ok(())
            }
            Action::RemoveColumn { id } => {
                match self.layout.remove_column(id) {
                    Ok(()) => self.render_layout(),
                    Err(e) => log::warn!("Cannot remove column: {}", e),
                }
                Ok(())
            }
            Action::Execute(_) | Action::Search(_) => Ok(()),
        }
    }

    /// Send buffered changes, the ack table and an optional action.
    ///
    /// Refuses before touching any buffer when the transport is not ready.
    pub fn flush(&mut self, action: Option<Action>) -> Result<(), SyncError> {
        if !self.transport.is_ready() {
            let err = SyncError::NotConnected;
            log::error!("Cannot flush: {}", err);
            self.host.signal_error(&err);
            return Err(err);
        }
        self.send_payload(action, false)
    }

    /// Connection reached the ready state: resend everything still in flight.
    pub fn on_ready(&mut self) {
        if let Err(e) = self.send_payload(None, true) {
            log::warn!("Resend after reconnect failed: {}", e);
        }
    }

    fn send_payload(&mut self, action: Option<Action>, resend: bool) -> Result<(), SyncError> {
        if let Some(delta) = self.layout.generate_size_change() {
            let base = self.reconciler.acks().get(LAYOUT_ID);
            if let Err(e) = self.reconciler.record_local_edit(LAYOUT_ID, &delta, base) {
                log::warn!("Dropping size change: {}", e);
            }
        }

        let outcome = self.reconciler.flush(resend);
        let action = match action {
            Some(action) if outcome.is_held_back() => {
                log::warn!(
                    "Holding back {:?} action: documents {:?} still wait for an earlier change",
                    action,
                    outcome.held_back
                );
                None
            }
            action => action,
        };

        let payload = OutboundPayload {
            action,
            changes: outcome.changes,
            acks: self.reconciler.acks().snapshot(),
        };
        if payload.action.is_none() && payload.changes.is_empty() && payload.acks.is_empty() {
            return Ok(());
        }

        log::debug!(
            "Sending {} changes, {} acks",
            payload.changes.len(),
            payload.acks.len()
        );
        if let Err(e) = self.transport.send(&OutboundMessage::Payload(payload)) {
            log::error!("Send failed: {}", e);
            if e.kind() == FaultKind::UserFacing {
                self.host.signal_error(&e);
            }
            return Err(e);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Remote input
    // ---------------------------------------------------------------

    /// Reconcile an application message from the authority.
    pub fn handle_message(&mut self, message: InboundMessage) {
        let mut view = ViewUpdate::default();
        let mut ack_changed = false;

        for (&id, update) in &message.updates {
            let reconciled = match self.reconciler.reconcile(id, update) {
                Ok(reconciled) => reconciled,
                Err(_) => continue,
            };
            ack_changed |= reconciled.ack_changed;

            if id == LAYOUT_ID {
                if self.layout.update(reconciled.version, &reconciled.delta) {
                    view.layout = Some(self.layout.columns().to_vec());
                }
            } else {
                if update.base == 0 && !self.reconciler.is_unsynced(id) {
                    // full content, e.g. the replay after a session reset
                    self.host
                        .replace_content(id, &reconciled.delta, reconciled.version);
                } else {
                    self.host
                        .apply_remote_delta(id, &reconciled.delta, reconciled.version);
                }
                view.rows.push(RowChange {
                    id,
                    version: reconciled.version,
                });
            }

            if reconciled.acknowledged {
                view.dirty_changes.insert(id, self.reconciler.is_unsynced(id));
            }
        }

        for (&id, hash) in &message.hashes {
            if self.reconciler.is_unsynced(id) {
                log::debug!("Skipping verification of document {} with unsynced edits", id);
                continue;
            }
            let job = if id == LAYOUT_ID {
                VerificationJob::prepare(id, hash, self.layout.version(), self.layout.data())
            } else {
                let version = self.reconciler.acks().get(id);
                self.host
                    .contents(id)
                    .and_then(|content| VerificationJob::prepare(id, hash, version, &content))
            };
            self.verifications.extend(job);
        }

        if !view.is_empty() {
            self.host.render(view);
        }
        if ack_changed {
            // keep the authority's view of our acks current
            if let Err(e) = self.flush(None) {
                log::warn!("Ack flush failed: {}", e);
            }
        }
    }

    /// Verification jobs collected since the last call.
    pub fn take_verifications(&mut self) -> Vec<VerificationJob> {
        std::mem::take(&mut self.verifications)
    }

    pub fn report_verification(&mut self, result: Result<(), SyncError>) {
        if let Err(e) = result {
            log::warn!("{}", e);
            self.host.signal_error(&e);
        }
    }

    // ---------------------------------------------------------------
    // Layout gestures
    // ---------------------------------------------------------------

    pub fn move_row(&mut self, id: DocumentId, x: f64, y: f64) -> Result<Gesture, LayoutError> {
        match self.layout.move_row(id, x, y) {
            Ok(gesture) => {
                log::debug!("Row {} drag resolved to {:?}", id, gesture);
                self.render_layout();
                Ok(gesture)
            }
            Err(e) => {
                log::warn!("Ignoring drag of row {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Record rendered editor sizes; they go out with the next flush.
    pub fn update_sizes(&mut self, sizes: &BTreeMap<DocumentId, SizeHint>) {
        self.layout.update_sizes(sizes);
    }

    fn render_layout(&mut self) {
        self.host.render(ViewUpdate {
            layout: Some(self.layout.columns().to_vec()),
            ..ViewUpdate::default()
        });
    }

    /// Drop all session state so the authority can replay it from scratch.
    pub fn reset(&mut self) {
        log::info!("Resetting sync state");
        self.reconciler.clear();
        self.layout.reset();
        self.verifications.clear();
        self.render_layout();
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn reconciler(&self) -> &Reconciler<Delta> {
        &self.reconciler
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
