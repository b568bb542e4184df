//! # pane-sync — Client-side synchronization for a multi-pane text editor
//!
//! Keeps many independently versioned text documents ("rows", grouped in
//! columns) converging with a remote authority using operational transform.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  commands   ┌─────────────┐   WebSocket (JSON)  ┌─────────────┐
//! │ Editor host │ ──────────► │ SyncClient  │ ◄─────────────────► │  Authority  │
//! │             │ ◄────────── │ (event loop)│                     │             │
//! └─────────────┘ ViewUpdate  └──────┬──────┘                     └─────────────┘
//!                                    │
//!                                    ▼
//!                             ┌─────────────┐
//!                             │ SyncEngine  │
//!                             ├─────────────┤
//!                             │ Reconciler  │  pending / in-flight / acks
//!                             │ Layout      │  document 0 ⇄ columns/rows
//!                             │ Connection  │  handshake + backoff
//!                             └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`delta`] — Retain/insert/delete operations with compose and transform
//! - [`protocol`] — JSON wire types
//! - [`buffer`] — Pending and in-flight changes per document
//! - [`reconciler`] — Ack table and remote update reconciliation
//! - [`connection`] — Sans-IO session state machine
//! - [`layout`] — Layout document codec, row placement, drag gestures
//! - [`verify`] — SHA-256 content verification
//! - [`engine`] — The single owner of all sync state
//! - [`client`] — tokio event loop over tokio-tungstenite

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod delta;
pub mod engine;
pub mod error;
pub mod layout;
pub mod protocol;
pub mod reconciler;
pub mod verify;

// Re-exports for convenience
pub use buffer::{ChangeBuffer, FlushOutcome, InFlightChange, PendingChange};
pub use client::{ClientCommand, ClientHandle, SyncClient};
pub use config::ClientConfig;
pub use connection::{Backoff, Connection, ConnectionEvent, ConnectionState, Transport};
pub use delta::{Delta, DeltaError, Op, Operation};
pub use engine::{EditorHost, RowChange, SyncEngine, ViewUpdate};
pub use error::{FaultKind, SyncError};
pub use layout::{Column, Gesture, Layout, LayoutError, Row, SizeHint};
pub use protocol::{
    content_id, label_id, Action, ClientChange, CommandRequest, ContentHash, DocumentId,
    HandshakeReply, HandshakeRequest, InboundMessage, OutboundMessage, OutboundPayload, Range,
    RemoteUpdate, Selection, Version, LAYOUT_ID,
};
pub use reconciler::{AckTable, Reconciled, Reconciler};
pub use verify::{content_digest, VerificationJob};
