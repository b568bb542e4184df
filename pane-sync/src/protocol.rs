//! JSON wire protocol between the client and the authority.
//!
//! ```text
//! client                                   authority
//!   │── {"session":…,"client":…} ───────────▶│   handshake (nullable ids)
//!   │◀────────── {"session":…,"client":…} ───│   handshake reply
//!   │◀── {"updates":{id:{base,version,…}},   │
//!   │     "hashes":{id:{hash,version}}} ─────│   inbound update
//!   │── {"action":…,"changes":[…],           │
//!   │    "acks":{id:version}} ──────────────▶│   outbound payload
//! ```
//!
//! Document ids come in pairs: an odd id for a row's label stream and the
//! next even id for its content. Id 0 is the layout document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delta::Delta;
use crate::error::SyncError;

pub type DocumentId = u32;
pub type Version = u32;

/// The document whose text encodes the column/row structure.
pub const LAYOUT_ID: DocumentId = 0;

/// Label stream id of the row owning `id`.
pub fn label_id(id: DocumentId) -> DocumentId {
    if id % 2 == 1 {
        id
    } else {
        id.saturating_sub(1)
    }
}

/// Content stream id of the row owning `id`.
pub fn content_id(id: DocumentId) -> DocumentId {
    label_id(id) + 1
}

/// Handshake sent on every socket open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub session: Option<Uuid>,
    pub client: Option<Uuid>,
}

/// Handshake reply. Both ids must be present for the session to start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    #[serde(default)]
    pub session: Option<Uuid>,
    #[serde(default)]
    pub client: Option<Uuid>,
}

impl HandshakeReply {
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|e| SyncError::MalformedHandshake(e.to_string()))
    }
}

/// A remote edit to one document, stamped with the version it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUpdate<O = Delta> {
    #[serde(default)]
    pub base: Version,
    pub version: Version,
    #[serde(default)]
    pub delta: O,
    #[serde(default)]
    pub last_committed_client_version: Option<u32>,
}

impl<O> RemoteUpdate<O> {
    /// Highest client version the authority has committed for this client.
    pub fn last_committed(&self) -> u32 {
        self.last_committed_client_version.unwrap_or(0)
    }
}

/// Authority-side digest of a document at a given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub hash: String,
    pub version: Version,
}

/// Application message received once the session is ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage<O = Delta> {
    #[serde(default)]
    pub updates: BTreeMap<DocumentId, RemoteUpdate<O>>,
    #[serde(default)]
    pub hashes: BTreeMap<DocumentId, ContentHash>,
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Local change as sent to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientChange<O = Delta> {
    pub id: DocumentId,
    pub delta: O,
    pub base: Version,
    pub client_version: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub index: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub id: DocumentId,
    pub range: Range,
}

/// A command picked out of a document by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: DocumentId,
    pub index: u32,
    pub command: String,
    pub selection: Selection,
}

/// User actions. `execute` and `search` travel to the authority; the column
/// commands only ever touch the local layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Execute(CommandRequest),
    Search(CommandRequest),
    AddColumn,
    RemoveColumn { id: DocumentId },
}

impl Action {
    pub fn is_local(&self) -> bool {
        matches!(self, Action::AddColumn | Action::RemoveColumn { .. })
    }
}

/// Flushed changes plus the running acknowledgement table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPayload<O = Delta> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<ClientChange<O>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub acks: BTreeMap<DocumentId, Version>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Handshake(HandshakeRequest),
    Payload(OutboundPayload),
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Operation;

    #[test]
    fn test_row_id_pairs() {
        assert_eq!(label_id(3), 3);
        assert_eq!(label_id(4), 3);
        assert_eq!(content_id(3), 4);
        assert_eq!(content_id(4), 4);
        assert_eq!(label_id(LAYOUT_ID), 0);
    }

    #[test]
    fn test_first_handshake_has_null_ids() {
        let msg = OutboundMessage::Handshake(HandshakeRequest::default());
        assert_eq!(msg.encode().unwrap(), r#"{"session":null,"client":null}"#);
    }

    #[test]
    fn test_handshake_reply_missing_client() {
        let reply =
            HandshakeReply::decode(r#"{"session":"550e8400-e29b-41d4-a716-446655440000"}"#).unwrap();
        assert!(reply.session.is_some());
        assert!(reply.client.is_none());
    }

    #[test]
    fn test_handshake_reply_garbage() {
        let err = HandshakeReply::decode("not json").unwrap_err();
        assert!(matches!(err, SyncError::MalformedHandshake(_)));
    }

    #[test]
    fn test_decode_inbound_update() {
        let text = r#"{
            "updates": {
                "0": {"id": 0, "base": 0, "version": 2,
                      "delta": {"ops": [{"insert": "1 0 0\n2 0 0\n"}]},
                      "last_committed_client_version": null},
                "4": {"base": 3, "version": 5, "delta": {"ops": [{"retain": 2}, {"insert": "x"}]},
                      "last_committed_client_version": 7}
            },
            "hashes": {"0": {"hash": "abc", "version": 2}}
        }"#;
        let msg = InboundMessage::decode(text).unwrap();

        let layout = &msg.updates[&0];
        assert_eq!(layout.version, 2);
        assert_eq!(layout.last_committed(), 0);
        assert_eq!(layout.delta.inserted_text(), "1 0 0\n2 0 0\n");

        let content = &msg.updates[&4];
        assert_eq!(content.base, 3);
        assert_eq!(content.last_committed(), 7);

        assert_eq!(msg.hashes[&0].version, 2);
    }

    #[test]
    fn test_decode_without_hashes() {
        let msg = InboundMessage::decode(r#"{"updates":{}}"#).unwrap();
        assert!(msg.updates.is_empty());
        assert!(msg.hashes.is_empty());
    }

    #[test]
    fn test_payload_omits_empty_fields() {
        let msg = OutboundMessage::Payload(OutboundPayload {
            action: None,
            changes: Vec::new(),
            acks: BTreeMap::from([(0, 3)]),
        });
        assert_eq!(msg.encode().unwrap(), r#"{"acks":{"0":3}}"#);
    }

    #[test]
    fn test_payload_with_action_and_change() {
        let action = Action::Execute(CommandRequest {
            id: 2,
            index: 4,
            command: "Put".into(),
            selection: Selection { id: 2, range: Range { index: 4, length: 0 } },
        });
        let msg = OutboundMessage::Payload(OutboundPayload {
            action: Some(action),
            changes: vec![ClientChange {
                id: 2,
                delta: Delta::new().insert("a"),
                base: 1,
                client_version: 1,
            }],
            acks: BTreeMap::new(),
        });
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["action"]["type"], "execute");
        assert_eq!(value["action"]["command"], "Put");
        assert_eq!(value["action"]["selection"]["range"]["index"], 4);
        assert_eq!(value["changes"][0]["client_version"], 1);
        assert_eq!(value["changes"][0]["delta"]["ops"][0]["insert"], "a");
    }

    #[test]
    fn test_local_actions() {
        assert!(Action::AddColumn.is_local());
        assert!(Action::RemoveColumn { id: 3 }.is_local());
        let remote: Action = serde_json::from_str(
            r#"{"type":"search","id":1,"index":0,"command":"foo","selection":{"id":1,"range":{"index":0,"length":3}}}"#,
        )
        .unwrap();
        assert!(!remote.is_local());
    }
}
