//! JSON wire protocol between editors and the hub.
//!
//! Every WebSocket text frame carries one event:
//! ```text
//! {"event": "get-document",    "payload": "doc1"}
//! {"event": "send-changes",    "payload": {"ops": [...]}}
//! {"event": "receive-changes", "payload": {"ops": [...]}}
//! {"event": "ping"}
//! ```
//!
//! Operations are forwarded verbatim; the hub never looks inside them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use whitespace_core::Delta;

/// Identity of one connected editor. Fresh per connection, so a reconnect is
/// always a new client.
pub type ClientId = Uuid;

/// Longest accepted document identifier.
pub const MAX_DOCUMENT_ID_LEN: usize = 128;

/// Validated document identifier.
///
/// Identifiers are generated by the document list (typically a UUID string);
/// the hub only checks they are well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_DOCUMENT_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ProtocolError::InvalidDocumentId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = ProtocolError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Events sent by an editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join the room for a document; answered with `load-document` or `error`.
    GetDocument(String),
    /// An operation to apply and relay to the other editors.
    SendChanges(Delta),
    /// Explicit flush request. The hub persists its own snapshot.
    SaveDocument(Delta),
    Ping,
}

/// Events sent by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full snapshot for a freshly joined editor.
    LoadDocument(Delta),
    /// An operation produced by another editor in the room.
    ReceiveChanges(Delta),
    Error(String),
    Pong,
}

impl ClientEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid document ID: {0:?}")]
    InvalidDocumentId(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_id_validation() {
        assert!(DocumentId::parse("doc1").is_ok());
        assert!(DocumentId::parse("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(DocumentId::parse("my_doc").is_ok());

        assert!(DocumentId::parse("").is_err());
        assert!(DocumentId::parse("../etc/passwd").is_err());
        assert!(DocumentId::parse("has space").is_err());
        assert!(DocumentId::parse(&"a".repeat(MAX_DOCUMENT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_get_document_wire_shape() {
        let frame = ClientEvent::GetDocument("doc1".into()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"event": "get-document", "payload": "doc1"}));
    }

    #[test]
    fn test_send_changes_decodes_quill_delta() {
        let frame = r#"{"event":"send-changes","payload":{"ops":[{"retain":2},{"insert":"hi"}]}}"#;
        let event = ClientEvent::decode(frame).unwrap();
        assert_eq!(event, ClientEvent::SendChanges(Delta::new().retain(2).insert("hi")));
    }

    #[test]
    fn test_server_events_wire_shape() {
        let load = ServerEvent::LoadDocument(Delta::new().insert("x")).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&load).unwrap();
        assert_eq!(value, json!({"event": "load-document", "payload": {"ops": [{"insert": "x"}]}}));

        let error = ServerEvent::Error("Invalid document ID".into()).encode().unwrap();
        assert!(error.contains(r#""event":"error""#));
    }

    #[test]
    fn test_ping_has_no_payload() {
        let frame = ClientEvent::Ping.encode().unwrap();
        assert_eq!(frame, r#"{"event":"ping"}"#);
        assert_eq!(ClientEvent::decode(&frame).unwrap(), ClientEvent::Ping);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(ClientEvent::decode("not json").is_err());
        assert!(ClientEvent::decode(r#"{"event":"unknown"}"#).is_err());
        assert!(ServerEvent::decode(r#"{"payload":1}"#).is_err());
    }
}
