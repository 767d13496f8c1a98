//! JSON wire protocol.
//!
//! One JSON object per WebSocket frame, discriminated by its `type` field.
//! Binary CRDT payloads travel as arrays of byte values:
//!
//! ```text
//! client → server   {"type":"join","key":"doc1"}
//!                   {"type":"setupPassword","password":"secret"}
//!                   {"type":"verifyPassword","password":"secret"}
//!                   {"type":"update","update":[1,0,129,...]}
//!                   {"type":"awareness","awareness":<any JSON>}
//!
//! server → client   {"type":"needsPasswordSetup"}  {"type":"needsPassword"}
//!                   {"type":"authenticated"}       {"type":"sync","update":[...]}
//!                   {"type":"update","update":[...]}
//!                   {"type":"userCount","count":2}
//!                   {"type":"awareness","awareness":<any JSON>}
//!                   {"type":"error","message":"Invalid password"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Request to join a document. A missing or empty key falls back to
    /// the key derived from the upgrade request path.
    Join {
        #[serde(default)]
        key: Option<String>,
    },
    /// First user sets the document password.
    SetupPassword { password: String },
    /// Later users prove they know it.
    VerifyPassword { password: String },
    /// Incremental CRDT update.
    Update { update: Vec<u8> },
    /// Cursor/selection presence blob, never inspected.
    Awareness { awareness: Value },
}

impl ClientMessage {
    /// Parse one inbound frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Serialize for sending (clients and tests).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Variant name as it appears on the wire, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::SetupPassword { .. } => "setupPassword",
            Self::VerifyPassword { .. } => "verifyPassword",
            Self::Update { .. } => "update",
            Self::Awareness { .. } => "awareness",
        }
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    NeedsPasswordSetup,
    NeedsPassword,
    Authenticated,
    /// Full document snapshot, sent right after authentication.
    Sync { update: Vec<u8> },
    /// Incremental update relayed from another member.
    Update { update: Vec<u8> },
    UserCount { count: usize },
    Awareness { awareness: Value },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join() {
        let msg = ClientMessage::decode(r#"{"type":"join","key":"doc1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Join { key: Some("doc1".into()) });
    }

    #[test]
    fn test_decode_join_without_key() {
        let msg = ClientMessage::decode(r#"{"type":"join"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Join { key: None });
    }

    #[test]
    fn test_decode_password_messages() {
        let setup =
            ClientMessage::decode(r#"{"type":"setupPassword","password":"secret"}"#).unwrap();
        assert_eq!(setup, ClientMessage::SetupPassword { password: "secret".into() });

        let verify = ClientMessage::decode(r#"{"type":"verifyPassword","password":"x"}"#).unwrap();
        assert_eq!(verify.kind(), "verifyPassword");
    }

    #[test]
    fn test_update_bytes_as_number_array() {
        let msg = ClientMessage::decode(r#"{"type":"update","update":[1,0,255]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Update { update: vec![1, 0, 255] });

        let out = ServerMessage::Update { update: vec![1, 0, 255] }.encode().unwrap();
        assert_eq!(out, r#"{"type":"update","update":[1,0,255]}"#);
    }

    #[test]
    fn test_update_byte_out_of_range_rejected() {
        assert!(ClientMessage::decode(r#"{"type":"update","update":[256]}"#).is_err());
        assert!(ClientMessage::decode(r#"{"type":"update","update":[-1]}"#).is_err());
    }

    #[test]
    fn test_awareness_is_opaque() {
        let blob = json!({"clients": {"7": {"cursor": {"anchor": 3, "head": 9}}}});
        let frame = json!({"type": "awareness", "awareness": blob.clone()}).to_string();
        match ClientMessage::decode(&frame).unwrap() {
            ClientMessage::Awareness { awareness } => assert_eq!(awareness, blob),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unit_server_messages() {
        assert_eq!(
            ServerMessage::NeedsPasswordSetup.encode().unwrap(),
            r#"{"type":"needsPasswordSetup"}"#
        );
        assert_eq!(ServerMessage::NeedsPassword.encode().unwrap(), r#"{"type":"needsPassword"}"#);
        assert_eq!(ServerMessage::Authenticated.encode().unwrap(), r#"{"type":"authenticated"}"#);
    }

    #[test]
    fn test_user_count_and_error_shape() {
        assert_eq!(
            ServerMessage::UserCount { count: 2 }.encode().unwrap(),
            r#"{"type":"userCount","count":2}"#
        );
        assert_eq!(
            ServerMessage::error("Invalid password").encode().unwrap(),
            r#"{"type":"error","message":"Invalid password"}"#
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(ClientMessage::decode("not json").is_err());
        assert!(ClientMessage::decode(r#"{"key":"doc1"}"#).is_err());
        assert!(ClientMessage::decode(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::decode(r#"{"type":"setupPassword"}"#).is_err());
    }
}
