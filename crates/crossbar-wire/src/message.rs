//! Wire protocol message types.
//!
//! Registries exchange JSON messages tagged by a `type` field. Stream
//! transports prefix each message with a 4-byte big-endian length header.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum single message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// A message exchanged between two registries over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Announce a public command owned by the sender.
    Register {
        /// Correlation ID, answered with `response` or `error`.
        id: String,
        /// Command name.
        command: String,
    },
    /// Ask the peer for its public command names.
    List,
    /// Answer to `list`.
    ListResponse {
        /// The peer's local public command names.
        commands: Vec<String>,
    },
    /// Execute a command on the owner (or a hub that knows the owner).
    Request {
        id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
    /// Successful result of a `request` or `register`.
    Response {
        id: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
    /// Failed `request` or `register`.
    Error {
        id: String,
        /// Human-readable failure description.
        reason: String,
    },
    /// Fire-and-forget notification.
    Event {
        /// Event name.
        event: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
}

impl WireMessage {
    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Register { .. } => "register",
            WireMessage::List => "list",
            WireMessage::ListResponse { .. } => "list-response",
            WireMessage::Request { .. } => "request",
            WireMessage::Response { .. } => "response",
            WireMessage::Error { .. } => "error",
            WireMessage::Event { .. } => "event",
        }
    }

    /// The correlation ID, if this message carries one.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            WireMessage::Register { id, .. }
            | WireMessage::Request { id, .. }
            | WireMessage::Response { id, .. }
            | WireMessage::Error { id, .. } => Some(id),
            WireMessage::List | WireMessage::ListResponse { .. } | WireMessage::Event { .. } => {
                None
            }
        }
    }
}

/// Encode a value to bytes (4-byte big-endian length + JSON).
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = WireMessage::Request {
            id: "req-1".to_string(),
            command: "echo".to_string(),
            payload: json!({"v": 1}),
        };
        let bytes = encode_message(&msg).unwrap();
        // First 4 bytes are length
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        let decoded = decode_message(&bytes[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_type_tags() {
        let list_response = WireMessage::ListResponse {
            commands: vec!["a".to_string()],
        };
        let json = serde_json::to_value(&list_response).unwrap();
        assert_eq!(json["type"], "list-response");
        assert_eq!(json["commands"], json!(["a"]));

        let json = serde_json::to_value(WireMessage::List).unwrap();
        assert_eq!(json, json!({"type": "list"}));
    }

    #[test]
    fn test_null_payload_omitted() {
        let msg = WireMessage::Response {
            id: "r-1".to_string(),
            payload: Value::Null,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("payload"));

        let decoded: WireMessage =
            serde_json::from_str(r#"{"type":"event","event":"saved"}"#).unwrap();
        match decoded {
            WireMessage::Event { event, payload } => {
                assert_eq!(event, "saved");
                assert!(payload.is_null());
            }
            other => panic!("Expected Event, got {other:?}"),
        }
    }

    #[test]
    fn test_error_message() {
        let decoded: WireMessage =
            serde_json::from_str(r#"{"type":"error","id":"e-1","reason":"boom"}"#).unwrap();
        assert_eq!(decoded.kind(), "error");
        assert_eq!(decoded.correlation_id(), Some("e-1"));
        match decoded {
            WireMessage::Error { reason, .. } => assert_eq!(reason, "boom"),
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<WireMessage, _> =
            serde_json::from_str(r#"{"type":"handshake","id":"x"}"#);
        assert!(result.is_err());
    }
}
