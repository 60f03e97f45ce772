//! The streaming message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One streaming message, in either direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Request correlation id; echoed on responses, empty on events
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Type-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error text, on `type = "error"` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serialize a response echoing the request id.
pub fn response_message(id: &str, msg_type: &str, payload: Value) -> String {
    serde_json::to_string(&WsMessage {
        msg_type: msg_type.to_string(),
        id: id.to_string(),
        payload: Some(payload),
        error: None,
    })
    .expect("envelope serializes")
}

/// Serialize an error reply.
pub fn error_message(id: &str, error: String) -> String {
    serde_json::to_string(&WsMessage {
        msg_type: "error".to_string(),
        id: id.to_string(),
        payload: None,
        error: Some(error),
    })
    .expect("envelope serializes")
}

/// Serialize an event the hub emits without a prior request.
pub fn event_message(msg_type: &str, payload: Value) -> String {
    serde_json::to_string(&WsMessage {
        msg_type: msg_type.to_string(),
        id: String::new(),
        payload: Some(payload),
        error: None,
    })
    .expect("envelope serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips() {
        let text = response_message("123", "readers", json!({"readers": []}));
        let decoded: WsMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.msg_type, "readers");
        assert_eq!(decoded.id, "123");
        assert!(decoded.payload.is_some());
        assert!(decoded.error.is_none());
    }

    #[test]
    fn error_shape() {
        let text = error_message("789", "something went wrong".into());
        let decoded: WsMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.msg_type, "error");
        assert_eq!(decoded.error.as_deref(), Some("something went wrong"));
    }

    #[test]
    fn events_carry_no_id() {
        let text = event_message("card", json!({"reader_name": "r"}));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["type"], "card");
    }

    #[test]
    fn incoming_payload_is_optional() {
        let decoded: WsMessage =
            serde_json::from_str(r#"{"type":"list_readers","id":"1"}"#).unwrap();
        assert_eq!(decoded.msg_type, "list_readers");
        assert!(decoded.payload.is_none());
    }
}
