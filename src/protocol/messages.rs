//! Wire frames shared by all channels.
//!
//! Every frame is a JSON text message. Requests carry an `event` name, an
//! optional `ack` id and a `data` payload; the broker answers each request
//! that has an `ack` id with exactly one [`AckFrame`]. Pushes are
//! [`EventFrame`]s without an ack.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, Result};
use crate::scheduler::job::JobSpec;
use crate::scheduler::registry::ConnectionId;

/// Event pushed to every client right after the connection is accepted.
pub const CONNECT_EVENT: &str = "connect";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

impl RequestFrame {
    /// Decode the payload for this request's event.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|source| BrokerError::InvalidPayload {
            event: self.event.clone(),
            source,
        })
    }
}

/// Encode the answer to `event` for the wire.
pub fn encode_reply<T: Serialize>(event: &str, reply: &T) -> Result<Value> {
    serde_json::to_value(reply).map_err(|source| BrokerError::Encode {
        event: event.to_string(),
        source,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub ack: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl AckFrame {
    pub fn ok(ack: u64, result: Value) -> Self {
        Self {
            ack,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(ack: u64, error: Value) -> Self {
        Self {
            ack,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Anything a client may receive: an answer to one of its requests or a push.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Ack(AckFrame),
    Event(EventFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub id: ConnectionId,
}

// -------------------------------------------------------------------------
// Worker channel payloads
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Connection id as the worker knows it; informational only.
    #[serde(default)]
    pub id: Option<ConnectionId>,
    /// Id of the connection the worker used before reconnecting.
    #[serde(default, alias = "oldSocketId")]
    pub old_id: Option<ConnectionId>,
    pub host: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub statistics: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub statistics: Option<Value>,
}

// -------------------------------------------------------------------------
// Submitter channel payloads
// -------------------------------------------------------------------------

pub type SubmitRequest = JobSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingRequest {
    #[serde(default)]
    pub options: Value,
    pub host: String,
}

// -------------------------------------------------------------------------
// Data channel payloads
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataOpRequest {
    pub table: String,
    pub operation: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRegisterRequest {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_ack_or_data() {
        let frame: RequestFrame = serde_json::from_str(r#"{"event":"running"}"#).unwrap();
        assert_eq!(frame.event, "running");
        assert!(frame.ack.is_none());
        assert!(frame.data.is_null());
        let status: StatusRequest = frame.payload().unwrap();
        assert!(status.statistics.is_none());
    }

    #[test]
    fn register_accepts_legacy_old_id_field() {
        let frame: RequestFrame = serde_json::from_value(json!({
            "event": "register",
            "ack": 1,
            "data": { "oldSocketId": "abc", "host": "h1", "platform": "linux" }
        }))
        .unwrap();
        let req: RegisterRequest = frame.payload().unwrap();
        assert_eq!(req.old_id, Some(ConnectionId::from("abc")));
        assert!(req.statistics.is_null());
    }

    #[test]
    fn bad_payload_names_the_event() {
        let frame = RequestFrame {
            event: "register".to_string(),
            ack: Some(1),
            data: json!({ "platform": "linux" }),
        };
        let err = frame.payload::<RegisterRequest>().unwrap_err();
        assert!(err.to_string().contains("register"));
    }

    #[test]
    fn inbound_frames_are_told_apart() {
        let ack: InboundFrame = serde_json::from_value(json!({ "ack": 3, "result": null })).unwrap();
        assert!(matches!(ack, InboundFrame::Ack(AckFrame { ack: 3, .. })));

        let push: InboundFrame = serde_json::from_value(json!({ "event": "run" })).unwrap();
        assert!(matches!(push, InboundFrame::Event(EventFrame { ref event, .. }) if event == "run"));
    }

    #[test]
    fn ack_omits_missing_fields() {
        let value = serde_json::to_value(AckFrame::ok(9, json!("done"))).unwrap();
        assert_eq!(value, json!({ "ack": 9, "result": "done" }));
    }

    #[test]
    fn reply_encoding_failure_is_an_error() {
        let mut reply = std::collections::HashMap::new();
        reply.insert((1u8, 2u8), "tuple keys have no JSON form");

        let err = encode_reply("get", &reply).unwrap_err();
        assert!(matches!(err, BrokerError::Encode { .. }));
        assert!(err.to_string().starts_with("Failed to encode reply for 'get'"));
        assert_eq!(encode_reply("get", &Option::<u8>::None).unwrap(), Value::Null);
    }
}
