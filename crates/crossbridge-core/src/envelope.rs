//! Bridge message envelope
//!
//! The typed, timestamped message exchanged across every runtime boundary.
//! Serialized as `{ "type": "SCAN_RESULT", "data": {...}, "timestamp": <ms> }`
//! with `data` omitted when absent.

use crate::errors::BridgeResult;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Loosely typed payload carried by an envelope
pub type Payload = Map<String, Value>;

// ----------------------------------------------------------------------------
// Message Type
// ----------------------------------------------------------------------------

/// Category of an envelope, which alone decides where it is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    StateChanged,
    ScanStarted,
    ScanStopped,
    ScanResult,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    DataReceived,
    DataSent,
    Notification,
    Error,
    DevicesUpdated,
    Custom,
}

impl MessageType {
    pub const ALL: [MessageType; 14] = [
        MessageType::StateChanged,
        MessageType::ScanStarted,
        MessageType::ScanStopped,
        MessageType::ScanResult,
        MessageType::Connecting,
        MessageType::Connected,
        MessageType::Disconnecting,
        MessageType::Disconnected,
        MessageType::DataReceived,
        MessageType::DataSent,
        MessageType::Notification,
        MessageType::Error,
        MessageType::DevicesUpdated,
        MessageType::Custom,
    ];

    /// Wire string, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::StateChanged => "STATE_CHANGED",
            MessageType::ScanStarted => "SCAN_STARTED",
            MessageType::ScanStopped => "SCAN_STOPPED",
            MessageType::ScanResult => "SCAN_RESULT",
            MessageType::Connecting => "CONNECTING",
            MessageType::Connected => "CONNECTED",
            MessageType::Disconnecting => "DISCONNECTING",
            MessageType::Disconnected => "DISCONNECTED",
            MessageType::DataReceived => "DATA_RECEIVED",
            MessageType::DataSent => "DATA_SENT",
            MessageType::Notification => "NOTIFICATION",
            MessageType::Error => "ERROR",
            MessageType::DevicesUpdated => "DEVICES_UPDATED",
            MessageType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Immutable cross-runtime message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Payload>,
    timestamp: Timestamp,
}

impl Envelope {
    /// Create an envelope stamped with the given time
    pub fn new(message_type: MessageType, data: Option<Payload>, timestamp: Timestamp) -> Self {
        Self {
            message_type,
            data,
            timestamp,
        }
    }

    /// Create an envelope stamped with the wall clock
    pub fn now(message_type: MessageType, data: Option<Payload>) -> Self {
        Self::new(message_type, data, Timestamp::now())
    }

    /// Build from any JSON value; non-object values are wrapped under `"value"`
    pub fn from_value(message_type: MessageType, value: Value, timestamp: Timestamp) -> Self {
        let data = match value {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                let mut map = Payload::new();
                map.insert("value".to_string(), other);
                Some(map)
            }
        };
        Self::new(message_type, data, timestamp)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Look up a single payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|map| map.get(key))
    }

    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> BridgeResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(json: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let mut data = Payload::new();
        data.insert("count".into(), json!(3));
        let envelope = Envelope::new(MessageType::ScanResult, Some(data), Timestamp::new(42));

        let value = envelope.to_value().unwrap();
        assert_eq!(
            value,
            json!({ "type": "SCAN_RESULT", "data": { "count": 3 }, "timestamp": 42 })
        );
    }

    #[test]
    fn test_missing_data_is_omitted() {
        let envelope = Envelope::new(MessageType::ScanStopped, None, Timestamp::new(7));
        let json = envelope.to_json().unwrap();
        assert_eq!(json, r#"{"type":"SCAN_STOPPED","timestamp":7}"#);

        let parsed = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_type_strings_match_serde() {
        for message_type in MessageType::ALL {
            let serialized = serde_json::to_value(message_type).unwrap();
            assert_eq!(serialized, json!(message_type.as_str()));
        }
    }

    #[test]
    fn test_scalar_value_is_wrapped() {
        let envelope = Envelope::from_value(MessageType::Custom, json!("hi"), Timestamp::new(1));
        assert_eq!(envelope.field("value"), Some(&json!("hi")));
        assert!(Envelope::from_value(MessageType::Custom, Value::Null, Timestamp::new(1))
            .data()
            .is_none());
    }
}
