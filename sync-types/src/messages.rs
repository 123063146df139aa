//! Push-channel messages for homesync.
//!
//! Frames are JSON objects discriminated by a `type` field. Inbound frames
//! decode into [`PushMessage`]; the client only ever sends [`ClientMessage`].

use serde::{Deserialize, Serialize};

use crate::{AccessoryId, ProtocolError, Value};

/// Close code for an intentional end of session. Never retried.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported locally when the socket ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code sent by the server when the connection carried no token.
pub const CLOSE_MISSING_TOKEN: u16 = 4000;

/// Close code sent by the server when the token was rejected. Never retried.
pub const CLOSE_AUTH_REJECTED: u16 = 4001;

/// What a close code means for reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Intentional close; stay disconnected.
    Normal,
    /// The credential was refused; stay disconnected until a new one is supplied.
    CredentialRejected,
    /// Anything else; reconnect with backoff.
    Retry,
}

impl CloseDisposition {
    /// Classify a close code.
    pub fn classify(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => Self::Normal,
            CLOSE_AUTH_REJECTED => Self::CredentialRejected,
            _ => Self::Retry,
        }
    }
}

/// All messages the server can push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Server keepalive; must be answered with a pong
    Ping,
    /// Answer to a client ping
    Pong,
    /// Sent once after the server accepted the socket
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Server instance that owns this socket
        #[serde(default)]
        server_instance_id: Option<String>,
        /// Whether the server fans out through pub/sub
        #[serde(default)]
        pubsub_enabled: bool,
        /// Pub/sub slot name, if any
        #[serde(default)]
        pubsub_slot: Option<String>,
    },
    /// An accessory characteristic changed
    #[serde(rename_all = "camelCase")]
    CharacteristicUpdate {
        /// Accessory that changed
        accessory_id: AccessoryId,
        /// Characteristic that changed
        characteristic_type: String,
        /// New value
        #[serde(default)]
        value: Value,
    },
    /// An accessory became reachable or unreachable
    #[serde(rename_all = "camelCase")]
    ReachabilityUpdate {
        /// Accessory whose reachability changed
        accessory_id: AccessoryId,
        /// Whether the home can currently talk to it
        is_reachable: bool,
    },
}

impl PushMessage {
    /// Decode one text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Encode to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encoding)
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Connected { .. } => "connected",
            Self::CharacteristicUpdate { .. } => "characteristic_update",
            Self::ReachabilityUpdate { .. } => "reachability_update",
        }
    }
}

/// Messages the client sends on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Client keepalive
    Ping,
    /// Answer to a server ping
    Pong,
}

impl ClientMessage {
    /// Encode to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_ping_and_pong() {
        assert_eq!(
            PushMessage::from_json(r#"{"type":"ping"}"#).unwrap(),
            PushMessage::Ping
        );
        assert_eq!(
            PushMessage::from_json(r#"{"type":"pong"}"#).unwrap(),
            PushMessage::Pong
        );
    }

    #[test]
    fn decodes_characteristic_update() {
        let msg = PushMessage::from_json(
            r#"{"type":"characteristic_update","accessoryId":"dev1","characteristicType":"brightness","value":80}"#,
        )
        .unwrap();

        match msg {
            PushMessage::CharacteristicUpdate {
                accessory_id,
                characteristic_type,
                value,
            } => {
                assert_eq!(accessory_id.as_str(), "dev1");
                assert_eq!(characteristic_type, "brightness");
                assert_eq!(value, json!(80));
            }
            other => panic!("Expected CharacteristicUpdate, got {:?}", other),
        }
    }

    #[test]
    fn decodes_reachability_update() {
        let msg = PushMessage::from_json(
            r#"{"type":"reachability_update","accessoryId":"lock-2","isReachable":false}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            PushMessage::ReachabilityUpdate {
                accessory_id: AccessoryId::new("lock-2"),
                is_reachable: false,
            }
        );
    }

    #[test]
    fn decodes_connected_with_missing_optional_fields() {
        let msg = PushMessage::from_json(r#"{"type":"connected","serverInstanceId":"i-1"}"#)
            .unwrap();

        assert_eq!(
            msg,
            PushMessage::Connected {
                server_instance_id: Some("i-1".into()),
                pubsub_enabled: false,
                pubsub_slot: None,
            }
        );
    }

    #[test]
    fn unknown_type_is_malformed() {
        let result = PushMessage::from_json(r#"{"type":"subscribed","shareHash":"x"}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn non_json_is_malformed() {
        let result = PushMessage::from_json("not json");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn update_without_accessory_is_malformed() {
        let result = PushMessage::from_json(
            r#"{"type":"characteristic_update","characteristicType":"power","value":true}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn encodes_with_camel_case_fields() {
        let msg = PushMessage::CharacteristicUpdate {
            accessory_id: AccessoryId::new("dev1"),
            characteristic_type: "power_state".into(),
            value: json!(true),
        };

        let encoded: serde_json::Value =
            serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "characteristic_update",
                "accessoryId": "dev1",
                "characteristicType": "power_state",
                "value": true,
            })
        );
    }

    #[test]
    fn client_messages_encode_as_type_tags() {
        assert_eq!(ClientMessage::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(ClientMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn close_codes_classify() {
        assert_eq!(CloseDisposition::classify(1000), CloseDisposition::Normal);
        assert_eq!(
            CloseDisposition::classify(4001),
            CloseDisposition::CredentialRejected
        );
        assert_eq!(CloseDisposition::classify(1006), CloseDisposition::Retry);
        assert_eq!(CloseDisposition::classify(4000), CloseDisposition::Retry);
        assert_eq!(CloseDisposition::classify(1011), CloseDisposition::Retry);
    }
}
