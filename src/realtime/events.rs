//! Socket event vocabulary.
//!
//! Events are a closed tagged enum, validated at the boundary before
//! dispatch. Anything that fails to parse is logged and dropped without
//! closing the connection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageKind, MessageRow, NotificationRow, UserBrief};

/// Client -> server events, tagged by `event` with the payload under `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join { user_id: Uuid },

    #[serde(rename = "peer:register")]
    PeerRegister { user_id: Uuid, peer_id: String },

    #[serde(rename = "message:send")]
    MessageSend {
        conversation_id: Uuid,
        sender_id: Uuid,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        attachment_url: Option<String>,
        #[serde(default)]
        kind: Option<MessageKind>,
    },

    #[serde(rename = "message:read")]
    MessageRead { conversation_id: Uuid, user_id: Uuid },

    /// Opaque WebRTC offer, relayed verbatim.
    #[serde(rename = "call:offer")]
    CallOffer(serde_json::Value),

    /// Opaque WebRTC answer, relayed verbatim.
    #[serde(rename = "call:answer")]
    CallAnswer(serde_json::Value),
}

/// Outbound message record with the sender summary attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(flatten)]
    pub message: MessageRow,
    pub sender: Option<UserBrief>,
}

/// Server -> client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user:online")]
    UserOnline { user_id: Uuid },

    #[serde(rename = "user:offline")]
    UserOffline { user_id: Uuid },

    #[serde(rename = "peer:available")]
    PeerAvailable { user_id: Uuid, peer_id: String },

    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),

    #[serde(rename = "message:read:update")]
    MessageReadUpdate { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "notification:new")]
    NotificationNew(NotificationRow),

    #[serde(rename = "reminder:ping")]
    ReminderPing { pending: i64 },

    #[serde(rename = "call:offer")]
    CallOffer(serde_json::Value),

    #[serde(rename = "call:answer")]
    CallAnswer(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_event_parses() {
        let text = r#"{"event":"join","data":{"user_id":"8f5f0f34-2c4b-4f6e-9d0a-111111111111"}}"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();
        assert!(matches!(event, ClientEvent::Join { .. }));
    }

    #[test]
    fn message_send_defaults_optional_fields() {
        let text = r#"{
            "event": "message:send",
            "data": {
                "conversation_id": "8f5f0f34-2c4b-4f6e-9d0a-111111111111",
                "sender_id": "8f5f0f34-2c4b-4f6e-9d0a-222222222222",
                "text": "hi"
            }
        }"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();
        let ClientEvent::MessageSend {
            text,
            attachment_url,
            kind,
            ..
        } = event
        else {
            panic!("wrong variant");
        };
        assert_eq!(text.as_deref(), Some("hi"));
        assert!(attachment_url.is_none());
        assert!(kind.is_none());
    }

    #[test]
    fn unknown_or_malformed_events_fail_to_parse() {
        // Unknown tag
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"nope","data":{}}"#).is_err());
        // Missing required field
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"join","data":{}}"#).is_err());
        // Not JSON at all
        assert!(serde_json::from_str::<ClientEvent>("hello").is_err());
    }

    #[test]
    fn call_offer_payload_is_opaque() {
        let text = r#"{"event":"call:offer","data":{"sdp":"v=0","whatever":[1,2,3]}}"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();
        let ClientEvent::CallOffer(payload) = event else {
            panic!("wrong variant");
        };
        assert_eq!(payload["sdp"], "v=0");
    }

    #[test]
    fn server_events_carry_their_wire_names() {
        let user_id = uuid::Uuid::new_v4();
        let json = serde_json::to_value(ServerEvent::UserOnline { user_id }).unwrap();
        assert_eq!(json["event"], "user:online");
        assert_eq!(json["data"]["user_id"], user_id.to_string());

        let json = serde_json::to_value(ServerEvent::ReminderPing { pending: 4 }).unwrap();
        assert_eq!(json["event"], "reminder:ping");
        assert_eq!(json["data"]["pending"], 4);
    }
}
