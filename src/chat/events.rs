//! Outbound events fanned out to the sessions subscribed to a room.
//!
//! Events are immutable once built. The JSON encoding is the wire format: an
//! object with a `type` discriminator and camelCase fields.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chat::presence::PresenceStatus;
use crate::db::models::{Message, MessageId, RepliedMessage, RoomId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Message(MessageEvent),
    Typing(TypingEvent),
    Presence(PresenceEvent),
    Reaction(ReactionEvent),
    Pin(MessageUpdateEvent),
    Unpin(MessageUpdateEvent),
    Star(MessageUpdateEvent),
    Unstar(MessageUpdateEvent),
    Delete(DeleteEvent),
    Forward(MessageUpdateEvent),
}

/// A newly persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: MessageId,
    /// Idempotency token echoed back so the sender's UI can de-duplicate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_side_id: Option<String>,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub replied_message: Option<RepliedMessage>,
}

impl MessageEvent {
    /// Build from an enriched message.
    pub fn from_message(message: Message, client_side_id: Option<String>) -> Self {
        Self {
            id: message.id,
            client_side_id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            media_url: message.media_url,
            timestamp: message.timestamp,
            reply_to: message.reply_to,
            replied_message: message.replied_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub room_id: RoomId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub emoji: String,
    pub user_id: UserId,
}

/// Pin, unpin, star, unstar and forward all carry the affected message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdateEvent {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub message: Message,
}

impl MessageUpdateEvent {
    pub fn new(message: Message) -> Self {
        Self {
            room_id: message.room_id.clone(),
            message_id: message.id.clone(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEvent {
    pub room_id: RoomId,
    pub message_id: MessageId,
}

impl Event {
    /// Room whose subscribers receive this event.
    pub fn room_id(&self) -> &str {
        match self {
            Event::Message(e) => &e.room_id,
            Event::Typing(e) => &e.room_id,
            Event::Presence(e) => &e.room_id,
            Event::Reaction(e) => &e.room_id,
            Event::Pin(e) | Event::Unpin(e) | Event::Star(e) | Event::Unstar(e) | Event::Forward(e) => {
                &e.room_id
            }
            Event::Delete(e) => &e.room_id,
        }
    }

    /// Wire `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Message(_) => "message",
            Event::Typing(_) => "typing",
            Event::Presence(_) => "presence",
            Event::Reaction(_) => "reaction",
            Event::Pin(_) => "pin",
            Event::Unpin(_) => "unpin",
            Event::Star(_) => "star",
            Event::Unstar(_) => "unstar",
            Event::Delete(_) => "delete",
            Event::Forward(_) => "forward",
        }
    }

    /// User that must not receive its own event (typing and presence only).
    pub fn suppressed_for(&self) -> Option<&str> {
        match self {
            Event::Typing(e) => Some(&e.user_id),
            Event::Presence(e) => Some(&e.user_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_event_wire_shape() {
        let event = Event::Message(MessageEvent {
            id: "m1".to_string(),
            client_side_id: Some("tmp-1".to_string()),
            room_id: "r1".to_string(),
            sender_id: "alice".to_string(),
            content: "hi".to_string(),
            media_url: None,
            timestamp: DateTime::from_timestamp_millis(0).unwrap(),
            reply_to: None,
            replied_message: None,
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["clientSideId"], "tmp-1");
        assert_eq!(value["roomId"], "r1");
        assert_eq!(value["senderId"], "alice");
        assert!(value.get("mediaUrl").is_none());
        assert!(value["repliedMessage"].is_null());
        assert!(value.as_object().unwrap().contains_key("repliedMessage"));
    }

    #[test]
    fn test_small_event_wire_shapes() {
        let typing = Event::Typing(TypingEvent {
            room_id: "r1".to_string(),
            user_id: "bob".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&typing).unwrap(),
            json!({"type": "typing", "roomId": "r1", "userId": "bob"})
        );

        let presence = Event::Presence(PresenceEvent {
            room_id: "r1".to_string(),
            user_id: "bob".to_string(),
            status: PresenceStatus::Offline,
        });
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            json!({"type": "presence", "roomId": "r1", "userId": "bob", "status": "offline"})
        );

        let delete = Event::Delete(DeleteEvent {
            room_id: "r1".to_string(),
            message_id: "m9".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&delete).unwrap(),
            json!({"type": "delete", "roomId": "r1", "messageId": "m9"})
        );
    }

    #[test]
    fn test_only_typing_and_presence_are_suppressed() {
        let typing = Event::Typing(TypingEvent {
            room_id: "r1".to_string(),
            user_id: "bob".to_string(),
        });
        assert_eq!(typing.suppressed_for(), Some("bob"));
        assert_eq!(typing.kind(), "typing");

        let reaction = Event::Reaction(ReactionEvent {
            room_id: "r1".to_string(),
            message_id: "m1".to_string(),
            emoji: "👍".to_string(),
            user_id: "bob".to_string(),
        });
        assert_eq!(reaction.suppressed_for(), None);
        assert_eq!(reaction.room_id(), "r1");
    }
}
