/// Persistent row types and the documents built from them.
/// These correspond to the SQLite schema defined in migrations.rs.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type RoomId = String;
pub type MessageId = String;

/// emoji -> users who reacted with it. Never holds an empty set.
pub type Reactions = BTreeMap<String, BTreeSet<UserId>>;

/// Snapshot of the message a reply points at, joined in at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepliedMessage {
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Chat message document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read_by: BTreeSet<UserId>,
    pub reactions: Reactions,
    pub pinned: bool,
    pub starred_by: BTreeSet<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replied_message: Option<RepliedMessage>,
}

/// Fields supplied when persisting a new message. Everything else starts empty.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

/// Conversation with its authorized member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub members: BTreeSet<UserId>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub members: BTreeSet<UserId>,
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Room listing entry: the room plus its latest message and the caller's unread count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    pub last_message: Option<LastMessage>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StarredMessage {
    pub id: MessageId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
