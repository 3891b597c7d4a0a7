//! Persistence seams consumed by the relay, and their SQLite implementation.
//!
//! Both traits are synchronous: async callers run them on
//! `tokio::task::spawn_blocking`, the same way every rusqlite call in this
//! server is made.

use std::collections::BTreeSet;
use std::sync::MutexGuard;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::chat::reactions::{self, ReactionChange};
use crate::db::models::{
    LastMessage, Message, MessageId, NewMessage, NewRoom, Reactions, RepliedMessage, Room, RoomId,
    RoomSummary, StarredMessage, UserId,
};
use crate::db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed stored document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database lock poisoned")]
    Lock,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for StatusCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Message documents: creation, enrichment and field-level mutation.
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a new message and return its id.
    fn insert(&self, message: &NewMessage) -> Result<MessageId, StoreError>;

    /// Load a message as stored, without the reply snapshot.
    fn find_by_id(&self, id: &str) -> Result<Message, StoreError>;

    /// Load a message with `replied_message` joined from its `reply_to` target.
    fn fetch_enriched(&self, id: &str) -> Result<Message, StoreError>;

    /// Toggle one user's reaction and return the updated message. Must be
    /// atomic per message: concurrent toggles never lose an update.
    fn toggle_reaction(
        &self,
        id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<(Message, ReactionChange), StoreError>;

    fn set_pinned(&self, id: &str, pinned: bool) -> Result<(), StoreError>;

    fn set_starred(&self, id: &str, user_id: &str, starred: bool) -> Result<(), StoreError>;

    /// Hard delete.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Up to `limit` messages older than `before`, enriched, oldest first.
    fn list_room_messages(
        &self,
        room_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// Add `user_id` to `read_by` of every message in the room. Returns the
    /// number of messages newly marked.
    fn mark_room_read(&self, room_id: &str, user_id: &str) -> Result<usize, StoreError>;

    fn starred_by(&self, user_id: &str) -> Result<Vec<StarredMessage>, StoreError>;
}

/// Persistent rooms, their authorized members, and the users' display names.
pub trait RoomDirectory: Send + Sync + 'static {
    /// Record a user seen on a verified token. A given name replaces the
    /// stored one; without a name an unknown user is stored under its id.
    fn upsert_user(&self, id: &str, display_name: Option<&str>) -> Result<(), StoreError>;

    fn create_room(&self, room: &NewRoom) -> Result<Room, StoreError>;

    fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError>;

    fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomSummary>, StoreError>;
}

/// SQLite-backed store sharing the server's connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

const MESSAGE_SELECT: &str = "SELECT m.id, m.room_id, m.sender_id, m.reply_to, m.content,
        m.media_url, m.timestamp, m.pinned, m.reactions,
        r.id, r.sender_id, u.username, r.content, r.media_url
     FROM messages m
     LEFT JOIN messages r ON r.id = m.reply_to
     LEFT JOIN users u ON u.id = r.sender_id";

/// A message row before its JSON column and side tables are folded in.
struct MessageRow {
    message: Message,
    reactions_json: String,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Lock)
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let replied_id: Option<String> = row.get(9)?;
    let replied_message = match replied_id {
        Some(_) => {
            let sender_id: String = row.get(10)?;
            Some(RepliedMessage {
                sender_name: row
                    .get::<_, Option<String>>(11)?
                    .unwrap_or_else(|| sender_id.clone()),
                sender_id,
                content: row.get(12)?,
                media_url: row.get(13)?,
            })
        }
        None => None,
    };

    Ok(MessageRow {
        message: Message {
            id: row.get(0)?,
            room_id: row.get(1)?,
            sender_id: row.get(2)?,
            reply_to: row.get(3)?,
            content: row.get(4)?,
            media_url: row.get(5)?,
            timestamp: millis_to_datetime(row.get(6)?),
            read_by: BTreeSet::new(),
            reactions: Reactions::new(),
            pinned: row.get::<_, i64>(7)? != 0,
            starred_by: BTreeSet::new(),
            replied_message,
        },
        reactions_json: row.get(8)?,
    })
}

fn user_set(conn: &Connection, sql: &str, message_id: &str) -> Result<BTreeSet<UserId>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let users = stmt
        .query_map([message_id], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(users)
}

fn complete(conn: &Connection, row: MessageRow, enrich: bool) -> Result<Message, StoreError> {
    let mut message = row.message;
    message.reactions = serde_json::from_str(&row.reactions_json)?;
    message.read_by = user_set(
        conn,
        "SELECT user_id FROM message_reads WHERE message_id = ?1",
        &message.id,
    )?;
    message.starred_by = user_set(
        conn,
        "SELECT user_id FROM message_stars WHERE message_id = ?1",
        &message.id,
    )?;
    if !enrich {
        message.replied_message = None;
    }
    Ok(message)
}

fn load_message(conn: &Connection, id: &str, enrich: bool) -> Result<Message, StoreError> {
    let row = conn
        .query_row(
            &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
            [id],
            map_message_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)?;
    complete(conn, row, enrich)
}

fn write_reactions(conn: &Connection, id: &str, reactions: &Reactions) -> Result<(), StoreError> {
    let json = serde_json::to_string(reactions)?;
    let rows = conn.execute(
        "UPDATE messages SET reactions = ?1 WHERE id = ?2",
        rusqlite::params![json, id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn load_room(conn: &Connection, id: &str) -> Result<Room, StoreError> {
    let mut room = conn
        .query_row(
            "SELECT id, name, is_group, avatar, description FROM rooms WHERE id = ?1",
            [id],
            |row| {
                Ok(Room {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    members: BTreeSet::new(),
                    is_group: row.get::<_, i64>(2)? != 0,
                    avatar: row.get(3)?,
                    description: row.get(4)?,
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound)?;

    let mut stmt = conn.prepare_cached("SELECT user_id FROM room_members WHERE room_id = ?1")?;
    room.members = stmt
        .query_map([id], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    Ok(room)
}

impl MessageStore for SqliteStore {
    fn insert(&self, message: &NewMessage) -> Result<MessageId, StoreError> {
        let conn = self.lock()?;
        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO messages (id, room_id, sender_id, reply_to, content, media_url, timestamp, pinned, reactions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, '{}')",
            rusqlite::params![
                id,
                message.room_id,
                message.sender_id,
                message.reply_to,
                message.content,
                message.media_url,
                message.timestamp.timestamp_millis(),
            ],
        )?;
        Ok(id)
    }

    fn find_by_id(&self, id: &str) -> Result<Message, StoreError> {
        let conn = self.lock()?;
        load_message(&conn, id, false)
    }

    fn fetch_enriched(&self, id: &str) -> Result<Message, StoreError> {
        let conn = self.lock()?;
        load_message(&conn, id, true)
    }

    /// Runs the read-modify-write in one transaction under the connection
    /// lock, so concurrent toggles on the same message serialize.
    fn toggle_reaction(
        &self,
        id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<(Message, ReactionChange), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut message = load_message(&tx, id, false)?;
        let change = reactions::toggle(&mut message.reactions, emoji, user_id);
        write_reactions(&tx, id, &message.reactions)?;
        tx.commit()?;
        Ok((message, change))
    }

    fn set_pinned(&self, id: &str, pinned: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE messages SET pinned = ?1 WHERE id = ?2",
            rusqlite::params![pinned as i64, id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn set_starred(&self, id: &str, user_id: &str, starred: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1",
            [id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )?;
        if !exists {
            return Err(StoreError::NotFound);
        }

        let sql = if starred {
            "INSERT OR IGNORE INTO message_stars (message_id, user_id) VALUES (?1, ?2)"
        } else {
            "DELETE FROM message_stars WHERE message_id = ?1 AND user_id = ?2"
        };
        conn.execute(sql, rusqlite::params![id, user_id])?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn list_room_messages(
        &self,
        room_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.lock()?;

        // Message ids are UUIDv7, so lexical order follows creation order.
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE m.room_id = ?1 AND (?2 IS NULL OR m.id < ?2)
                 ORDER BY m.timestamp DESC, m.id DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![room_id, before, limit as i64],
                    map_message_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut messages = rows
            .into_iter()
            .map(|row| complete(&conn, row, true))
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    fn mark_room_read(&self, room_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id)
             SELECT id, ?2 FROM messages WHERE room_id = ?1",
            rusqlite::params![room_id, user_id],
        )?;
        Ok(rows)
    }

    fn starred_by(&self, user_id: &str) -> Result<Vec<StarredMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, COALESCE(u.username, m.sender_id), m.content, m.timestamp
             FROM message_stars s
             JOIN messages m ON m.id = s.message_id
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE s.user_id = ?1
             ORDER BY m.timestamp ASC",
        )?;
        let starred = stmt
            .query_map([user_id], |row| {
                Ok(StarredMessage {
                    id: row.get(0)?,
                    sender_name: row.get(1)?,
                    content: row.get(2)?,
                    timestamp: millis_to_datetime(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(starred)
    }
}

impl RoomDirectory for SqliteStore {
    fn upsert_user(&self, id: &str, display_name: Option<&str>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        match display_name {
            Some(name) => conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                rusqlite::params![id, name],
            )?,
            None => conn.execute(
                "INSERT OR IGNORE INTO users (id, username) VALUES (?1, ?1)",
                [id],
            )?,
        };
        Ok(())
    }

    fn create_room(&self, room: &NewRoom) -> Result<Room, StoreError> {
        let mut conn = self.lock()?;
        let id = Uuid::now_v7().to_string();

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO rooms (id, name, is_group) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, room.name, room.is_group as i64],
        )?;
        for member in &room.members {
            tx.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![id, member],
            )?;
        }
        tx.commit()?;

        Ok(Room {
            id,
            name: room.name.clone(),
            members: room.members.clone(),
            is_group: room.is_group,
            avatar: None,
            description: None,
        })
    }

    fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let member = conn.query_row(
            "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            rusqlite::params![room_id, user_id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )?;
        Ok(member)
    }

    fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomSummary>, StoreError> {
        let conn = self.lock()?;

        let room_ids: Vec<RoomId> = {
            let mut stmt = conn.prepare(
                "SELECT room_id FROM room_members WHERE user_id = ?1 ORDER BY room_id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut summaries = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            let room = load_room(&conn, &room_id)?;

            let last_message = conn
                .query_row(
                    "SELECT content, timestamp FROM messages WHERE room_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                    [&room_id],
                    |row| {
                        Ok(LastMessage {
                            content: row.get(0)?,
                            timestamp: millis_to_datetime(row.get(1)?),
                        })
                    },
                )
                .optional()?;

            let unread_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.room_id = ?1 AND NOT EXISTS (
                     SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?2
                 )",
                rusqlite::params![room_id, user_id],
                |row| row.get(0),
            )?;

            summaries.push(RoomSummary {
                room,
                last_message,
                unread_count: unread_count as u64,
            });
        }
        Ok(summaries)
    }
}
