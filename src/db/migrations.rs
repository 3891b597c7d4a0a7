use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, so no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Rooms and messages

-- Identities are issued by the external account service; this table only
-- mirrors the display name needed for reply snapshots.
CREATE TABLE users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL
);

CREATE TABLE rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_group INTEGER NOT NULL DEFAULT 0,
    avatar TEXT,
    description TEXT
);

CREATE TABLE room_members (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX idx_room_members_user ON room_members(user_id);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    reply_to TEXT,
    content TEXT NOT NULL,
    media_url TEXT,
    timestamp INTEGER NOT NULL,
    pinned INTEGER NOT NULL DEFAULT 0,
    -- JSON object: emoji -> [user_id]
    reactions TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX idx_messages_room_ts ON messages(room_id, timestamp);

CREATE TABLE message_reads (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE message_stars (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX idx_message_stars_user ON message_stars(user_id);
",
    )])
}
