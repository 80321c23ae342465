//! v001 -- Initial schema creation.
//!
//! Creates `users`, `blocks`, `conversations`, `participants`, `messages`
//! and `notifications`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- User directory
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID
    name        TEXT NOT NULL,
    username    TEXT NOT NULL UNIQUE,
    is_online   INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    last_active TEXT,                         -- RFC-3339
    created_at  TEXT NOT NULL
);

-- blocker has blocked `blocked`
CREATE TABLE IF NOT EXISTS blocks (
    blocker    TEXT NOT NULL,
    blocked    TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (blocker, blocked),
    FOREIGN KEY (blocker) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (blocked) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID
    is_group     INTEGER NOT NULL DEFAULT 0,
    group_name   TEXT,
    group_avatar TEXT,
    admin        TEXT,                        -- user id, groups only
    last_message TEXT,                        -- message id
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated
    ON conversations(updated_at DESC);

-- One row per current participant. The unread counter lives on the
-- participant row: joining inserts it, leaving deletes it.
CREATE TABLE IF NOT EXISTS participants (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,  -- join order
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    unread_count    INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
    joined_at       TEXT NOT NULL,

    UNIQUE (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,        -- UUID
    conversation_id TEXT NOT NULL,
    sender          TEXT NOT NULL,
    content         TEXT,
    attachments     TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    is_read         INTEGER NOT NULL DEFAULT 0,
    read_at         TEXT,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, created_at, seq);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id              TEXT PRIMARY KEY NOT NULL,
    recipient       TEXT NOT NULL,
    sender          TEXT,
    kind            TEXT NOT NULL,
    conversation_id TEXT,
    message_id      TEXT,
    text            TEXT NOT NULL,
    is_read         INTEGER NOT NULL DEFAULT 0,
    read_at         TEXT,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient
    ON notifications(recipient, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
