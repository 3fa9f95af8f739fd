//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `users` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    display_name  TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,              -- bcrypt
    avatar        TEXT,                       -- data URL, nullable
    created_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- `seq` records commit order; per-conversation timestamps are forced
-- strictly increasing, so ordering by seq and ordering by timestamp
-- agree within a conversation.
CREATE TABLE IF NOT EXISTS messages (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    id               TEXT NOT NULL UNIQUE,    -- canonical UUID v4
    conversation_key TEXT NOT NULL,           -- "lo:hi" user id pair
    sender_id        TEXT NOT NULL,
    receiver_id      TEXT NOT NULL,
    body_text        TEXT,
    body_image       TEXT,                    -- data URL, nullable
    created_at       TEXT NOT NULL,           -- ISO-8601

    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (receiver_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_key, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
