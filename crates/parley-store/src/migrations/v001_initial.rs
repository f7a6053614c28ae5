//! v001 -- Initial schema creation.
//!
//! Creates the `chats` and `messages` tables. Users live in the external
//! identity service; only their UUIDs are stored here.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats (exactly two participants, stored in ascending order)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_a     TEXT NOT NULL,                 -- lower participant UUID
    user_b     TEXT NOT NULL,                 -- higher participant UUID
    created_at TEXT NOT NULL,                 -- RFC-3339, microseconds
    updated_at TEXT NOT NULL,

    UNIQUE (user_a, user_b),
    CHECK (user_a < user_b)
);

CREATE INDEX IF NOT EXISTS idx_chats_user_b ON chats(user_b);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    chat_id         TEXT NOT NULL,              -- FK -> chats(id)
    sender_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    attachment_key  TEXT,
    attachment_name TEXT,
    attachment_url  TEXT,
    status          INTEGER NOT NULL,           -- 1 SENT, 2 DELIVERED, 3 READ
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    CHECK (status BETWEEN 1 AND 3)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
