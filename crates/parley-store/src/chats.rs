//! CRUD operations for [`Chat`] records.

use rusqlite::{params, OptionalExtension};

use parley_shared::models::Chat;
use parley_shared::types::{ChatId, UserId};

use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, now, Database};
use crate::error::{Result, StoreError};

const CHAT_COLUMNS: &str = "id, user_a, user_b, created_at, updated_at";

/// Canonical ordering of a participant pair.
fn ordered(a: UserId, b: UserId) -> [UserId; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the chat between `a` and `b`, creating it on first use.
    ///
    /// The boolean is `true` when a new chat was created. Argument order does
    /// not matter.
    pub fn find_or_create_chat(&self, a: UserId, b: UserId) -> Result<(Chat, bool)> {
        if a == b {
            return Err(StoreError::SameUser);
        }
        let users = ordered(a, b);
        let now = now();
        let chat = Chat {
            id: ChatId::new(),
            users,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO chats (id, user_a, user_b, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                chat.id.to_string(),
                users[0].to_string(),
                users[1].to_string(),
                encode_ts(&now),
            ],
        )?;

        if inserted == 1 {
            tracing::debug!(chat = %chat.id, "created chat");
            return Ok((chat, true));
        }

        let existing = self.find_chat_by_users(a, b)?.ok_or(StoreError::NotFound)?;
        Ok((existing, false))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn find_chat_by_users(&self, a: UserId, b: UserId) -> Result<Option<Chat>> {
        let users = ordered(a, b);
        let chat = self
            .conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE user_a = ?1 AND user_b = ?2"),
                params![users[0].to_string(), users[1].to_string()],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(not_found)
    }

    /// Every chat `user` takes part in, most recently active first.
    pub fn chats_for_user(&self, user: UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats
             WHERE user_a = ?1 OR user_b = ?1
             ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Bump `updated_at`, called whenever a message lands in the chat.
    pub(crate) fn touch_chat(&self, id: ChatId) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), encode_ts(&now())],
        )?;
        Ok(())
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: ChatId(decode_uuid(row, 0)?),
        users: [UserId(decode_uuid(row, 1)?), UserId(decode_uuid(row, 2)?)],
        created_at: decode_ts(row, 3)?,
        updated_at: decode_ts(row, 4)?,
    })
}
