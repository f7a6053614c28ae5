use rusqlite::{params, TransactionBehavior};

use parley_shared::models::{Attachment, Message, NewMessage};
use parley_shared::types::{ChatId, MessageId, UserId};
use parley_shared::{MessageStatus, Transition};

use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, now, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, attachment_key, attachment_name,
     attachment_url, status, created_at, updated_at";

impl Database {
    /// Persist a new message. The stored status is always `SENT`.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let chat = self.get_chat(new.chat_id)?;
        if !chat.has_member(new.sender_id) {
            return Err(StoreError::NotAMember(new.sender_id.to_string()));
        }

        let now = now();
        let message = Message {
            id: MessageId::new(),
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            content: new.content.clone(),
            attachment: new.attachment.clone(),
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };

        let attachment = message.attachment.as_ref();
        self.conn().execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"
            ),
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                attachment.map(|a| a.key.as_str()),
                attachment.map(|a| a.name.as_str()),
                attachment.map(|a| a.url.as_str()),
                message.status.rank(),
                encode_ts(&now),
            ],
        )?;
        self.touch_chat(message.chat_id)?;

        Ok(message)
    }

    /// Full history of a chat, oldest first.
    pub fn get_messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Move a message forward to `requested`.
    ///
    /// The read, the [`MessageStatus::advance`] decision and the write happen
    /// in one immediate transaction, so two concurrent promotions of the same
    /// row are serialized and the later, lower one becomes `Unchanged`.
    pub fn update_message_status(
        &self,
        id: MessageId,
        requested: MessageStatus,
    ) -> Result<(Transition, Message)> {
        if !requested.is_persistable() {
            return Err(StoreError::UnpersistableStatus(requested.to_string()));
        }

        let tx = rusqlite::Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;

        let mut message = tx
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)?;

        let transition = message.status.advance(requested);
        if let Transition::Advanced { to, .. } = transition {
            let now = now();
            tx.execute(
                "UPDATE messages SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), to.rank(), encode_ts(&now)],
            )?;
            message.status = to;
            message.updated_at = now;
        }
        tx.commit()?;

        Ok((transition, message))
    }

    /// Delete a message, returning the removed row.
    pub fn delete_message(&self, id: MessageId) -> Result<Message> {
        let message = self.get_message_by_id(id)?;
        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(message)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let key: Option<String> = row.get(4)?;
    let name: Option<String> = row.get(5)?;
    let url: Option<String> = row.get(6)?;
    let attachment = match (key, name, url) {
        (Some(key), Some(name), Some(url)) => Some(Attachment { key, name, url }),
        _ => None,
    };

    let rank: u8 = row.get(7)?;
    let status = MessageStatus::from_rank(rank).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Integer,
            format!("invalid status rank {rank}").into(),
        )
    })?;

    Ok(Message {
        id: MessageId(decode_uuid(row, 0)?),
        chat_id: ChatId(decode_uuid(row, 1)?),
        sender_id: UserId(decode_uuid(row, 2)?),
        content: row.get(3)?,
        attachment,
        status,
        created_at: decode_ts(row, 8)?,
        updated_at: decode_ts(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, ChatId, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let (chat, _) = db.find_or_create_chat(a, b).unwrap();
        (db, chat.id, a, b)
    }

    fn text(chat_id: ChatId, sender_id: UserId, content: &str) -> NewMessage {
        NewMessage {
            chat_id,
            sender_id,
            content: content.into(),
            attachment: None,
        }
    }

    #[test]
    fn inserted_message_is_sent() {
        let (db, chat, a, _) = setup();
        let message = db.insert_message(&text(chat, a, "hello")).unwrap();
        assert_eq!(message.status, MessageStatus::Sent);

        let loaded = db.get_message_by_id(message.id).unwrap();
        assert_eq!(loaded, message);
    }

    #[test]
    fn attachment_survives_storage() {
        let (db, chat, a, _) = setup();
        let mut new = text(chat, a, "look");
        new.attachment = Some(Attachment {
            key: "k1".into(),
            name: "cat.png".into(),
            url: "https://files.example/k1".into(),
        });
        let message = db.insert_message(&new).unwrap();
        let loaded = db.get_message_by_id(message.id).unwrap();
        assert_eq!(loaded.attachment, new.attachment);
    }

    #[test]
    fn outsider_cannot_post() {
        let (db, chat, _, _) = setup();
        let err = db.insert_message(&text(chat, UserId::new(), "hi")).unwrap_err();
        assert!(matches!(err, StoreError::NotAMember(_)));
    }

    #[test]
    fn history_is_ordered_by_creation() {
        let (db, chat, a, b) = setup();
        let first = db.insert_message(&text(chat, a, "1")).unwrap();
        let second = db.insert_message(&text(chat, b, "2")).unwrap();
        let third = db.insert_message(&text(chat, a, "3")).unwrap();

        let ids: Vec<_> = db
            .get_messages_for_chat(chat)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn status_only_moves_forward() {
        let (db, chat, a, _) = setup();
        let message = db.insert_message(&text(chat, a, "hi")).unwrap();

        let (t, m) = db
            .update_message_status(message.id, MessageStatus::Read)
            .unwrap();
        assert!(t.is_advanced());
        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(db.get_message_by_id(message.id).unwrap(), m);

        let (t, m) = db
            .update_message_status(message.id, MessageStatus::Delivered)
            .unwrap();
        assert_eq!(t, Transition::Unchanged(MessageStatus::Read));
        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(
            db.get_message_by_id(message.id).unwrap().status,
            MessageStatus::Read
        );
    }

    #[test]
    fn sending_is_never_written() {
        let (db, chat, a, _) = setup();
        let message = db.insert_message(&text(chat, a, "hi")).unwrap();
        assert!(matches!(
            db.update_message_status(message.id, MessageStatus::Sending),
            Err(StoreError::UnpersistableStatus(_))
        ));
    }

    #[test]
    fn unknown_message_is_not_found() {
        let (db, _, _, _) = setup();
        assert!(matches!(
            db.update_message_status(MessageId::new(), MessageStatus::Read),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.delete_message(MessageId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_returns_removed_row() {
        let (db, chat, a, _) = setup();
        let message = db.insert_message(&text(chat, a, "oops")).unwrap();
        let removed = db.delete_message(message.id).unwrap();
        assert_eq!(removed.id, message.id);
        assert!(db.get_messages_for_chat(chat).unwrap().is_empty());
    }
}
