//! Message log: the send-path write, ordered reads, read receipts and soft
//! delete.

use chrono::{DateTime, Utc};
use rusqlite::params;

use confab_shared::{ConversationId, MessageId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};
use crate::rows::{fmt_ts, id_at, now, opt_ts_at, ts_at};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender, content, attachments, is_read, read_at, is_deleted, created_at";

impl Database {
    /// Persist a message and update its conversation in one transaction:
    /// `last_message` points at the new message and every participant other
    /// than the sender gets `unread_count + 1`.
    ///
    /// The increment is a single SQL `UPDATE`, so concurrent sends to the
    /// same conversation compose instead of overwriting each other.
    pub fn record_message(&mut self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            conversation_id: new.conversation_id,
            sender: new.sender,
            content: new.content,
            attachments: new.attachments,
            is_read: false,
            read_at: None,
            is_deleted: false,
            created_at: now(),
        };
        let attachments = serde_json::to_string(&message.attachments)?;
        let ts = fmt_ts(&message.created_at);
        let conversation = message.conversation_id.to_string();

        let tx = self.conn_mut().transaction()?;

        let touched = tx.execute(
            "UPDATE conversations SET last_message = ?2, updated_at = ?3 WHERE id = ?1",
            params![conversation, message.id.to_string(), ts],
        )?;
        if touched == 0 {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender, content, attachments, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                conversation,
                message.sender.to_string(),
                message.content,
                attachments,
                ts,
            ],
        )?;

        tx.execute(
            "UPDATE participants SET unread_count = unread_count + 1
             WHERE conversation_id = ?1 AND user_id != ?2",
            params![conversation, message.sender.to_string()],
        )?;

        tx.commit()?;

        tracing::debug!(
            message = %message.id.short(),
            conversation = %message.conversation_id.short(),
            "message recorded"
        );

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)
    }

    /// All messages of a conversation, oldest first.
    pub fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, seq ASC"
        ))?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Set the read receipt on a message.
    pub fn mark_message_read(&self, id: MessageId, at: DateTime<Utc>) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1, read_at = ?2 WHERE id = ?1",
            params![id.to_string(), fmt_ts(&at)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_message(id)
    }

    /// Flag a message deleted and scrub its content and attachments. The
    /// row stays so `last_message` pointers remain valid; the content is
    /// not recoverable.
    pub fn soft_delete_message(&self, id: MessageId) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_deleted = 1, content = NULL, attachments = '[]'
             WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_message(id)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let attachments_json: String = row.get(4)?;
    let attachments: Vec<String> = serde_json::from_str(&attachments_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: id_at(row, 0)?,
        conversation_id: id_at(row, 1)?,
        sender: id_at(row, 2)?,
        content: row.get(3)?,
        attachments,
        is_read: row.get(5)?,
        read_at: opt_ts_at(row, 6)?,
        is_deleted: row.get(7)?,
        created_at: ts_at(row, 8)?,
    })
}
