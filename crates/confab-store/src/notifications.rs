//! Persisted notification events.

use rusqlite::params;

use confab_shared::{NotificationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewNotification, Notification, NotificationKind};
use crate::rows::{fmt_ts, id_at, now, opt_id_at, opt_ts_at, ts_at};

const NOTIFICATION_COLUMNS: &str =
    "id, recipient, sender, kind, conversation_id, message_id, text, is_read, read_at, created_at";

impl Database {
    pub fn insert_notification(&self, new: &NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: NotificationId::new(),
            recipient: new.recipient,
            sender: new.sender,
            kind: new.kind,
            conversation_id: new.conversation_id,
            message_id: new.message_id,
            text: new.text.clone(),
            is_read: false,
            read_at: None,
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO notifications
                 (id, recipient, sender, kind, conversation_id, message_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                notification.id.to_string(),
                notification.recipient.to_string(),
                notification.sender.map(|s| s.to_string()),
                notification.kind.as_str(),
                notification.conversation_id.map(|c| c.to_string()),
                notification.message_id.map(|m| m.to_string()),
                notification.text,
                fmt_ts(&notification.created_at),
            ],
        )?;

        Ok(notification)
    }

    pub fn get_notification(&self, id: NotificationId) -> Result<Notification> {
        self.conn()
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![id.to_string()],
                row_to_notification,
            )
            .map_err(StoreError::from_query)
    }

    /// Notifications addressed to `recipient`, newest first.
    pub fn list_notifications(&self, recipient: UserId) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map(params![recipient.to_string()], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    pub fn mark_notification_read(&self, id: NotificationId) -> Result<Notification> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE id = ?1",
            params![id.to_string(), fmt_ts(&now())],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_notification(id)
    }

    /// Mark every unread notification of `recipient` read. Returns how many
    /// changed.
    pub fn mark_all_notifications_read(&self, recipient: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2
             WHERE recipient = ?1 AND is_read = 0",
            params![recipient.to_string(), fmt_ts(&now())],
        )?;
        Ok(affected)
    }

    pub fn delete_notification(&self, id: NotificationId) -> Result<()> {
        let affected = self
            .conn()
            .execute("DELETE FROM notifications WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind_str: String = row.get(3)?;
    let kind = NotificationKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, kind_str.clone(), rusqlite::types::Type::Text)
    })?;

    Ok(Notification {
        id: id_at(row, 0)?,
        recipient: id_at(row, 1)?,
        sender: opt_id_at(row, 2)?,
        kind,
        conversation_id: opt_id_at(row, 4)?,
        message_id: opt_id_at(row, 5)?,
        text: row.get(6)?,
        is_read: row.get(7)?,
        read_at: opt_ts_at(row, 8)?,
        created_at: ts_at(row, 9)?,
    })
}
