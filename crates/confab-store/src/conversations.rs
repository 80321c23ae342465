//! Conversation records, participant sets and per-participant unread
//! counters.
//!
//! The unread counter is a column of the participant row, so the set of
//! counter keys is the participant set by construction. Every helper that
//! touches more than one row runs in a single transaction.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use confab_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;
use crate::rows::{fmt_ts, id_at, now, opt_id_at, ts_at};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a non-group conversation between `a` and `b`.
    pub fn create_direct_conversation(&mut self, a: UserId, b: UserId) -> Result<Conversation> {
        let id = ConversationId::new();
        let ts = fmt_ts(&now());

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, is_group, created_at, updated_at)
             VALUES (?1, 0, ?2, ?2)",
            params![id.to_string(), ts],
        )?;
        insert_participant(&tx, id, a, &ts)?;
        insert_participant(&tx, id, b, &ts)?;
        tx.commit()?;

        self.get_conversation(id)
    }

    /// Create a group conversation. `participants` is taken in order and
    /// must already contain `admin`; duplicates are ignored.
    pub fn create_group_conversation(
        &mut self,
        name: &str,
        admin: UserId,
        participants: &[UserId],
    ) -> Result<Conversation> {
        let id = ConversationId::new();
        let ts = fmt_ts(&now());

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, is_group, group_name, admin, created_at, updated_at)
             VALUES (?1, 1, ?2, ?3, ?4, ?4)",
            params![id.to_string(), name, admin.to_string(), ts],
        )?;
        for user in participants {
            tx.execute(
                "INSERT OR IGNORE INTO participants (conversation_id, user_id, unread_count, joined_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![id.to_string(), user.to_string(), ts],
            )?;
        }
        tx.commit()?;

        self.get_conversation(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        load_conversation(self.conn(), id)
    }

    /// Find the non-group conversation whose participants are exactly
    /// `{a, b}`.
    pub fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT c.id FROM conversations c
                 WHERE c.is_group = 0
                   AND (SELECT COUNT(*) FROM participants p WHERE p.conversation_id = c.id) = 2
                   AND EXISTS (SELECT 1 FROM participants p
                               WHERE p.conversation_id = c.id AND p.user_id = ?1)
                   AND EXISTS (SELECT 1 FROM participants p
                               WHERE p.conversation_id = c.id AND p.user_id = ?2)
                 ORDER BY c.created_at ASC
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(Some(self.get_conversation(id.parse()?)?)),
            None => Ok(None),
        }
    }

    /// Conversations `user` participates in, most recently updated first.
    pub fn list_conversations_for_user(&self, user: UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM conversations c
             JOIN participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.updated_at DESC, c.id ASC",
        )?;

        let ids = stmt.query_map(params![user.to_string()], |row| id_at(row, 0))?;

        let mut conversations = Vec::new();
        for id in ids {
            conversations.push(load_conversation(self.conn(), id?)?);
        }
        Ok(conversations)
    }

    /// `(conversation, unread)` for every conversation `user` is in.
    pub fn unread_counts_for_user(&self, user: UserId) -> Result<Vec<(ConversationId, u32)>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, unread_count FROM participants
             WHERE user_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            Ok((id_at::<ConversationId>(row, 0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Update group name and/or avatar. `None` leaves a field unchanged.
    pub fn update_group_info(
        &self,
        id: ConversationId,
        group_name: Option<&str>,
        group_avatar: Option<&str>,
    ) -> Result<Conversation> {
        let affected = self.conn().execute(
            "UPDATE conversations
             SET group_name = COALESCE(?2, group_name),
                 group_avatar = COALESCE(?3, group_avatar),
                 updated_at = ?4
             WHERE id = ?1",
            params![id.to_string(), group_name, group_avatar, fmt_ts(&now())],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_conversation(id)
    }

    /// Add participants with a zeroed unread counter. Fails as a whole if
    /// any of them is already a participant.
    pub fn add_participants(
        &mut self,
        id: ConversationId,
        users: &[UserId],
    ) -> Result<Conversation> {
        let ts = fmt_ts(&now());

        let tx = self.conn_mut().transaction()?;
        touch(&tx, id, &ts)?;
        for user in users {
            insert_participant(&tx, id, *user, &ts)?;
        }
        tx.commit()?;

        self.get_conversation(id)
    }

    /// Remove `user` (and their unread counter). When `successor` is given
    /// the admin role moves to it in the same transaction.
    pub fn remove_participant(
        &mut self,
        id: ConversationId,
        user: UserId,
        successor: Option<UserId>,
    ) -> Result<Conversation> {
        let ts = fmt_ts(&now());

        let tx = self.conn_mut().transaction()?;
        touch(&tx, id, &ts)?;
        if let Some(successor) = successor {
            tx.execute(
                "UPDATE conversations SET admin = ?2 WHERE id = ?1",
                params![id.to_string(), successor.to_string()],
            )?;
        }
        let removed = tx.execute(
            "DELETE FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        if removed == 0 {
            // Dropping the transaction rolls back the admin change.
            return Err(StoreError::NotFound);
        }
        tx.commit()?;

        self.get_conversation(id)
    }

    /// Hand the admin role to `user`, who must be a current participant.
    pub fn set_admin(&self, id: ConversationId, user: UserId) -> Result<Conversation> {
        let affected = self.conn().execute(
            "UPDATE conversations SET admin = ?2, updated_at = ?3
             WHERE id = ?1
               AND EXISTS (SELECT 1 FROM participants
                           WHERE conversation_id = ?1 AND user_id = ?2)",
            params![id.to_string(), user.to_string(), fmt_ts(&now())],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_conversation(id)
    }

    /// Reset `user`'s unread counter to zero. Returns `false` if `user` is
    /// not a participant.
    pub fn reset_unread(&self, id: ConversationId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE participants SET unread_count = 0
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a conversation together with its participants and messages.
    /// Returns `true` if a row was deleted.
    pub fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_participant(conn: &Connection, id: ConversationId, user: UserId, ts: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO participants (conversation_id, user_id, unread_count, joined_at)
         VALUES (?1, ?2, 0, ?3)",
        params![id.to_string(), user.to_string(), ts],
    )?;
    Ok(())
}

/// Bump `updated_at`; fails with `NotFound` if the conversation is gone.
fn touch(conn: &Connection, id: ConversationId, ts: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), ts],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn load_conversation(conn: &Connection, id: ConversationId) -> Result<Conversation> {
    let mut conversation = conn
        .query_row(
            "SELECT id, is_group, group_name, group_avatar, admin, last_message,
                    created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(Conversation {
                    id: id_at(row, 0)?,
                    participants: Vec::new(),
                    is_group: row.get(1)?,
                    group_name: row.get(2)?,
                    group_avatar: row.get(3)?,
                    admin: opt_id_at(row, 4)?,
                    last_message: opt_id_at(row, 5)?,
                    unread_count: BTreeMap::new(),
                    created_at: ts_at(row, 6)?,
                    updated_at: ts_at(row, 7)?,
                })
            },
        )
        .map_err(StoreError::from_query)?;

    let mut stmt = conn.prepare(
        "SELECT user_id, unread_count FROM participants
         WHERE conversation_id = ?1
         ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        Ok((id_at::<UserId>(row, 0)?, row.get::<_, u32>(1)?))
    })?;

    for row in rows {
        let (user, unread) = row?;
        conversation.participants.push(user);
        conversation.unread_count.insert(user, unread);
    }

    Ok(conversation)
}
