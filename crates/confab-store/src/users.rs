//! User directory: lookups, block relationships and the presence flags
//! maintained by the real-time server.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use confab_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::rows::{fmt_ts, id_at, now, opt_ts_at, ts_at};

impl Database {
    /// Insert a user, or update name/username if the id already exists.
    pub fn upsert_user(&self, id: UserId, name: &str, username: &str) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (id, name, username, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, username = excluded.username",
            params![id.to_string(), name, username, fmt_ts(&now())],
        )?;
        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, username, is_online, last_active, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Id of the user holding `username`, if any.
    pub fn username_owner(&self, username: &str) -> Result<Option<UserId>> {
        let owner = self
            .conn()
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| id_at(row, 0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Return the ids from `ids` that are not in the directory.
    pub fn missing_users(&self, ids: &[UserId]) -> Result<Vec<UserId>> {
        let mut missing = Vec::new();
        for id in ids {
            if !self.user_exists(*id)? {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Record that `blocker` has blocked `blocked`. Idempotent.
    pub fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO blocks (blocker, blocked, created_at) VALUES (?1, ?2, ?3)",
            params![blocker.to_string(), blocked.to_string(), fmt_ts(&now())],
        )?;
        Ok(())
    }

    /// Returns `true` if a block was removed.
    pub fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM blocks WHERE blocker = ?1 AND blocked = ?2",
            params![blocker.to_string(), blocked.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Whether `blocker` has blocked `target`.
    pub fn has_blocked(&self, blocker: UserId, target: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE blocker = ?1 AND blocked = ?2)",
            params![blocker.to_string(), target.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Presence flags
    // ------------------------------------------------------------------

    /// Update the online flag and last-active timestamp as of `at`. Returns
    /// `false` if the user is not in the directory or a later update has
    /// already been recorded.
    pub fn set_presence(&self, id: UserId, online: bool, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = ?2, last_active = ?3
             WHERE id = ?1 AND (last_active IS NULL OR last_active <= ?3)",
            params![id.to_string(), online, fmt_ts(&at)],
        )?;
        Ok(affected > 0)
    }

    /// Clear every online flag. Presence is process-local, so flags left
    /// over from a previous run are stale.
    pub fn reset_presence(&self) -> Result<usize> {
        let affected = self
            .conn()
            .execute("UPDATE users SET is_online = 0 WHERE is_online = 1", [])?;
        Ok(affected)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: id_at(row, 0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        is_online: row.get(3)?,
        last_active: opt_ts_at(row, 4)?,
        created_at: ts_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_updates_existing() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();

        db.upsert_user(id, "Alice", "alice").unwrap();
        let user = db.upsert_user(id, "Alice B.", "alice").unwrap();

        assert_eq!(user.name, "Alice B.");
        assert!(!user.is_online);
    }

    #[test]
    fn test_username_owner() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();
        db.upsert_user(id, "Alice", "alice").unwrap();

        assert_eq!(db.username_owner("alice").unwrap(), Some(id));
        assert_eq!(db.username_owner("bob").unwrap(), None);
    }

    #[test]
    fn test_get_missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_missing_users() {
        let db = Database::open_in_memory().unwrap();
        let known = UserId::new();
        let unknown = UserId::new();
        db.upsert_user(known, "Known", "known").unwrap();

        assert_eq!(db.missing_users(&[known, unknown]).unwrap(), vec![unknown]);
    }

    #[test]
    fn test_block_is_directional() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        db.upsert_user(a, "A", "a").unwrap();
        db.upsert_user(b, "B", "b").unwrap();

        db.block_user(a, b).unwrap();
        db.block_user(a, b).unwrap();

        assert!(db.has_blocked(a, b).unwrap());
        assert!(!db.has_blocked(b, a).unwrap());

        assert!(db.unblock_user(a, b).unwrap());
        assert!(!db.has_blocked(a, b).unwrap());
    }

    #[test]
    fn test_presence_flags() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();
        db.upsert_user(id, "A", "a").unwrap();

        assert!(db.set_presence(id, true, Utc::now()).unwrap());
        let user = db.get_user(id).unwrap();
        assert!(user.is_online);
        assert!(user.last_active.is_some());

        assert_eq!(db.reset_presence().unwrap(), 1);
        assert!(!db.get_user(id).unwrap().is_online);

        assert!(!db.set_presence(UserId::new(), true, Utc::now()).unwrap());
    }

    #[test]
    fn test_stale_presence_update_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();
        db.upsert_user(id, "A", "a").unwrap();
        let connected = Utc::now();
        let disconnected = connected + chrono::Duration::seconds(1);

        assert!(db.set_presence(id, false, disconnected).unwrap());
        assert!(!db.set_presence(id, true, connected).unwrap());

        let user = db.get_user(id).unwrap();
        assert!(!user.is_online);
        assert_eq!(user.last_active.map(|t| fmt_ts(&t)), Some(fmt_ts(&disconnected)));
    }
}
