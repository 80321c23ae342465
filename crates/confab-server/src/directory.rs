//! Read-only view of the user directory consumed by the lifecycle manager.

use async_trait::async_trait;

use confab_shared::{CoreResult, UserId};

use crate::store::Store;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user: UserId) -> CoreResult<bool>;

    /// Whether `blocker` has blocked `target`.
    async fn has_blocked(&self, blocker: UserId, target: UserId) -> CoreResult<bool>;

    /// Users from `users` that are not in the directory, in input order.
    async fn missing(&self, users: &[UserId]) -> CoreResult<Vec<UserId>> {
        let mut missing = Vec::new();
        for user in users {
            if !self.exists(*user).await? {
                missing.push(*user);
            }
        }
        Ok(missing)
    }
}

/// Directory backed by the `users` and `blocks` tables.
pub struct StoreDirectory {
    store: Store,
}

impl StoreDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserDirectory for StoreDirectory {
    async fn exists(&self, user: UserId) -> CoreResult<bool> {
        Ok(self.store.lock().await.user_exists(user)?)
    }

    async fn has_blocked(&self, blocker: UserId, target: UserId) -> CoreResult<bool> {
        Ok(self.store.lock().await.has_blocked(blocker, target)?)
    }

    async fn missing(&self, users: &[UserId]) -> CoreResult<Vec<UserId>> {
        Ok(self.store.lock().await.missing_users(users)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_directory() {
        let store = crate::store::in_memory().unwrap();
        let (alice, bob, ghost) = (UserId::new(), UserId::new(), UserId::new());
        {
            let db = store.lock().await;
            db.upsert_user(alice, "Alice", "alice").unwrap();
            db.upsert_user(bob, "Bob", "bob").unwrap();
            db.block_user(bob, alice).unwrap();
        }

        let directory = StoreDirectory::new(store);
        assert!(directory.exists(alice).await.unwrap());
        assert!(!directory.exists(ghost).await.unwrap());
        assert!(directory.has_blocked(bob, alice).await.unwrap());
        assert!(!directory.has_blocked(alice, bob).await.unwrap());
        assert_eq!(
            directory.missing(&[alice, ghost, bob]).await.unwrap(),
            vec![ghost]
        );
    }
}
