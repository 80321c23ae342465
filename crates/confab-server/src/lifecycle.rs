//! Conversation lifecycle: creation, group membership and admin transfer.
//!
//! Every membership change runs under the conversation's lock for its whole
//! read-validate-write sequence. Directory checks (existence, blocks) happen
//! between the read and the write, so the store guard is not held across
//! them; the per-conversation lock is what keeps concurrent changes apart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use confab_shared::constants::MAX_GROUP_NAME;
use confab_shared::{ConversationId, CoreError, CoreResult, UserId};
use confab_store::Conversation;

use crate::directory::UserDirectory;
use crate::error::OrNotFound;
use crate::store::Store;

type LockMap = HashMap<ConversationId, Arc<Mutex<()>>>;

/// One async mutex per conversation id. An entry lives only while a guard
/// holds it or a caller waits on it.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    locks: Arc<StdMutex<LockMap>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: ConversationId) -> ConversationGuard {
        let lock = lock_map(&self.locks).entry(id).or_default().clone();
        let held = lock.clone().lock_owned().await;
        ConversationGuard {
            id,
            lock,
            held: Some(held),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

fn lock_map(locks: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive access to one conversation. Dropping the last guard for an id
/// with no waiters removes its entry.
pub struct ConversationGuard {
    id: ConversationId,
    lock: Arc<Mutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
    locks: Arc<StdMutex<LockMap>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut map = lock_map(&self.locks);
        // The map and this guard are the only owners left: nobody waits.
        let idle = map
            .get(&self.id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if idle {
            map.remove(&self.id);
        }
    }
}

/// Result of a participant leaving a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeaveOutcome {
    /// The leaver is gone; the group lives on (possibly with a new admin).
    Left { conversation: Conversation },
    /// The leaver was the last participant and the group was deleted.
    Deleted { conversation_id: ConversationId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadSummary {
    pub total_unread: u64,
    pub by_conversation: BTreeMap<ConversationId, u32>,
}

pub struct LifecycleManager {
    store: Store,
    directory: Arc<dyn UserDirectory>,
    locks: ConversationLocks,
}

impl LifecycleManager {
    pub fn new(store: Store, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            store,
            directory,
            locks: ConversationLocks::new(),
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Return the 1:1 conversation between `caller` and `receiver`,
    /// creating it on first contact.
    pub async fn create_direct(&self, caller: UserId, receiver: UserId) -> CoreResult<Conversation> {
        if caller == receiver {
            return Err(CoreError::bad_request("cannot start a conversation with yourself"));
        }
        self.require_known(caller).await?;
        self.require_known(receiver).await?;
        if self.directory.has_blocked(receiver, caller).await? {
            return Err(CoreError::forbidden("this user has blocked you"));
        }

        let mut db = self.store.lock().await;
        if let Some(existing) = db.find_direct_conversation(caller, receiver)? {
            return Ok(existing);
        }
        let conversation = db.create_direct_conversation(caller, receiver)?;
        info!(
            conversation = %conversation.id.short(),
            a = %caller.short(),
            b = %receiver.short(),
            "direct conversation created"
        );
        Ok(conversation)
    }

    /// Create a group with `caller` as admin and first participant.
    pub async fn create_group(
        &self,
        caller: UserId,
        name: &str,
        participants: &[UserId],
    ) -> CoreResult<Conversation> {
        let name = validate_group_name(name)?;
        if participants.is_empty() {
            return Err(CoreError::bad_request("a group needs at least one participant"));
        }

        let mut members = vec![caller];
        for user in participants {
            if !members.contains(user) {
                members.push(*user);
            }
        }

        self.require_known(caller).await?;
        self.check_candidates(&members[1..], caller).await?;

        let conversation = self
            .store
            .lock()
            .await
            .create_group_conversation(name, caller, &members)?;
        info!(
            conversation = %conversation.id.short(),
            admin = %caller.short(),
            participants = members.len(),
            "group created"
        );
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Group administration
    // ------------------------------------------------------------------

    pub async fn update_group(
        &self,
        caller: UserId,
        id: ConversationId,
        group_name: Option<&str>,
        group_avatar: Option<&str>,
    ) -> CoreResult<Conversation> {
        let group_name = group_name.map(validate_group_name).transpose()?;

        let _guard = self.locks.acquire(id).await;
        let conversation = self.load(id).await?;
        require_group_admin(&conversation, caller)?;

        Ok(self
            .store
            .lock()
            .await
            .update_group_info(id, group_name, group_avatar)?)
    }

    /// Admin-only. Candidates already in the group are skipped; if none
    /// remain the call fails.
    pub async fn add_participants(
        &self,
        caller: UserId,
        id: ConversationId,
        candidates: &[UserId],
    ) -> CoreResult<Conversation> {
        let _guard = self.locks.acquire(id).await;
        let conversation = self.load(id).await?;
        require_group_admin(&conversation, caller)?;

        let mut added: Vec<UserId> = Vec::new();
        for user in candidates {
            if !conversation.is_participant(user) && !added.contains(user) {
                added.push(*user);
            }
        }
        if added.is_empty() {
            return Err(CoreError::invalid_state("all users are already participants"));
        }

        self.check_candidates(&added, caller).await?;

        let conversation = self.store.lock().await.add_participants(id, &added)?;
        info!(
            conversation = %id.short(),
            added = added.len(),
            "participants added"
        );
        Ok(conversation)
    }

    /// Admin-only. The admin leaves through [`leave`](Self::leave) instead.
    pub async fn remove_participant(
        &self,
        caller: UserId,
        id: ConversationId,
        target: UserId,
    ) -> CoreResult<Conversation> {
        let _guard = self.locks.acquire(id).await;
        let conversation = self.load(id).await?;
        require_group_admin(&conversation, caller)?;

        if target == caller {
            return Err(CoreError::forbidden("the admin cannot remove themselves"));
        }
        if !conversation.is_participant(&target) {
            return Err(CoreError::invalid_state("user is not a participant"));
        }

        let conversation = self
            .store
            .lock()
            .await
            .remove_participant(id, target, None)?;
        info!(conversation = %id.short(), user = %target.short(), "participant removed");
        Ok(conversation)
    }

    /// Leave a group. An admin hands the role to the earliest-joined
    /// remaining participant; the last participant out deletes the group.
    pub async fn leave(&self, caller: UserId, id: ConversationId) -> CoreResult<LeaveOutcome> {
        let _guard = self.locks.acquire(id).await;
        let conversation = self.load(id).await?;
        if !conversation.is_group {
            return Err(CoreError::invalid_state("only group conversations can be left"));
        }
        if !conversation.is_participant(&caller) {
            return Err(CoreError::forbidden("not a participant of this conversation"));
        }

        let successor = conversation.others(&caller).next().copied();

        let Some(successor) = successor else {
            self.store.lock().await.delete_conversation(id)?;
            info!(conversation = %id.short(), user = %caller.short(), "last participant left, group deleted");
            return Ok(LeaveOutcome::Deleted { conversation_id: id });
        };

        let new_admin = conversation.is_admin(&caller).then_some(successor);
        let conversation = self
            .store
            .lock()
            .await
            .remove_participant(id, caller, new_admin)?;
        info!(
            conversation = %id.short(),
            user = %caller.short(),
            new_admin = ?new_admin.map(|u| u.short()),
            "participant left"
        );
        Ok(LeaveOutcome::Left { conversation })
    }

    /// Admin-only transfer of the admin role to a current participant.
    pub async fn change_admin(
        &self,
        caller: UserId,
        id: ConversationId,
        target: UserId,
    ) -> CoreResult<Conversation> {
        let _guard = self.locks.acquire(id).await;
        let conversation = self.load(id).await?;
        require_group_admin(&conversation, caller)?;

        if !conversation.is_participant(&target) {
            return Err(CoreError::invalid_state("new admin must be a participant"));
        }

        let conversation = self
            .store
            .lock()
            .await
            .set_admin(id, target)
            .or_not_found(|| format!("participant {target}"))?;
        info!(conversation = %id.short(), admin = %target.short(), "admin changed");
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_conversation(&self, caller: UserId, id: ConversationId) -> CoreResult<Conversation> {
        let conversation = self.load(id).await?;
        if !conversation.is_participant(&caller) {
            return Err(CoreError::forbidden("not a participant of this conversation"));
        }
        Ok(conversation)
    }

    pub async fn list_conversations(&self, caller: UserId) -> CoreResult<Vec<Conversation>> {
        Ok(self.store.lock().await.list_conversations_for_user(caller)?)
    }

    pub async fn unread_summary(&self, caller: UserId) -> CoreResult<UnreadSummary> {
        let counts = self.store.lock().await.unread_counts_for_user(caller)?;
        Ok(UnreadSummary {
            total_unread: counts.iter().map(|(_, n)| u64::from(*n)).sum(),
            by_conversation: counts.into_iter().collect(),
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load(&self, id: ConversationId) -> CoreResult<Conversation> {
        self.store
            .lock()
            .await
            .get_conversation(id)
            .or_not_found(|| format!("conversation {id}"))
    }

    async fn require_known(&self, user: UserId) -> CoreResult<()> {
        if !self.directory.exists(user).await? {
            return Err(CoreError::not_found(format!("user {user}")));
        }
        Ok(())
    }

    /// Every candidate must exist and must not have blocked `inviter`.
    async fn check_candidates(&self, candidates: &[UserId], inviter: UserId) -> CoreResult<()> {
        let missing = self.directory.missing(candidates).await?;
        if let Some(first) = missing.first() {
            return Err(CoreError::not_found(format!("user {first}")));
        }
        for user in candidates {
            if self.directory.has_blocked(*user, inviter).await? {
                return Err(CoreError::forbidden(format!("user {user} has blocked you")));
            }
        }
        Ok(())
    }
}

fn require_group_admin(conversation: &Conversation, caller: UserId) -> CoreResult<()> {
    if !conversation.is_group {
        return Err(CoreError::invalid_state("not a group conversation"));
    }
    if !conversation.is_admin(&caller) {
        return Err(CoreError::forbidden("only the group admin can do this"));
    }
    Ok(())
}

fn validate_group_name(name: &str) -> CoreResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_request("group name is required"));
    }
    if name.chars().count() > MAX_GROUP_NAME {
        return Err(CoreError::bad_request(format!(
            "group name exceeds {MAX_GROUP_NAME} characters"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::directory::StoreDirectory;

    struct Fixture {
        manager: Arc<LifecycleManager>,
        store: Store,
    }

    async fn fixture() -> Fixture {
        let store = crate::store::in_memory().unwrap();
        let manager = LifecycleManager::new(store.clone(), Arc::new(StoreDirectory::new(store.clone())));
        Fixture {
            manager: Arc::new(manager),
            store,
        }
    }

    async fn user(store: &Store, name: &str) -> UserId {
        let id = UserId::new();
        store.lock().await.upsert_user(id, name, name).unwrap();
        id
    }

    fn assert_keys_match_participants(conversation: &Conversation) {
        let keys: BTreeSet<_> = conversation.unread_count.keys().copied().collect();
        let participants: BTreeSet<_> = conversation.participants.iter().copied().collect();
        assert_eq!(keys, participants);
    }

    #[tokio::test]
    async fn test_create_direct_is_idempotent() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;

        let first = fx.manager.create_direct(alice, bob).await.unwrap();
        let second = fx.manager.create_direct(bob, alice).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(!first.is_group);
        assert_eq!(first.admin, None);
        assert_keys_match_participants(&first);
    }

    #[tokio::test]
    async fn test_create_direct_rejections() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        fx.store.lock().await.block_user(bob, alice).unwrap();

        assert!(matches!(
            fx.manager.create_direct(alice, alice).await,
            Err(CoreError::BadRequest(_))
        ));
        assert!(matches!(
            fx.manager.create_direct(alice, UserId::new()).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            fx.manager.create_direct(alice, bob).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            fx.manager.create_direct(UserId::new(), alice).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_group_puts_creator_first_as_admin() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let carol = user(&fx.store, "carol").await;

        let group = fx
            .manager
            .create_group(alice, "  friends ", &[bob, carol, bob, alice])
            .await
            .unwrap();

        assert!(group.is_group);
        assert_eq!(group.group_name.as_deref(), Some("friends"));
        assert_eq!(group.admin, Some(alice));
        assert_eq!(group.participants, vec![alice, bob, carol]);
        assert!(group.unread_count.values().all(|n| *n == 0));
        assert_keys_match_participants(&group);
    }

    #[tokio::test]
    async fn test_create_group_rejections() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        fx.store.lock().await.block_user(bob, alice).unwrap();

        assert!(matches!(
            fx.manager.create_group(alice, " ", &[bob]).await,
            Err(CoreError::BadRequest(_))
        ));
        assert!(matches!(
            fx.manager.create_group(alice, "g", &[]).await,
            Err(CoreError::BadRequest(_))
        ));
        assert!(matches!(
            fx.manager.create_group(alice, "g", &[UserId::new()]).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            fx.manager.create_group(alice, "g", &[bob]).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            fx.manager.create_group(UserId::new(), "g", &[alice]).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_participants() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let carol = user(&fx.store, "carol").await;
        let dave = user(&fx.store, "dave").await;
        fx.store.lock().await.block_user(dave, alice).unwrap();
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        assert!(matches!(
            fx.manager.add_participants(bob, group.id, &[carol]).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            fx.manager.add_participants(alice, group.id, &[bob, alice]).await,
            Err(CoreError::InvalidState(_))
        ));
        assert!(matches!(
            fx.manager.add_participants(alice, group.id, &[carol, dave]).await,
            Err(CoreError::Forbidden(_))
        ));

        let grown = fx
            .manager
            .add_participants(alice, group.id, &[bob, carol])
            .await
            .unwrap();
        assert_eq!(grown.participants, vec![alice, bob, carol]);
        assert_eq!(grown.unread_for(&carol), 0);
        assert_keys_match_participants(&grown);
    }

    #[tokio::test]
    async fn test_group_operations_reject_direct_conversations() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let direct = fx.manager.create_direct(alice, bob).await.unwrap();

        assert!(matches!(
            fx.manager.update_group(alice, direct.id, Some("x"), None).await,
            Err(CoreError::InvalidState(_))
        ));
        assert!(matches!(
            fx.manager.leave(alice, direct.id).await,
            Err(CoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_update_group_is_admin_only() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        assert!(matches!(
            fx.manager.update_group(bob, group.id, Some("mine"), None).await,
            Err(CoreError::Forbidden(_))
        ));

        let updated = fx
            .manager
            .update_group(alice, group.id, None, Some("blob://avatar"))
            .await
            .unwrap();
        assert_eq!(updated.group_name.as_deref(), Some("g"));
        assert_eq!(updated.group_avatar.as_deref(), Some("blob://avatar"));
    }

    #[tokio::test]
    async fn test_remove_participant() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        assert!(matches!(
            fx.manager.remove_participant(alice, group.id, alice).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            fx.manager.remove_participant(bob, group.id, alice).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            fx.manager.remove_participant(alice, group.id, UserId::new()).await,
            Err(CoreError::InvalidState(_))
        ));

        let shrunk = fx.manager.remove_participant(alice, group.id, bob).await.unwrap();
        assert_eq!(shrunk.participants, vec![alice]);
        assert_keys_match_participants(&shrunk);
    }

    #[tokio::test]
    async fn test_admin_leave_transfers_to_earliest_joined() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let carol = user(&fx.store, "carol").await;
        let group = fx.manager.create_group(alice, "g", &[bob, carol]).await.unwrap();

        let LeaveOutcome::Left { conversation } = fx.manager.leave(alice, group.id).await.unwrap()
        else {
            panic!("group should survive");
        };

        assert_eq!(conversation.admin, Some(bob));
        assert_eq!(conversation.participants, vec![bob, carol]);
        assert_keys_match_participants(&conversation);
    }

    #[tokio::test]
    async fn test_admin_leaves_pair_group() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        let LeaveOutcome::Left { conversation } = fx.manager.leave(alice, group.id).await.unwrap()
        else {
            panic!("group should survive");
        };

        assert_eq!(conversation.admin, Some(bob));
        assert_eq!(conversation.participants, vec![bob]);
        assert_eq!(conversation.unread_count.keys().copied().collect::<Vec<_>>(), vec![bob]);
    }

    #[tokio::test]
    async fn test_non_admin_leave_keeps_admin() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        let LeaveOutcome::Left { conversation } = fx.manager.leave(bob, group.id).await.unwrap()
        else {
            panic!("group should survive");
        };
        assert_eq!(conversation.admin, Some(alice));

        assert!(matches!(
            fx.manager.leave(bob, group.id).await,
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_last_participant_leaving_deletes_group() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();
        fx.manager.remove_participant(alice, group.id, bob).await.unwrap();

        assert_eq!(
            fx.manager.leave(alice, group.id).await.unwrap(),
            LeaveOutcome::Deleted {
                conversation_id: group.id
            }
        );
        assert!(matches!(
            fx.manager.get_conversation(alice, group.id).await,
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(fx.manager.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_unknown_conversations_leave_no_lock_behind() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;

        for _ in 0..100 {
            assert!(matches!(
                fx.manager.change_admin(alice, ConversationId::new(), alice).await,
                Err(CoreError::NotFound(_))
            ));
            assert!(matches!(
                fx.manager.leave(alice, ConversationId::new()).await,
                Err(CoreError::NotFound(_))
            ));
        }

        assert_eq!(fx.manager.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_is_kept_while_waited_on() {
        let locks = ConversationLocks::new();
        let id = ConversationId::new();

        let first = locks.acquire(id).await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move {
                let _second = locks.acquire(id).await;
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(locks.tracked(), 1);

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_group_edits_release_their_lock() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let manager = fx.manager.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("g{i}");
                manager
                    .update_group(alice, group.id, Some(name.as_str()), None)
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(fx.manager.locks.tracked(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_leaves_end_consistently() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        let a = tokio::spawn({
            let manager = fx.manager.clone();
            async move { manager.leave(alice, group.id).await }
        });
        let b = tokio::spawn({
            let manager = fx.manager.clone();
            async move { manager.leave(bob, group.id).await }
        });
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let deleted = outcomes
            .iter()
            .filter(|o| matches!(o, LeaveOutcome::Deleted { .. }))
            .count();
        assert_eq!(deleted, 1);
        assert!(fx.store.lock().await.get_conversation(group.id).is_err());
    }

    #[tokio::test]
    async fn test_change_admin() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let group = fx.manager.create_group(alice, "g", &[bob]).await.unwrap();

        assert!(matches!(
            fx.manager.change_admin(bob, group.id, bob).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            fx.manager.change_admin(alice, group.id, UserId::new()).await,
            Err(CoreError::InvalidState(_))
        ));

        let changed = fx.manager.change_admin(alice, group.id, bob).await.unwrap();
        assert_eq!(changed.admin, Some(bob));
    }

    #[tokio::test]
    async fn test_reads_are_participant_only() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let outsider = user(&fx.store, "eve").await;
        let direct = fx.manager.create_direct(alice, bob).await.unwrap();

        assert!(fx.manager.get_conversation(bob, direct.id).await.is_ok());
        assert!(matches!(
            fx.manager.get_conversation(outsider, direct.id).await,
            Err(CoreError::Forbidden(_))
        ));
        assert_eq!(fx.manager.list_conversations(alice).await.unwrap().len(), 1);
        assert!(fx.manager.list_conversations(outsider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unread_summary() {
        let fx = fixture().await;
        let alice = user(&fx.store, "alice").await;
        let bob = user(&fx.store, "bob").await;
        let carol = user(&fx.store, "carol").await;
        let direct = fx.manager.create_direct(alice, bob).await.unwrap();
        let group = fx.manager.create_group(carol, "g", &[bob]).await.unwrap();

        {
            let mut db = fx.store.lock().await;
            for (conversation, sender) in [(direct.id, alice), (direct.id, alice), (group.id, carol)] {
                db.record_message(confab_store::NewMessage {
                    conversation_id: conversation,
                    sender,
                    content: Some("hey".into()),
                    attachments: vec![],
                })
                .unwrap();
            }
        }

        let summary = fx.manager.unread_summary(bob).await.unwrap();
        assert_eq!(summary.total_unread, 3);
        assert_eq!(summary.by_conversation.get(&direct.id), Some(&2));
        assert_eq!(summary.by_conversation.get(&group.id), Some(&1));
    }
}
