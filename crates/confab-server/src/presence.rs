//! Process-wide presence registry.
//!
//! Tracks every open socket connection and, for identified connections,
//! which user it belongs to. At most one connection per user: a reconnect
//! replaces the previous handle. All state sits behind one `RwLock`, and
//! online/offline broadcasts are issued while the write lock is held, so the
//! broadcast order matches the order of registry mutations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info};

use confab_shared::{CoreError, CoreResult, UserId};

use crate::protocol::ServerEvent;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a socket connection.
pub type ConnectionId = u64;

/// Sending side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its socket writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting. A full queue or a closed connection
    /// is a transient delivery failure.
    pub fn push(&self, event: ServerEvent) -> CoreResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => {
                CoreError::TransientDelivery(format!("connection {} queue full", self.id))
            }
            TrySendError::Closed(_) => {
                CoreError::TransientDelivery(format!("connection {} closed", self.id))
            }
        })
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

#[derive(Default)]
struct PresenceState {
    /// Every open connection, identified or not.
    connections: HashMap<ConnectionId, ConnectionHandle>,
    /// Identified users.
    users: HashMap<UserId, ConnectionHandle>,
}

impl PresenceState {
    fn broadcast(&self, event: &ServerEvent, except: ConnectionId) -> usize {
        let mut delivered = 0;
        for (id, handle) in &self.connections {
            if *id == except {
                continue;
            }
            match handle.push(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(connection = id, error = %e, "presence broadcast dropped"),
            }
        }
        delivered
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<PresenceState>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened connection so it receives presence broadcasts.
    pub async fn attach(&self, handle: ConnectionHandle) {
        let mut state = self.inner.write().await;
        state.connections.insert(handle.id, handle);
    }

    /// Forget a closed connection. Returns the user that went offline, if
    /// the connection was still that user's current handle.
    pub async fn detach(&self, handle: &ConnectionHandle) -> Option<UserId> {
        let mut state = self.inner.write().await;
        state.connections.remove(&handle.id);
        Self::unregister_locked(&mut state, handle)
    }

    /// Bind `user` to `handle`, replacing any previous handle, and announce
    /// the user online to every other connection. Announces on every call,
    /// including repeated registrations. Returns the replaced handle.
    pub async fn register(&self, user: UserId, handle: &ConnectionHandle) -> Option<ConnectionHandle> {
        let mut state = self.inner.write().await;
        state
            .connections
            .entry(handle.id)
            .or_insert_with(|| handle.clone());
        let previous = state.users.insert(user, handle.clone());

        let notified = state.broadcast(&ServerEvent::UserOnline { user_id: user }, handle.id);
        info!(
            user = %user.short(),
            connection = handle.id,
            replaced = previous.is_some(),
            notified,
            "user online"
        );

        previous
    }

    /// Remove the user entry whose handle is `handle` and announce the user
    /// offline. A handle that was already replaced by a newer registration
    /// matches nothing and announces nothing.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> Option<UserId> {
        let mut state = self.inner.write().await;
        Self::unregister_locked(&mut state, handle)
    }

    fn unregister_locked(state: &mut PresenceState, handle: &ConnectionHandle) -> Option<UserId> {
        let user = state
            .users
            .iter()
            .find(|(_, h)| h.id == handle.id)
            .map(|(user, _)| *user)?;
        state.users.remove(&user);

        let notified = state.broadcast(&ServerEvent::UserOffline { user_id: user }, handle.id);
        info!(user = %user.short(), connection = handle.id, notified, "user offline");

        Some(user)
    }

    /// Current handle for `user`. `None` means offline.
    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.inner.read().await.users.get(&user).cloned()
    }

    #[cfg(test)]
    pub async fn is_online(&self, user: UserId) -> bool {
        self.inner.read().await.users.contains_key(&user)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
