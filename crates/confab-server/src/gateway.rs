//! Messaging gateway: the real-time control surface.
//!
//! A send is one logical unit: resolve, authorize and persist under a single
//! store guard, then fan out to online recipients and emit one notification
//! per recipient. Persistence is the durability point and is never retried;
//! everything after it is best effort and only logged on failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use confab_shared::constants::{MAX_ATTACHMENTS, MAX_MESSAGE_CONTENT, MESSAGE_NOTIFICATION_TEXT};
use confab_shared::{ConversationId, CoreError, CoreResult, MessageId, UserId};
use confab_store::{Conversation, Message, NewMessage, NewNotification, NotificationKind};

use crate::config::ServerConfig;
use crate::error::OrNotFound;
use crate::notify::NotificationSink;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::protocol::ServerEvent;
use crate::store::Store;

/// Retry policy for best-effort delivery and notification emission.
#[derive(Debug, Clone, Copy)]
pub struct FanoutPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl FanoutPolicy {
    /// Run `attempt` until it succeeds or the retries are used up. The delay
    /// grows linearly with the attempt number.
    async fn run<F, Fut>(&self, mut attempt: F) -> CoreResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<()>>,
    {
        let mut failures = 0;
        loop {
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(e) if failures < self.retries => {
                    failures += 1;
                    debug!(attempt = failures, error = %e, "retrying fan-out");
                    tokio::time::sleep(self.backoff * failures).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&ServerConfig> for FanoutPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            retries: config.fanout_retries,
            backoff: config.fanout_backoff,
        }
    }
}

pub struct Gateway {
    store: Store,
    presence: PresenceRegistry,
    notifier: Arc<dyn NotificationSink>,
    policy: FanoutPolicy,
}

impl Gateway {
    pub fn new(
        store: Store,
        presence: PresenceRegistry,
        notifier: Arc<dyn NotificationSink>,
        policy: FanoutPolicy,
    ) -> Self {
        Self {
            store,
            presence,
            notifier,
            policy,
        }
    }

    #[cfg(test)]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Bind `user` to `handle` and announce them online.
    pub async fn connect(&self, user: UserId, handle: &ConnectionHandle) {
        self.presence.register(user, handle).await;
        self.spawn_presence_update(user, true);
    }

    /// Retire a closed connection. The user goes offline only if `handle`
    /// was still their current connection.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        if let Some(user) = self.presence.detach(handle).await {
            self.spawn_presence_update(user, false);
        }
    }

    /// Stamped now, written later. The store drops an update older than the
    /// one it already holds, so a late connect cannot undo a disconnect.
    fn spawn_presence_update(&self, user: UserId, online: bool) {
        let store = self.store.clone();
        let at = Utc::now();
        tokio::spawn(async move {
            let result = store.lock().await.set_presence(user, online, at);
            match result {
                Ok(true) => debug!(user = %user.short(), online, "presence recorded"),
                Ok(false) => debug!(user = %user.short(), online, "presence update skipped"),
                Err(e) => warn!(user = %user.short(), error = %e, "failed to record presence"),
            }
        });
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Persist a message from `sender` and fan it out. Returns the persisted
    /// message once it is durable; fan-out failures never reach the caller.
    pub async fn send_message(
        &self,
        sender: UserId,
        conversation_id: ConversationId,
        content: Option<String>,
        attachments: Vec<String>,
    ) -> CoreResult<Message> {
        let content = content.filter(|c| !c.trim().is_empty());
        validate_payload(content.as_deref(), &attachments)?;

        let (conversation, message) = {
            let mut db = self.store.lock().await;
            let conversation = db
                .get_conversation(conversation_id)
                .or_not_found(|| format!("conversation {conversation_id}"))?;
            if !conversation.is_participant(&sender) {
                return Err(CoreError::forbidden("not a participant of this conversation"));
            }
            let message = db
                .record_message(NewMessage {
                    conversation_id,
                    sender,
                    content,
                    attachments,
                })
                .or_not_found(|| format!("conversation {conversation_id}"))?;
            (conversation, message)
        };

        info!(
            message = %message.id.short(),
            conversation = %conversation_id.short(),
            sender = %sender.short(),
            "message persisted"
        );

        self.fan_out(&conversation, &message).await;

        Ok(message)
    }

    async fn fan_out(&self, conversation: &Conversation, message: &Message) {
        let event = ServerEvent::ReceiveMessage {
            message: message.clone(),
        };

        for recipient in conversation.others(&message.sender).copied() {
            if let Err(e) = self.deliver(recipient, &event).await {
                warn!(
                    recipient = %recipient.short(),
                    message = %message.id.short(),
                    error = %e,
                    "message delivery failed"
                );
            }

            self.spawn_notification(NewNotification {
                recipient,
                sender: Some(message.sender),
                kind: NotificationKind::Message,
                conversation_id: Some(message.conversation_id),
                message_id: Some(message.id),
                text: MESSAGE_NOTIFICATION_TEXT.to_string(),
            });
        }
    }

    /// Push `event` to `recipient` if online. Presence is looked up again on
    /// every attempt so a reconnect between attempts is picked up.
    async fn deliver(&self, recipient: UserId, event: &ServerEvent) -> CoreResult<()> {
        let presence = &self.presence;
        self.policy
            .run(|| async move {
                match presence.lookup(recipient).await {
                    Some(handle) => handle.push(event.clone()),
                    None => Ok(()),
                }
            })
            .await
    }

    fn spawn_notification(&self, notification: NewNotification) {
        let notifier = self.notifier.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            let result = policy.run(|| notifier.emit(notification.clone())).await;
            if let Err(e) = result {
                warn!(
                    recipient = %notification.recipient.short(),
                    error = %e,
                    "notification dropped"
                );
            }
        });
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Messages of a conversation, oldest first. Resets the requester's
    /// unread counter.
    pub async fn fetch_messages(
        &self,
        requester: UserId,
        conversation_id: ConversationId,
    ) -> CoreResult<Vec<Message>> {
        let db = self.store.lock().await;
        let conversation = db
            .get_conversation(conversation_id)
            .or_not_found(|| format!("conversation {conversation_id}"))?;
        if !conversation.is_participant(&requester) {
            return Err(CoreError::forbidden("not a participant of this conversation"));
        }

        let messages = db.list_messages(conversation_id)?;
        db.reset_unread(conversation_id, requester)?;
        Ok(messages)
    }

    /// Set the read receipt on a message. A sender reading their own
    /// message is a no-op.
    pub async fn mark_read(&self, requester: UserId, message_id: MessageId) -> CoreResult<Message> {
        let db = self.store.lock().await;
        let message = db
            .get_message(message_id)
            .or_not_found(|| format!("message {message_id}"))?;
        if message.sender == requester {
            return Ok(message);
        }

        let conversation = db
            .get_conversation(message.conversation_id)
            .or_not_found(|| format!("conversation {}", message.conversation_id))?;
        if !conversation.is_participant(&requester) {
            return Err(CoreError::forbidden("not a participant of this conversation"));
        }

        let message = db.mark_message_read(message_id, Utc::now())?;
        db.reset_unread(message.conversation_id, requester)?;
        Ok(message)
    }

    /// Soft delete: only the sender may delete, and the content is gone
    /// for good.
    pub async fn delete_message(&self, requester: UserId, message_id: MessageId) -> CoreResult<Message> {
        let db = self.store.lock().await;
        let message = db
            .get_message(message_id)
            .or_not_found(|| format!("message {message_id}"))?;
        if message.sender != requester {
            return Err(CoreError::forbidden("only the sender can delete a message"));
        }
        if message.is_deleted {
            return Ok(message);
        }

        let message = db.soft_delete_message(message_id)?;
        info!(message = %message_id.short(), "message deleted");
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Ephemeral relays
    // ------------------------------------------------------------------

    /// Forward a typing change to every other online participant.
    pub async fn typing(
        &self,
        user: UserId,
        conversation_id: ConversationId,
        active: bool,
    ) -> CoreResult<()> {
        let conversation = self
            .store
            .lock()
            .await
            .get_conversation(conversation_id)
            .or_not_found(|| format!("conversation {conversation_id}"))?;
        if !conversation.is_participant(&user) {
            return Err(CoreError::forbidden("not a participant of this conversation"));
        }

        let event = if active {
            ServerEvent::UserTyping {
                user_id: user,
                conversation_id,
            }
        } else {
            ServerEvent::UserStopTyping {
                user_id: user,
                conversation_id,
            }
        };

        for peer in conversation.others(&user).copied() {
            self.relay(peer, event.clone()).await;
        }
        Ok(())
    }

    pub async fn call_user(&self, from: UserId, to: UserId, signal: Value) -> bool {
        self.relay(to, ServerEvent::IncomingCall { from, signal }).await
    }

    pub async fn answer_call(&self, to: UserId, signal: Value) -> bool {
        self.relay(to, ServerEvent::CallAccepted { signal }).await
    }

    pub async fn end_call(&self, to: UserId) -> bool {
        self.relay(to, ServerEvent::CallEnded).await
    }

    /// Pass a client-built notification payload to an online recipient.
    pub async fn relay_notification(&self, recipient: UserId, payload: Value) -> bool {
        self.relay(recipient, ServerEvent::ReceiveNotification { payload })
            .await
    }

    /// One-shot point-to-point push. Offline targets drop the event.
    async fn relay(&self, to: UserId, event: ServerEvent) -> bool {
        let Some(handle) = self.presence.lookup(to).await else {
            debug!(to = %to.short(), "relay target offline, dropped");
            return false;
        };
        match handle.push(event) {
            Ok(()) => true,
            Err(e) => {
                debug!(to = %to.short(), error = %e, "relay dropped");
                false
            }
        }
    }
}

fn validate_payload(content: Option<&str>, attachments: &[String]) -> CoreResult<()> {
    if content.is_none() && attachments.is_empty() {
        return Err(CoreError::bad_request("message needs content or attachments"));
    }
    if content.is_some_and(|c| c.len() > MAX_MESSAGE_CONTENT) {
        return Err(CoreError::bad_request(format!(
            "message content exceeds {MAX_MESSAGE_CONTENT} bytes"
        )));
    }
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(CoreError::bad_request(format!(
            "at most {MAX_ATTACHMENTS} attachments per message"
        )));
    }
    if attachments.iter().any(|a| a.trim().is_empty()) {
        return Err(CoreError::bad_request("empty attachment reference"));
    }
    Ok(())
}
