//! JSON events exchanged over the real-time socket.
//!
//! Both directions are internally tagged by an `"event"` field, e.g.
//! `{"event":"typing","conversation_id":"…"}`. The acting user is never taken
//! from a client event other than `identify`: it is the identity bound to the
//! connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use confab_shared::{ConversationId, CoreError, UserId};
use confab_store::Message;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to a user and announce them online.
    Identify { user_id: UserId },

    SendMessage {
        conversation_id: ConversationId,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        attachments: Vec<String>,
    },

    Typing { conversation_id: ConversationId },

    StopTyping { conversation_id: ConversationId },

    /// WebRTC offer passthrough. `signal` is opaque.
    CallUser { to: UserId, signal: Value },

    AnswerCall { to: UserId, signal: Value },

    EndCall { to: UserId },

    /// Relay a client-built notification to an online recipient.
    NewNotification { recipient: UserId, payload: Value },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    UserOnline { user_id: UserId },

    UserOffline { user_id: UserId },

    /// A persisted message, delivered verbatim to online recipients.
    ReceiveMessage { message: Message },

    /// Acknowledgement to the sender once the message is durable.
    MessageSent { message: Message },

    UserTyping {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    UserStopTyping {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    IncomingCall { from: UserId, signal: Value },

    CallAccepted { signal: Value },

    CallEnded,

    ReceiveNotification { payload: Value },

    Error { kind: String, message: String },
}

impl ServerEvent {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl From<&CoreError> for ServerEvent {
    fn from(e: &CoreError) -> Self {
        ServerEvent::error(e.kind(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let conversation_id = ConversationId::new();
        let raw = format!(
            r#"{{"event":"send_message","conversation_id":"{conversation_id}","content":"hi"}}"#
        );

        let event: ClientEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage {
                conversation_id,
                content: Some("hi".into()),
                attachments: Vec::new(),
            }
        );
    }

    #[test]
    fn test_signal_is_passed_through_untouched() {
        let to = UserId::new();
        let raw = format!(
            r#"{{"event":"call_user","to":"{to}","signal":{{"type":"offer","sdp":"v=0"}}}}"#
        );

        let ClientEvent::CallUser { signal, .. } = serde_json::from_str(&raw).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(signal["sdp"], "v=0");
    }

    #[test]
    fn test_unit_server_event() {
        let json = serde_json::to_value(ServerEvent::CallEnded).unwrap();
        assert_eq!(json, serde_json::json!({ "event": "call_ended" }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"format_disk"}"#).is_err());
    }
}
