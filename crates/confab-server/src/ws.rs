//! WebSocket surface for the real-time events.
//!
//! Each socket gets an outbound queue drained by a writer task and a reader
//! loop that parses [`ClientEvent`]s and hands them to the gateway. The
//! acting user is the identity bound by `identify`; nothing else in a client
//! event can name the sender.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use confab_shared::{CoreError, CoreResult, UserId};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::presence::ConnectionHandle;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::rate_limit::TokenBucket;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state owned by the reader loop.
struct Session {
    handle: ConnectionHandle,
    user: Option<UserId>,
    bucket: TokenBucket,
}

impl Session {
    fn new(handle: ConnectionHandle, config: &ServerConfig) -> Self {
        Self {
            handle,
            user: None,
            bucket: TokenBucket::new(config.event_rate_per_sec, config.event_burst),
        }
    }

    fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.handle.push(event) {
            debug!(connection = self.handle.id(), error = %e, "reply dropped");
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (handle, mut outbound) = ConnectionHandle::channel(state.config.outbound_buffer);
    state.presence.attach(handle.clone()).await;
    info!(connection = handle.id(), "socket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let connection = handle.id();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(e) => {
                    error!(connection, "serialize event failed: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(handle.clone(), &state.config);

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if !session.bucket.try_consume() {
            session.reply(ServerEvent::error("rate_limited", "slow down"));
            continue;
        }

        let event: ClientEvent = match serde_json::from_str(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                session.reply(ServerEvent::error("bad_request", format!("invalid event: {e}")));
                continue;
            }
        };

        if let Err(e) = dispatch(&state, &mut session, event).await {
            session.reply(ServerEvent::from(&e));
        }
    }

    // A send already in flight has finished by now; only presence is retired.
    state.gateway.disconnect(&handle).await;
    writer.abort();
    info!(connection, user = ?session.user.map(|u| u.short()), "socket disconnected");
}

async fn dispatch(state: &AppState, session: &mut Session, event: ClientEvent) -> CoreResult<()> {
    if let ClientEvent::Identify { user_id } = event {
        return identify(state, session, user_id).await;
    }

    let Some(user) = session.user else {
        session.reply(ServerEvent::error("unidentified", "send identify first"));
        return Ok(());
    };

    let gateway = &state.gateway;
    match event {
        ClientEvent::Identify { .. } => {}
        ClientEvent::SendMessage {
            conversation_id,
            content,
            attachments,
        } => {
            let message = gateway
                .send_message(user, conversation_id, content, attachments)
                .await?;
            session.reply(ServerEvent::MessageSent { message });
        }
        ClientEvent::Typing { conversation_id } => {
            gateway.typing(user, conversation_id, true).await?;
        }
        ClientEvent::StopTyping { conversation_id } => {
            gateway.typing(user, conversation_id, false).await?;
        }
        ClientEvent::CallUser { to, signal } => {
            gateway.call_user(user, to, signal).await;
        }
        ClientEvent::AnswerCall { to, signal } => {
            gateway.answer_call(to, signal).await;
        }
        ClientEvent::EndCall { to } => {
            gateway.end_call(to).await;
        }
        ClientEvent::NewNotification { recipient, payload } => {
            gateway.relay_notification(recipient, payload).await;
        }
    }
    Ok(())
}

async fn identify(state: &AppState, session: &mut Session, user_id: UserId) -> CoreResult<()> {
    if let Some(current) = session.user {
        if current != user_id {
            return Err(CoreError::forbidden(
                "connection is already identified as another user",
            ));
        }
    }
    session.user = Some(user_id);
    state.gateway.connect(user_id, &session.handle).await;
    Ok(())
}
