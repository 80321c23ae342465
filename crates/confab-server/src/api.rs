use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, Method},
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use confab_shared::{ConversationId, MessageId, NotificationId, UserId};
use confab_store::{Conversation, Database, Message, Notification, User};

use crate::config::ServerConfig;
use crate::directory::StoreDirectory;
use crate::error::{OrNotFound, ServerError};
use crate::gateway::{FanoutPolicy, Gateway};
use crate::lifecycle::{LeaveOutcome, LifecycleManager, UnreadSummary};
use crate::notify::StoreNotificationSink;
use crate::presence::PresenceRegistry;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::store::Store;
use crate::ws::ws_handler;

/// Header carrying the authenticated caller, set by the upstream auth proxy.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub presence: PresenceRegistry,
    pub gateway: Arc<Gateway>,
    pub lifecycle: Arc<LifecycleManager>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the store-backed collaborators around one shared database.
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let store = crate::store::shared(db);
        let presence = PresenceRegistry::new();
        let notifier = Arc::new(StoreNotificationSink::new(store.clone(), presence.clone()));
        let gateway = Gateway::new(
            store.clone(),
            presence.clone(),
            notifier,
            FanoutPolicy::from(&config),
        );
        let lifecycle = LifecycleManager::new(
            store.clone(),
            Arc::new(StoreDirectory::new(store.clone())),
        );
        let rate_limiter = RateLimiter::new(config.http_rate_per_sec, config.http_burst);

        Self {
            store,
            presence,
            gateway: Arc::new(gateway),
            lifecycle: Arc::new(lifecycle),
            rate_limiter,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/conversations", get(list_conversations).post(create_direct))
        .route("/conversations/group", post(create_group))
        .route("/conversations/unread", get(unread_summary))
        .route("/conversations/{id}", get(get_conversation).put(update_group))
        .route("/conversations/{id}/participants", post(add_participants))
        .route(
            "/conversations/{id}/participants/{user_id}",
            delete(remove_participant),
        )
        .route("/conversations/{id}/leave", post(leave_conversation))
        .route("/conversations/{id}/admin/{user_id}", put(change_admin))
        .route("/messages", get(list_messages).post(send_message))
        .route("/messages/{id}", delete(delete_message))
        .route("/messages/{id}/read", put(mark_message_read))
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", put(mark_all_notifications_read))
        .route("/notifications/{id}", delete(delete_notification))
        .route("/notifications/{id}/read", put(mark_notification_read))
        .route("/directory/users/{id}", put(directory_upsert_user))
        .route(
            "/directory/users/{id}/blocks/{blocked_id}",
            put(directory_block).delete(directory_unblock),
        )
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Caller identity ───

/// The user on whose behalf a request acts, taken from [`USER_HEADER`].
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized("missing X-User-Id header".into()))?;

        raw.trim()
            .parse()
            .map(Caller)
            .map_err(|_| ServerError::Unauthorized("invalid X-User-Id header".into()))
    }
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    connections: usize,
}

#[derive(Deserialize)]
struct CreateDirectRequest {
    receiver_id: UserId,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    participants: Vec<UserId>,
}

#[derive(Deserialize)]
struct UpdateGroupRequest {
    group_name: Option<String>,
    group_avatar: Option<String>,
}

#[derive(Deserialize)]
struct ParticipantsRequest {
    participants: Vec<UserId>,
}

#[derive(Deserialize)]
struct MessagesQuery {
    conversation: ConversationId,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    conversation: ConversationId,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    attachments: Vec<String>,
}

#[derive(Deserialize)]
struct DirectoryUserRequest {
    name: String,
    username: String,
}

// ─── Service endpoints ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.presence.online_count().await,
        connections: state.presence.connection_count().await,
    })
}

// ─── Conversations ───

async fn list_conversations(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Conversation>>, ServerError> {
    Ok(Json(state.lifecycle.list_conversations(caller).await?))
}

async fn create_direct(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateDirectRequest>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(
        state.lifecycle.create_direct(caller, req.receiver_id).await?,
    ))
}

async fn create_group(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(
        state
            .lifecycle
            .create_group(caller, &req.name, &req.participants)
            .await?,
    ))
}

async fn unread_summary(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<UnreadSummary>, ServerError> {
    Ok(Json(state.lifecycle.unread_summary(caller).await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(state.lifecycle.get_conversation(caller, id).await?))
}

async fn update_group(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(
        state
            .lifecycle
            .update_group(
                caller,
                id,
                req.group_name.as_deref(),
                req.group_avatar.as_deref(),
            )
            .await?,
    ))
}

async fn add_participants(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(req): Json<ParticipantsRequest>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(
        state
            .lifecycle
            .add_participants(caller, id, &req.participants)
            .await?,
    ))
}

async fn remove_participant(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, user_id)): Path<(ConversationId, UserId)>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(
        state.lifecycle.remove_participant(caller, id, user_id).await?,
    ))
}

async fn leave_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<LeaveOutcome>, ServerError> {
    Ok(Json(state.lifecycle.leave(caller, id).await?))
}

async fn change_admin(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, user_id)): Path<(ConversationId, UserId)>,
) -> Result<Json<Conversation>, ServerError> {
    Ok(Json(state.lifecycle.change_admin(caller, id, user_id).await?))
}

// ─── Messages ───

async fn list_messages(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    Ok(Json(
        state
            .gateway
            .fetch_messages(caller, query.conversation)
            .await?,
    ))
}

/// Same send path as the socket `send_message` event, fan-out included.
async fn send_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    Ok(Json(
        state
            .gateway
            .send_message(caller, req.conversation, req.content, req.attachments)
            .await?,
    ))
}

async fn delete_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
) -> Result<Json<Message>, ServerError> {
    Ok(Json(state.gateway.delete_message(caller, id).await?))
}

async fn mark_message_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
) -> Result<Json<Message>, ServerError> {
    Ok(Json(state.gateway.mark_read(caller, id).await?))
}

// ─── Notifications ───

async fn list_notifications(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Notification>>, ServerError> {
    Ok(Json(state.store.lock().await.list_notifications(caller)?))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<NotificationId>,
) -> Result<Json<Notification>, ServerError> {
    let db = state.store.lock().await;
    require_recipient(&db, id, caller)?;
    Ok(Json(db.mark_notification_read(id)?))
}

async fn delete_notification(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<NotificationId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.store.lock().await;
    require_recipient(&db, id, caller)?;
    db.delete_notification(id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

fn require_recipient(db: &Database, id: NotificationId, caller: UserId) -> Result<(), ServerError> {
    let notification = db
        .get_notification(id)
        .or_not_found(|| format!("notification {id}"))?;
    if notification.recipient != caller {
        return Err(ServerError::Forbidden(
            "notification belongs to another user".into(),
        ));
    }
    Ok(())
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<serde_json::Value>, ServerError> {
    let updated = state
        .store
        .lock()
        .await
        .mark_all_notifications_read(caller)?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

// ─── Directory administration ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Directory administration is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn directory_upsert_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<DirectoryUserRequest>,
) -> Result<Json<User>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let name = req.name.trim();
    let username = req.username.trim();
    if name.is_empty() || username.is_empty() {
        return Err(ServerError::BadRequest("name and username are required".into()));
    }

    let db = state.store.lock().await;
    if db.username_owner(username)?.is_some_and(|owner| owner != id) {
        return Err(ServerError::BadRequest(format!(
            "username {username} is already taken"
        )));
    }
    let user = db.upsert_user(id, name, username)?;
    info!(user = %id.short(), username = %user.username, "Directory user upserted");
    Ok(Json(user))
}

async fn directory_block(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, blocked_id)): Path<(UserId, UserId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    if id == blocked_id {
        return Err(ServerError::BadRequest("a user cannot block themselves".into()));
    }

    let db = state.store.lock().await;
    for user in [id, blocked_id] {
        if !db.user_exists(user)? {
            return Err(ServerError::NotFound(format!("user {user}")));
        }
    }
    db.block_user(id, blocked_id)?;

    info!(blocker = %id.short(), blocked = %blocked_id.short(), "Directory block added");
    Ok(Json(serde_json::json!({ "blocked": true })))
}

async fn directory_unblock(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, blocked_id)): Path<(UserId, UserId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let removed = state.store.lock().await.unblock_user(id, blocked_id)?;
    Ok(Json(serde_json::json!({ "unblocked": removed })))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
