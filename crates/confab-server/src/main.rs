//! # confab-server
//!
//! Real-time conversation and presence server.
//!
//! This binary provides:
//! - **Presence registry** tracking which users hold a live socket
//! - **Messaging gateway** that persists each message, updates unread
//!   counters and the last-message pointer, then fans out to online
//!   recipients and emits notifications
//! - **Conversation lifecycle** for 1:1 and group conversations (membership,
//!   admin transfer, leave/delete)
//! - **WebSocket endpoint** (`/ws`) for the real-time events and a
//!   **REST API** (axum) for the request/response side
//! - **Per-IP and per-connection rate limiting**

mod api;
mod config;
mod directory;
mod error;
mod gateway;
mod lifecycle;
mod notify;
mod presence;
mod protocol;
mod rate_limit;
mod store;
mod ws;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use confab_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,confab_server=debug")),
        )
        .init();

    info!("Starting Confab server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Open the database
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;

    // Nobody is connected to a freshly started process.
    let reset = db.reset_presence()?;
    if reset > 0 {
        info!(users = reset, "Cleared stale online flags");
    }

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
