//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use confab_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and the WebSocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./confab.db`
    pub database_path: PathBuf,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Bearer token for the `/directory/*` administration routes.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (directory administration disabled).
    pub admin_token: Option<String>,

    /// Sustained inbound socket events per second, per connection.
    /// Env: `EVENT_RATE_PER_SEC`
    pub event_rate_per_sec: f64,

    /// Inbound socket event burst, per connection.
    /// Env: `EVENT_BURST`
    pub event_burst: f64,

    /// Sustained HTTP requests per second, per client IP.
    /// Env: `HTTP_RATE_PER_SEC`
    pub http_rate_per_sec: f64,

    /// HTTP request burst, per client IP.
    /// Env: `HTTP_BURST`
    pub http_burst: f64,

    /// Outbound event queue depth per connection.
    /// Env: `OUTBOUND_BUFFER`
    pub outbound_buffer: usize,

    /// Extra attempts for best-effort delivery and notification fan-out.
    /// Persistence is never retried.
    /// Env: `FANOUT_RETRIES`
    pub fanout_retries: u32,

    /// Base delay between fan-out attempts (linear backoff).
    /// Env: `FANOUT_BACKOFF_MS`
    pub fanout_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./confab.db"),
            instance_name: APP_NAME.to_string(),
            admin_token: None,
            event_rate_per_sec: 20.0,
            event_burst: 60.0,
            http_rate_per_sec: 10.0,
            http_burst: 30.0,
            outbound_buffer: 256,
            fanout_retries: 2,
            fanout_backoff: Duration::from_millis(50),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values
    /// are logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(name) = lookup("INSTANCE_NAME").filter(|n| !n.is_empty()) {
            config.instance_name = name;
        }

        if let Some(token) = lookup("ADMIN_TOKEN").filter(|t| !t.is_empty()) {
            config.admin_token = Some(token);
        }

        parse_into(&lookup, "EVENT_RATE_PER_SEC", &mut config.event_rate_per_sec);
        parse_into(&lookup, "EVENT_BURST", &mut config.event_burst);
        parse_into(&lookup, "HTTP_RATE_PER_SEC", &mut config.http_rate_per_sec);
        parse_into(&lookup, "HTTP_BURST", &mut config.http_burst);
        parse_into(&lookup, "OUTBOUND_BUFFER", &mut config.outbound_buffer);
        parse_into(&lookup, "FANOUT_RETRIES", &mut config.fanout_retries);

        let mut backoff_ms = config.fanout_backoff.as_millis() as u64;
        parse_into(&lookup, "FANOUT_BACKOFF_MS", &mut backoff_ms);
        config.fanout_backoff = Duration::from_millis(backoff_ms);

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.admin_token.is_none());
        assert_eq!(config.fanout_retries, 2);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/chat.db"),
            ("ADMIN_TOKEN", "s3cret"),
            ("OUTBOUND_BUFFER", "8"),
            ("FANOUT_BACKOFF_MS", "5"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.outbound_buffer, 8);
        assert_eq!(config.fanout_backoff, Duration::from_millis(5));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "not an addr"),
            ("FANOUT_RETRIES", "-1"),
            ("ADMIN_TOKEN", ""),
        ]));

        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.fanout_retries, 2);
        assert!(config.admin_token.is_none());
    }
}
