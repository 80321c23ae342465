/// Application name
pub const APP_NAME: &str = "Confab";

/// Default HTTP / WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum text content of a single chat message, in bytes (16 KiB)
pub const MAX_MESSAGE_CONTENT: usize = 16 * 1024;

/// Maximum number of attachment references on a single message
pub const MAX_ATTACHMENTS: usize = 10;

/// Maximum length of a group name, in characters
pub const MAX_GROUP_NAME: usize = 100;

/// Notification text attached to every chat message notification
pub const MESSAGE_NOTIFICATION_TEXT: &str = "sent you a message";
