//! # confab-shared
//!
//! Identifiers, error taxonomy and constants shared by the store and the
//! real-time server.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::{ConversationId, MessageId, NotificationId, UserId};
