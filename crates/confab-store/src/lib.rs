//! # confab-store
//!
//! Durable storage for conversations, messages, the user directory and
//! notifications, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model.
//! Operations that touch more than one row run inside a single SQLite
//! transaction, so every helper is atomic with respect to the others.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod users;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
