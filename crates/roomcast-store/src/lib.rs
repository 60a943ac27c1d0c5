//! SQLite persistence for users, rooms, messages, attachments and read receipts.

pub mod chat_store;
pub mod database;
pub mod error;
pub mod messages;
pub mod rooms;
pub mod schema;
pub mod users;

pub use chat_store::SqliteChatStore;
pub use database::Database;
pub use error::StoreError;

/// Timestamp format used by every table. Fixed width, so it sorts lexically.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
