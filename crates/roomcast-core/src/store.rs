//! Persistence contract consumed by the core.
//!
//! Implementations are synchronous; callers on the broadcast path never wait on them.

use serde::{Deserialize, Serialize};

use crate::errors::PersistenceError;
use crate::ids::{MessageId, RoomId, UserId};

/// A chat message about to be stored.
#[derive(Clone, Copy, Debug)]
pub struct NewMessage<'a> {
    /// Destination room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Body.
    pub text: &'a str,
    /// Client-generated id, stored and echoed back.
    pub client_id: Option<&'a str>,
}

/// A stored message with its attachments and current readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store id.
    pub id: MessageId,
    /// Room it was posted in.
    pub room_id: RoomId,
    /// Author id.
    pub sender_id: UserId,
    /// Author display name at read time.
    pub sender_name: String,
    /// Body.
    pub text: String,
    /// Client-generated id, if one was sent.
    pub client_id: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Stored file names, oldest first.
    pub attachments: Vec<String>,
    /// Identities with a receipt for this message.
    pub readers: Vec<UserId>,
}

/// Message, receipt and room lookups the hub needs.
pub trait ChatStore: Send + Sync {
    /// Store a message and return its id.
    fn persist_message(&self, message: NewMessage<'_>) -> Result<MessageId, PersistenceError>;

    /// Attach a stored file name to a message.
    fn persist_attachment(&self, message_id: MessageId, file_ref: &str) -> Result<(), PersistenceError>;

    /// Mark every message in `room_id` not sent by `reader_id` as read by them.
    /// Returns the number of receipts created.
    fn insert_read_receipts_if_absent(
        &self,
        room_id: RoomId,
        reader_id: UserId,
    ) -> Result<usize, PersistenceError>;

    /// Returns `true` if the receipt did not exist before.
    fn insert_read_receipt(&self, message_id: MessageId, reader_id: UserId) -> Result<bool, PersistenceError>;

    /// Messages of a room in ascending creation order.
    fn fetch_messages(&self, room_id: RoomId) -> Result<Vec<StoredMessage>, PersistenceError>;

    /// `NotFound` for an unknown room.
    fn is_group_room(&self, room_id: RoomId) -> Result<bool, PersistenceError>;
}
