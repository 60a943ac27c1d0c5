use roomcast_core::{ChatStore, MessageId, NewMessage, PersistenceError, RoomId, StoredMessage, UserId};

use crate::database::Database;
use crate::messages::MessageRepo;
use crate::rooms::RoomRepo;

/// SQLite-backed [`ChatStore`].
pub struct SqliteChatStore {
    messages: MessageRepo,
    rooms: RoomRepo,
}

impl SqliteChatStore {
    /// Store over a shared connection.
    pub fn new(db: Database) -> Self {
        Self {
            messages: MessageRepo::new(db.clone()),
            rooms: RoomRepo::new(db),
        }
    }

    /// Message repo, for setup and tests.
    pub fn messages(&self) -> &MessageRepo {
        &self.messages
    }

    /// Room repo, for setup and tests.
    pub fn rooms(&self) -> &RoomRepo {
        &self.rooms
    }
}

impl ChatStore for SqliteChatStore {
    fn persist_message(&self, message: NewMessage<'_>) -> Result<MessageId, PersistenceError> {
        Ok(self.messages.insert(message)?)
    }

    fn persist_attachment(&self, message_id: MessageId, file_ref: &str) -> Result<(), PersistenceError> {
        Ok(self.messages.add_attachment(message_id, file_ref)?)
    }

    fn insert_read_receipts_if_absent(
        &self,
        room_id: RoomId,
        reader_id: UserId,
    ) -> Result<usize, PersistenceError> {
        Ok(self.messages.mark_room_read(room_id, reader_id)?)
    }

    fn insert_read_receipt(&self, message_id: MessageId, reader_id: UserId) -> Result<bool, PersistenceError> {
        Ok(self.messages.insert_receipt(message_id, reader_id)?)
    }

    fn fetch_messages(&self, room_id: RoomId) -> Result<Vec<StoredMessage>, PersistenceError> {
        Ok(self.messages.list_for_room(room_id)?)
    }

    fn is_group_room(&self, room_id: RoomId) -> Result<bool, PersistenceError> {
        Ok(self.rooms.is_group(room_id)?)
    }
}
