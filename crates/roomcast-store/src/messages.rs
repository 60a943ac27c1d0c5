use roomcast_core::{MessageId, NewMessage, RoomId, StoredMessage, UserId};
use rusqlite::Connection;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Messages, attachments and read receipts.
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    /// Repo over a shared connection.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a message and return its id.
    #[instrument(skip(self, message), fields(room_id = %message.room_id, sender_id = %message.sender_id))]
    pub fn insert(&self, message: NewMessage<'_>) -> Result<MessageId, StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO messages (room_id, sender_id, content, client_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    message.room_id.get(),
                    message.sender_id.get(),
                    message.text,
                    message.client_id,
                    now,
                ],
            )?;
            Ok(MessageId::new(conn.last_insert_rowid()))
        })
    }

    /// Record an uploaded file name against a message.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn add_attachment(&self, message_id: MessageId, file_name: &str) -> Result<(), StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO message_attachments (message_id, file_name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id.get(), file_name, now],
            )?;
            Ok(())
        })
    }

    /// Set-based receipt insert: every message in the room sent by someone else that
    /// `reader_id` has not read yet.
    #[instrument(skip(self), fields(room_id = %room_id, reader_id = %reader_id))]
    pub fn mark_room_read(&self, room_id: RoomId, reader_id: UserId) -> Result<usize, StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO message_reads (message_id, user_id, read_at)
                 SELECT m.id, ?1, ?3
                 FROM messages m
                 WHERE m.room_id = ?2
                   AND m.sender_id != ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads mr
                       WHERE mr.user_id = ?1 AND mr.message_id = m.id
                   )",
                rusqlite::params![reader_id.get(), room_id.get(), now],
            )?;
            Ok(inserted)
        })
    }

    /// Returns `true` if a new receipt was written.
    pub fn insert_receipt(&self, message_id: MessageId, reader_id: UserId) -> Result<bool, StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id.get(), reader_id.get(), now],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Receipts recorded for one message.
    pub fn receipt_count(&self, message_id: MessageId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_reads WHERE message_id = ?1",
                [message_id.get()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// All messages of a room, oldest first, with attachments and readers.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn list_for_room(&self, room_id: RoomId) -> Result<Vec<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, u.username, m.content, m.client_id, m.created_at
                 FROM messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC",
            )?;
            let mut messages = stmt
                .query_map([room_id.get()], |row| {
                    Ok(StoredMessage {
                        id: MessageId::new(row.get(0)?),
                        room_id,
                        sender_id: UserId::new(row.get(1)?),
                        sender_name: row.get(2)?,
                        text: row.get(3)?,
                        client_id: row.get(4)?,
                        created_at: row.get(5)?,
                        attachments: Vec::new(),
                        readers: Vec::new(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for message in &mut messages {
                message.attachments = attachments_of(conn, message.id)?;
                message.readers = readers_of(conn, message.id)?;
            }
            Ok(messages)
        })
    }
}

fn attachments_of(conn: &Connection, message_id: MessageId) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT file_name FROM message_attachments WHERE message_id = ?1 ORDER BY id",
    )?;
    let files = stmt
        .query_map([message_id.get()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(files)
}

fn readers_of(conn: &Connection, message_id: MessageId) -> Result<Vec<UserId>, StoreError> {
    let mut stmt =
        conn.prepare_cached("SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at, user_id")?;
    let readers = stmt
        .query_map([message_id.get()], |row| row.get::<_, i64>(0))?
        .map(|id| id.map(UserId::new))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(readers)
}
