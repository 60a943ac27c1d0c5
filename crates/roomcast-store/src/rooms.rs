use roomcast_core::{RoomId, UserId};
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// A `chat_rooms` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomRow {
    /// Primary key.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Group rooms use the any-other-reader status rule.
    pub is_group: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Rooms and their membership.
pub struct RoomRepo {
    db: Database,
}

impl RoomRepo {
    /// Repo over a shared connection.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a room.
    #[instrument(skip(self))]
    pub fn create(&self, name: &str, is_group: bool) -> Result<RoomRow, StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO chat_rooms (name, is_group, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, is_group, now],
            )?;
            Ok(RoomRow {
                id: RoomId::new(conn.last_insert_rowid()),
                name: name.to_string(),
                is_group,
                created_at: now,
            })
        })
    }

    /// Add a member; adding an existing member is a no-op.
    #[instrument(skip(self), fields(room_id = %room_id, user_id = %user_id))]
    pub fn add_member(&self, room_id: RoomId, user_id: UserId) -> Result<(), StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![room_id.get(), user_id.get(), now],
            )?;
            Ok(())
        })
    }

    /// Whether the room is a group room. A missing row is `NotFound`; any other
    /// failure stays a database error.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn is_group(&self, room_id: RoomId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT is_group FROM chat_rooms WHERE id = ?1",
                [room_id.get()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("room {room_id}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    #[test]
    fn create_room_records_kind() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        let group = repo.create("general", true).unwrap();
        let direct = repo.create("alice-bob", false).unwrap();
        assert!(repo.is_group(group.id).unwrap());
        assert!(!repo.is_group(direct.id).unwrap());
    }

    #[test]
    fn unknown_room_is_not_found() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        assert!(matches!(repo.is_group(RoomId::new(5)), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn backend_failure_is_not_reported_as_not_found() {
        let db = Database::in_memory().unwrap();
        let repo = RoomRepo::new(db.clone());
        let room = repo.create("general", true).unwrap();
        db.with_conn(|conn| Ok(conn.execute_batch("DROP TABLE room_members; DROP TABLE chat_rooms;")?))
            .unwrap();

        let err = repo.is_group(room.id).unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "got {err:?}");
        assert!(matches!(
            roomcast_core::PersistenceError::from(err),
            roomcast_core::PersistenceError::Backend(_)
        ));
    }

    #[test]
    fn add_member_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let rooms = RoomRepo::new(db.clone());
        let alice = users.create("alice").unwrap();
        let room = rooms.create("general", true).unwrap();

        rooms.add_member(room.id, alice.id).unwrap();
        rooms.add_member(room.id, alice.id).unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    [room.id.get(), alice.id.get()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
