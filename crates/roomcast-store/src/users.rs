use roomcast_core::UserId;
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// A `users` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRow {
    /// Primary key.
    pub id: UserId,
    /// Unique display name.
    pub username: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Account rows. Signup and credentials live in the HTTP layer; the chat core only
/// needs ids and display names.
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    /// Repo over a shared connection.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user; the name must be unique.
    #[instrument(skip(self))]
    pub fn create(&self, username: &str) -> Result<UserRow, StoreError> {
        let now = crate::now_timestamp();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                rusqlite::params![username, now],
            )?;
            Ok(UserRow {
                id: UserId::new(conn.last_insert_rowid()),
                username: username.to_string(),
                created_at: now,
            })
        })
    }

    /// Look up one user.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                [id.get()],
                |row| {
                    Ok(UserRow {
                        id: UserId::new(row.get(0)?),
                        username: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get_user() {
        let repo = UserRepo::new(Database::in_memory().unwrap());
        let alice = repo.create("alice").unwrap();
        let fetched = repo.get(alice.id).unwrap();
        assert_eq!(fetched, alice);
    }

    #[test]
    fn duplicate_username_rejected() {
        let repo = UserRepo::new(Database::in_memory().unwrap());
        let _ = repo.create("alice").unwrap();
        assert!(repo.create("alice").is_err());
    }

    #[test]
    fn get_nonexistent_fails() {
        let repo = UserRepo::new(Database::in_memory().unwrap());
        assert!(matches!(repo.get(UserId::new(99)), Err(StoreError::NotFound(_))));
    }
}
