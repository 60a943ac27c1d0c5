use roomcast_core::PersistenceError;

/// Errors from the SQLite layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite rejected the statement or the connection failed.
    #[error("database error: {0}")]
    Database(String),

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem failure while opening the database.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => PersistenceError::NotFound(what),
            other => PersistenceError::Backend(other.to_string()),
        }
    }
}
