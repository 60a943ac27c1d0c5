//! Error taxonomy shared by the store and the server.

use std::time::Duration;

/// Handshake failures. A connection that fails authentication is never established.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token was offered.
    #[error("missing token")]
    MissingToken,
    /// Bad signature, expired, or missing required claims.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// A frame that could not be understood. The frame is dropped, the connection stays open.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or not the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A required field is absent or has the wrong type.
    #[error("missing or invalid field: {0}")]
    InvalidField(&'static str),
    /// Binary frames are never accepted.
    #[error("binary frames are not supported")]
    Binary,
}

/// Read or write failure on a live connection. Terminal for that session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The session's queue is gone.
    #[error("connection closed")]
    Closed,
    /// A write did not complete within the limit.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// The socket reported an error on read.
    #[error("read failed: {0}")]
    Read(String),
    /// The socket reported an error on write.
    #[error("write failed: {0}")]
    Write(String),
}

/// Failure reported by the external message store.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// The room or row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Anything else the store reports.
    #[error("store failure: {0}")]
    Backend(String),
}

impl AuthError {
    /// Stable label for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken(_) => "invalid_token",
        }
    }
}

impl TransportError {
    /// Stable label for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::WriteTimeout(_) => "write_timeout",
            Self::Read(_) => "read_failed",
            Self::Write(_) => "write_failed",
        }
    }
}
