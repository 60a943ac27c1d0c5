//! Core types for roomcast: ids, wire frames, errors and the store and auth seams.

pub mod auth;
pub mod errors;
pub mod events;
pub mod ids;
pub mod store;

pub use auth::{Identity, TokenVerifier};
pub use errors::{AuthError, PersistenceError, ProtocolError, TransportError};
pub use events::{ChatFrame, FrameKind, OutboundEvent, PresenceAction, ReadStatus, Scope};
pub use ids::{MessageId, RoomId, SessionId, UserId};
pub use store::{ChatStore, NewMessage, StoredMessage};
