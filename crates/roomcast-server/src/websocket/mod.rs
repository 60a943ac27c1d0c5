//! WebSocket session management, inbound frame handling and broadcasting.

pub mod connection;
pub mod dispatcher;
pub mod frames;
pub mod registry;
pub mod session;
