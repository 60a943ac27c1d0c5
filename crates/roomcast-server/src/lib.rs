//! Real-time chat fan-out over WebSockets.
//!
//! Room sessions (`/ws?roomId=N`) receive messages for one room; a notification
//! session (`/ws/notify`) receives presence and user-level events. Every outbound
//! frame goes through one [`websocket::dispatcher::BroadcastDispatcher`], so each
//! recipient sees events in publish order.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod presence;
pub mod receipts;
pub mod server;
pub mod websocket;

pub use auth::JwtVerifier;
pub use chat::{ChatHub, SendMessage};
pub use config::{HubConfig, ServerConfig};
pub use server::{build_router, start, AppState, ServerHandle};
