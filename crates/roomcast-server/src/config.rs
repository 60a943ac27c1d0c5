//! Server configuration.

use serde::{Deserialize, Serialize};

use crate::receipts::OutboxConfig;
use crate::websocket::dispatcher::DispatcherConfig;

/// Tuning for the chat hub and its background tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound frames buffered per connection before writes start waiting.
    pub session_queue: usize,
    /// Broadcast queue and write timeout.
    pub dispatcher: DispatcherConfig,
    /// Receipt persistence worker.
    pub outbox: OutboxConfig,
    /// Prefix turning stored attachment names into URLs.
    pub attachment_base_url: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_queue: 256,
            dispatcher: DispatcherConfig::default(),
            outbox: OutboxConfig::default(),
            attachment_base_url: "http://localhost:8080/uploads/".into(),
        }
    }
}

/// Configuration for the HTTP + WebSocket server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Hub tuning.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            hub: HubConfig::default(),
        }
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
