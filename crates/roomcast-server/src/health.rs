//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::receipts::OutboxSnapshot;
use crate::websocket::dispatcher::DispatchSnapshot;
use crate::websocket::registry::RegistryCounts;

/// `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Seconds since the router was built.
    pub uptime_secs: u64,
    /// Registry sizes.
    pub connections: RegistryCounts,
    /// Dispatcher counters.
    pub broadcast: DispatchSnapshot,
    /// Receipt outbox counters.
    pub receipts: OutboxSnapshot,
}

/// Assemble the health body from the current snapshots.
pub fn health_check(
    start_time: Instant,
    connections: RegistryCounts,
    broadcast: DispatchSnapshot,
    receipts: OutboxSnapshot,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        broadcast,
        receipts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), RegistryCounts::default(), DispatchSnapshot::default(), OutboxSnapshot::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, RegistryCounts::default(), DispatchSnapshot::default(), OutboxSnapshot::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let counts = RegistryCounts {
            rooms: 2,
            room_sessions: 3,
            global_sessions: 1,
        };
        let broadcast = DispatchSnapshot {
            published: 5,
            rejected: 1,
            delivered: 9,
            failed_writes: 0,
        };
        let resp = health_check(Instant::now(), counts, broadcast, OutboxSnapshot::default());
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"]["room_sessions"], 3);
        assert_eq!(parsed["broadcast"]["rejected"], 1);
        assert_eq!(parsed["receipts"]["failed"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }
}
