//! Prometheus recorder and metric names.
//!
//! Counters are emitted with the `metrics` macros at the point where things happen;
//! `/metrics` renders whatever recorder is installed. `/health` keeps its own snapshot.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the process-global recorder.
///
/// Call once at startup, before any metric is recorded. Tests build an uninstalled
/// recorder with `PrometheusBuilder::new().build_recorder()` instead.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket sessions opened (counter, labels: scope).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions torn down (counter, labels: scope, reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket sessions (gauge, labels: scope).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime in seconds (histogram, labels: scope).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Global sessions closed by a newer login (counter).
pub const WS_SUPERSEDED_TOTAL: &str = "ws_superseded_total";
/// Events accepted by the broadcast queue (counter).
pub const BROADCAST_PUBLISHED_TOTAL: &str = "broadcast_published_total";
/// Events rejected because the broadcast queue was full (counter).
pub const BROADCAST_REJECTED_TOTAL: &str = "broadcast_rejected_total";
/// Payloads handed to a session queue (counter).
pub const BROADCAST_DELIVERED_TOTAL: &str = "broadcast_delivered_total";
/// Session writes that failed or timed out (counter, labels: error_kind).
pub const BROADCAST_WRITE_FAILURES_TOTAL: &str = "broadcast_write_failures_total";
/// Receipt jobs by outcome (counter, labels: outcome).
pub const RECEIPT_JOBS_TOTAL: &str = "receipt_jobs_total";
