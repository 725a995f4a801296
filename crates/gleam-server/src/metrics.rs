//! Prometheus recorder and gateway metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Fails if another recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
/// Connections refused at the `max_connections` limit (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "gateway_connections_rejected_total";
/// Open connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
/// Sessions closed (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "gateway_disconnections_total";
/// Session lifetime (histogram).
pub const SESSION_DURATION_SECONDS: &str = "gateway_session_duration_seconds";
/// Failed handshakes (counter, labels: reason).
pub const HANDSHAKE_FAILURES_TOTAL: &str = "gateway_handshake_failures_total";
/// Sends refused with `QueueFull` (counter).
pub const SEND_REJECTED_TOTAL: &str = "gateway_send_rejected_total";
/// Responses with no matching pending call (counter).
pub const UNMATCHED_RESPONSES_TOTAL: &str = "gateway_unmatched_responses_total";
/// Handlers abandoned after the close grace period (counter).
pub const HANDLERS_ABANDONED_TOTAL: &str = "gateway_handlers_abandoned_total";
/// Broadcast deliveries that failed (counter).
pub const BROADCAST_FAILURES_TOTAL: &str = "gateway_broadcast_failures_total";
