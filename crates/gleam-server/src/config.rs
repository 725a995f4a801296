//! Per-connection runtime limits, resolved from settings once at startup.

use std::time::Duration;

use gleam_settings::{BackPressurePolicy, GatewaySettings};

/// Everything the connection manager needs to run a connection.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Largest accepted frame.
    pub max_frame_size: usize,
    /// Maximum concurrently open connections.
    pub max_connections: usize,
    /// Bounded write-queue depth per session.
    pub write_queue_depth: usize,
    /// What `send` does when the queue is full.
    pub back_pressure: BackPressurePolicy,
    /// How long a blocking send waits for capacity.
    pub send_timeout: Duration,
    /// Deadline for the `Hello` frame.
    pub handshake_timeout: Duration,
    /// Interval advertised to clients in `HelloAck`, also the sweep period.
    pub heartbeat_interval: Duration,
    /// Inactivity after which a session is closed.
    pub heartbeat_timeout: Duration,
    /// Time allowed to flush queued frames on close.
    pub drain_timeout: Duration,
    /// Time handlers get to finish after their session closed.
    pub close_grace: Duration,
    /// Process-wide handler concurrency.
    pub max_concurrent_handlers: usize,
    /// Per-connection handler concurrency.
    pub max_in_flight_per_connection: usize,
    /// Requests held per connection while waiting for a worker.
    pub max_queued_per_connection: usize,
    /// Default timeout of server-initiated calls.
    pub call_timeout: Duration,
}

impl From<&GatewaySettings> for ConnectionConfig {
    fn from(s: &GatewaySettings) -> Self {
        let c = &s.connection;
        Self {
            max_frame_size: s.wire.max_frame_size,
            max_connections: s.server.max_connections,
            write_queue_depth: c.write_queue_depth,
            back_pressure: c.back_pressure,
            send_timeout: c.send_timeout(),
            handshake_timeout: c.handshake_timeout(),
            heartbeat_interval: c.heartbeat_interval(),
            heartbeat_timeout: c.heartbeat_timeout(),
            drain_timeout: c.drain_timeout(),
            close_grace: c.close_grace(),
            max_concurrent_handlers: s.dispatch.max_concurrent_handlers,
            max_in_flight_per_connection: s.dispatch.max_in_flight_per_connection,
            max_queued_per_connection: s.dispatch.max_queued_per_connection,
            call_timeout: s.dispatch.call_timeout(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.write_queue_depth, 256);
        assert_eq!(cfg.back_pressure, BackPressurePolicy::Reject);
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_connections, 10_000);
    }

    #[test]
    fn overrides_flow_through() {
        let mut settings = GatewaySettings::default();
        settings.connection.write_queue_depth = 4;
        settings.connection.back_pressure = BackPressurePolicy::Block;
        settings.wire.max_frame_size = 1024;
        let cfg = ConnectionConfig::from(&settings);
        assert_eq!(cfg.write_queue_depth, 4);
        assert_eq!(cfg.back_pressure, BackPressurePolicy::Block);
        assert_eq!(cfg.max_frame_size, 1024);
    }
}
