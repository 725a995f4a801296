//! Per-connection behavior and handler dispatch settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What `send` does when a session's write queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackPressurePolicy {
    /// Fail immediately with `QueueFull`.
    #[default]
    Reject,
    /// Wait up to `sendTimeoutMs` for capacity, then fail with `QueueFull`.
    Block,
}

/// Session lifecycle timings and write-queue sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Bounded depth of each session's outbound frame queue.
    pub write_queue_depth: usize,
    /// Behavior when the write queue is full.
    pub back_pressure: BackPressurePolicy,
    /// How long a blocking send may wait for queue capacity.
    pub send_timeout_ms: u64,
    /// Deadline for the peer's `Hello` after accept.
    pub handshake_timeout_ms: u64,
    /// How often the sweeper checks for idle sessions.
    pub heartbeat_interval_ms: u64,
    /// Idle time after which a session is closed.
    pub heartbeat_timeout_ms: u64,
    /// How long queued frames may drain once a session starts closing.
    pub drain_timeout_ms: u64,
    /// How long running handlers may finish after close before being aborted.
    pub close_grace_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            write_queue_depth: 256,
            back_pressure: BackPressurePolicy::Reject,
            send_timeout_ms: 1_000,
            handshake_timeout_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            drain_timeout_ms: 2_000,
            close_grace_ms: 1_000,
        }
    }
}

impl ConnectionSettings {
    /// [`send_timeout_ms`](Self::send_timeout_ms) as a `Duration`.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// [`handshake_timeout_ms`](Self::handshake_timeout_ms) as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// [`heartbeat_interval_ms`](Self::heartbeat_interval_ms) as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// [`heartbeat_timeout_ms`](Self::heartbeat_timeout_ms) as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// [`drain_timeout_ms`](Self::drain_timeout_ms) as a `Duration`.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// [`close_grace_ms`](Self::close_grace_ms) as a `Duration`.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Handler worker pool and timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Process-wide cap on concurrently running handlers.
    pub max_concurrent_handlers: usize,
    /// Per-connection cap on in-flight requests.
    pub max_in_flight_per_connection: usize,
    /// Requests a connection may have read but not yet dispatched. Once
    /// full, the connection is not read until a handler finishes.
    pub max_queued_per_connection: usize,
    /// Execution budget for a single handler invocation.
    pub handler_timeout_ms: u64,
    /// Default timeout for server-initiated calls.
    pub call_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 256,
            max_in_flight_per_connection: 32,
            max_queued_per_connection: 64,
            handler_timeout_ms: 5_000,
            call_timeout_ms: 5_000,
        }
    }
}

impl DispatchSettings {
    /// [`handler_timeout_ms`](Self::handler_timeout_ms) as a `Duration`.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// [`call_timeout_ms`](Self::call_timeout_ms) as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_pressure_serde() {
        let p: BackPressurePolicy = serde_json::from_str("\"block\"").unwrap();
        assert_eq!(p, BackPressurePolicy::Block);
        assert_eq!(
            serde_json::to_string(&BackPressurePolicy::Reject).unwrap(),
            "\"reject\""
        );
    }

    #[test]
    fn connection_durations() {
        let c = ConnectionSettings::default();
        assert_eq!(c.heartbeat_timeout(), Duration::from_secs(30));
        assert_eq!(c.handshake_timeout(), Duration::from_secs(5));
        assert!(c.heartbeat_interval() < c.heartbeat_timeout());
    }

    #[test]
    fn connection_partial_json() {
        let c: ConnectionSettings =
            serde_json::from_str(r#"{"writeQueueDepth": 4, "backPressure": "block"}"#).unwrap();
        assert_eq!(c.write_queue_depth, 4);
        assert_eq!(c.back_pressure, BackPressurePolicy::Block);
        assert_eq!(c.send_timeout_ms, 1_000);
    }

    #[test]
    fn dispatch_defaults() {
        let d = DispatchSettings::default();
        assert!(d.max_in_flight_per_connection <= d.max_concurrent_handlers);
        assert_eq!(d.handler_timeout(), Duration::from_secs(5));
    }
}
