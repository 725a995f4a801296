//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use gleam_pool::PoolState;

/// One pool in the health report.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    /// Pool name (`sql`, `cache`).
    pub name: String,
    /// Current counters.
    #[serde(flatten)]
    pub state: PoolState,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open TCP connections, including ones mid-handshake.
    pub connections: usize,
    /// Registered sessions.
    pub active_sessions: usize,
    /// Backend pools.
    pub pools: Vec<PoolHealth>,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    connections: usize,
    sessions: usize,
    pools: Vec<(String, PoolState)>,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        version: gleam_core::constants::VERSION.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions: sessions,
        pools: pools
            .into_iter()
            .map(|(name, state)| PoolHealth { name, state })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), false, 0, 0, Vec::new());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn shutting_down_status() {
        let resp = health_check(Instant::now(), true, 0, 0, Vec::new());
        assert_eq!(resp.status, "shutting_down");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, false, 0, 0, Vec::new());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization_includes_pools() {
        let state = PoolState {
            idle: 1,
            leased: 2,
            total: 3,
            waiters: 0,
            leaks: 0,
        };
        let resp = health_check(Instant::now(), false, 5, 3, vec![("sql".into(), state)]);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["connections"], 5);
        assert_eq!(parsed["active_sessions"], 3);
        assert_eq!(parsed["pools"][0]["name"], "sql");
        assert_eq!(parsed["pools"][0]["leased"], 2);
    }
}
