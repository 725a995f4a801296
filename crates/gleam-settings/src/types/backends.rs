//! Database and cache pool settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing and timing shared by every resource pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Connections established at startup and kept warm by the health check.
    pub min_idle: usize,
    /// Hard cap on connections (idle + leased).
    pub max_size: usize,
    /// Tasks allowed to queue in `acquire` before callers are turned away.
    pub max_waiters: usize,
    /// Default acquire timeout used by handlers.
    pub acquire_timeout_ms: u64,
    /// Interval between idle-connection health checks.
    pub health_check_interval_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_size: 8,
            max_waiters: 64,
            acquire_timeout_ms: 1_000,
            health_check_interval_ms: 30_000,
        }
    }
}

impl PoolSettings {
    /// [`acquire_timeout_ms`](Self::acquire_timeout_ms) as a `Duration`.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// [`health_check_interval_ms`](Self::health_check_interval_ms) as a `Duration`.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Relational database backend (SQLite).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Whether the `db` service and its pool are started.
    pub enabled: bool,
    /// Database file. `None` opens a shared in-memory database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Pool sizing.
    pub pool: PoolSettings,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            busy_timeout_ms: 5_000,
            pool: PoolSettings::default(),
        }
    }
}

/// Key-value cache backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Whether the `cache` service and its pool are started.
    pub enabled: bool,
    /// TTL applied when a `set` carries none. `0` means no expiry.
    pub default_ttl_ms: u64,
    /// Pool sizing.
    pub pool: PoolSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: 0,
            pool: PoolSettings {
                max_size: 16,
                ..PoolSettings::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults_are_consistent() {
        let p = PoolSettings::default();
        assert!(p.min_idle <= p.max_size);
        assert_eq!(p.acquire_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn database_path_omitted_when_none() {
        let json = serde_json::to_value(DatabaseSettings::default()).unwrap();
        assert!(json.get("path").is_none());
        assert_eq!(json["busyTimeoutMs"], 5_000);
    }

    #[test]
    fn nested_pool_partial_json() {
        let d: DatabaseSettings =
            serde_json::from_str(r#"{"path": "/tmp/g.db", "pool": {"maxSize": 2}}"#).unwrap();
        assert_eq!(d.path.as_deref(), Some("/tmp/g.db"));
        assert_eq!(d.pool.max_size, 2);
        assert_eq!(d.pool.min_idle, 1);
    }

    #[test]
    fn cache_pool_is_larger() {
        assert_eq!(CacheSettings::default().pool.max_size, 16);
    }
}
