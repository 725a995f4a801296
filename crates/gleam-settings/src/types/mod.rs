//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may name only the values it changes. Each type implements
//! [`Default`] with production values.

mod backends;
mod connection;
mod logging;
mod server;

pub use backends::*;
pub use connection::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use gleam_core::constants::FRAME_HEADER_LEN;

use crate::errors::{Result, SettingsError};

/// Root settings type for the gateway.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "connection": { "backPressure": "block" },
///   "database": { "path": "/var/lib/gleam/app.db", "pool": { "maxSize": 4 } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Frame codec limits.
    pub wire: WireSettings,
    /// Session timings and write-queue sizing.
    pub connection: ConnectionSettings,
    /// Handler worker pool.
    pub dispatch: DispatchSettings,
    /// SQL backend.
    pub database: DatabaseSettings,
    /// Cache backend.
    pub cache: CacheSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl GatewaySettings {
    /// Reject combinations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.wire.max_frame_size < FRAME_HEADER_LEN {
            return Err(invalid(
                "wire.maxFrameSize",
                format!("{} is below the {FRAME_HEADER_LEN}-byte header", self.wire.max_frame_size),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(invalid("server.maxConnections", "must be at least 1"));
        }
        if self.connection.write_queue_depth == 0 {
            return Err(invalid("connection.writeQueueDepth", "must be at least 1"));
        }
        if self.connection.heartbeat_interval_ms == 0 {
            return Err(invalid("connection.heartbeatIntervalMs", "must be non-zero"));
        }
        if self.dispatch.max_concurrent_handlers == 0 {
            return Err(invalid("dispatch.maxConcurrentHandlers", "must be at least 1"));
        }
        if self.dispatch.max_in_flight_per_connection == 0 {
            return Err(invalid("dispatch.maxInFlightPerConnection", "must be at least 1"));
        }
        if self.dispatch.max_queued_per_connection == 0 {
            return Err(invalid("dispatch.maxQueuedPerConnection", "must be at least 1"));
        }
        validate_pool("database.pool", &self.database.pool)?;
        validate_pool("cache.pool", &self.cache.pool)?;
        Ok(())
    }
}

fn validate_pool(section: &str, pool: &PoolSettings) -> Result<()> {
    if pool.max_size == 0 {
        return Err(invalid(format!("{section}.maxSize"), "must be at least 1"));
    }
    if pool.min_idle > pool.max_size {
        return Err(invalid(
            format!("{section}.minIdle"),
            format!("{} exceeds maxSize ({})", pool.min_idle, pool.max_size),
        ));
    }
    if pool.health_check_interval_ms == 0 {
        return Err(invalid(format!("{section}.healthCheckIntervalMs"), "must be non-zero"));
    }
    Ok(())
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_validate() {
        GatewaySettings::default().validate().unwrap();
    }

    #[test]
    fn min_idle_above_max_size_rejected() {
        let mut s = GatewaySettings::default();
        s.database.pool.min_idle = 10;
        s.database.pool.max_size = 2;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field(), Some("database.pool.minIdle"));
    }

    #[test]
    fn zero_queue_depth_rejected() {
        let mut s = GatewaySettings::default();
        s.connection.write_queue_depth = 0;
        assert_matches!(
            s.validate(),
            Err(SettingsError::Invalid { ref field, .. }) if field == "connection.writeQueueDepth"
        );
    }

    #[test]
    fn tiny_frame_limit_rejected() {
        let mut s = GatewaySettings::default();
        s.wire.max_frame_size = FRAME_HEADER_LEN - 1;
        assert_eq!(s.validate().unwrap_err().field(), Some("wire.maxFrameSize"));
        s.wire.max_frame_size = FRAME_HEADER_LEN;
        s.validate().unwrap();
    }

    #[test]
    fn zero_request_backlog_rejected() {
        let mut s = GatewaySettings::default();
        s.dispatch.max_queued_per_connection = 0;
        assert_eq!(s.validate().unwrap_err().field(), Some("dispatch.maxQueuedPerConnection"));
    }

    #[test]
    fn zero_cache_pool_rejected() {
        let mut s = GatewaySettings::default();
        s.cache.pool.max_size = 0;
        s.cache.pool.min_idle = 0;
        assert_eq!(s.validate().unwrap_err().field(), Some("cache.pool.maxSize"));
    }

    #[test]
    fn round_trips_through_json() {
        let json = serde_json::to_string(&GatewaySettings::default()).unwrap();
        let back: GatewaySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server.port, 7300);
        assert_eq!(back.database.pool, PoolSettings::default());
    }
}
