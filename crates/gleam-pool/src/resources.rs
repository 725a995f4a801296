//! The long-lived set of backend pools shared by every handler.

use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gleam_settings::{CacheSettings, DatabaseSettings};

use crate::cache::MemoryCacheManager;
use crate::errors::{PoolError, Result};
use crate::pool::{PoolConfig, PoolState, ResourcePool};
use crate::sql::{SqliteOptions, sqlite_manager};

/// Pool over SQLite connections.
pub type SqlPool = ResourcePool<SqliteConnectionManager>;

/// Pool over the in-process cache.
pub type CachePool = ResourcePool<MemoryCacheManager>;

/// Pool name used for the SQL backend.
pub const SQL_POOL: &str = "sql";

/// Pool name used for the cache backend.
pub const CACHE_POOL: &str = "cache";

/// Backend pools built once at startup and passed by reference.
#[derive(Clone, Debug, Default)]
pub struct ResourcePools {
    sql: Option<SqlPool>,
    cache: Option<CachePool>,
    sql_acquire_timeout: Duration,
    cache_acquire_timeout: Duration,
}

impl ResourcePools {
    /// No backends configured.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build every enabled pool. Warm-up failure is fatal to startup.
    pub async fn from_settings(db: &DatabaseSettings, cache: &CacheSettings) -> Result<Self> {
        let mut pools = Self::empty();
        if db.enabled {
            let manager = sqlite_manager(&SqliteOptions::from(db));
            let pool = ResourcePool::new(SQL_POOL, manager, PoolConfig::from(&db.pool)).await?;
            pools = pools.with_sql(pool, db.pool.acquire_timeout());
        }
        if cache.enabled {
            let manager = MemoryCacheManager::new(Duration::from_millis(cache.default_ttl_ms));
            let pool =
                ResourcePool::new(CACHE_POOL, manager, PoolConfig::from(&cache.pool)).await?;
            pools = pools.with_cache(pool, cache.pool.acquire_timeout());
        }
        info!(
            sql = pools.sql.is_some(),
            cache = pools.cache.is_some(),
            "resource pools initialized"
        );
        Ok(pools)
    }

    /// Attach a SQL pool.
    #[must_use]
    pub fn with_sql(mut self, pool: SqlPool, acquire_timeout: Duration) -> Self {
        self.sql = Some(pool);
        self.sql_acquire_timeout = acquire_timeout;
        self
    }

    /// Attach a cache pool.
    #[must_use]
    pub fn with_cache(mut self, pool: CachePool, acquire_timeout: Duration) -> Self {
        self.cache = Some(pool);
        self.cache_acquire_timeout = acquire_timeout;
        self
    }

    /// The SQL pool, or `NotConfigured`.
    pub fn sql(&self) -> Result<&SqlPool> {
        self.sql.as_ref().ok_or_else(|| PoolError::NotConfigured {
            pool: SQL_POOL.to_string(),
        })
    }

    /// The cache pool, or `NotConfigured`.
    pub fn cache(&self) -> Result<&CachePool> {
        self.cache.as_ref().ok_or_else(|| PoolError::NotConfigured {
            pool: CACHE_POOL.to_string(),
        })
    }

    /// Default acquire timeout for SQL handlers.
    pub fn sql_acquire_timeout(&self) -> Duration {
        self.sql_acquire_timeout
    }

    /// Default acquire timeout for cache handlers.
    pub fn cache_acquire_timeout(&self) -> Duration {
        self.cache_acquire_timeout
    }

    /// State of each configured pool, by name.
    pub fn states(&self) -> Vec<(String, PoolState)> {
        let mut out = Vec::new();
        if let Some(p) = &self.sql {
            out.push((p.name().to_string(), p.state()));
        }
        if let Some(p) = &self.cache {
            out.push((p.name().to_string(), p.state()));
        }
        out
    }

    /// Start the periodic health check of every pool.
    pub fn spawn_health_checks(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(p) = &self.sql {
            handles.push(p.spawn_health_check(cancel.child_token()));
        }
        if let Some(p) = &self.cache {
            handles.push(p.spawn_health_check(cancel.child_token()));
        }
        handles
    }

    /// Close every pool.
    pub fn close(&self) {
        if let Some(p) = &self.sql {
            p.close();
        }
        if let Some(p) = &self.cache {
            p.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;
    use crate::sql::{SqlBackend, SqlValue};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn empty_reports_not_configured() {
        let pools = ResourcePools::empty();
        assert_matches!(pools.sql(), Err(PoolError::NotConfigured { pool }) if pool == "sql");
        assert_matches!(pools.cache(), Err(PoolError::NotConfigured { .. }));
        assert!(pools.states().is_empty());
    }

    #[tokio::test]
    async fn builds_enabled_pools_from_settings() {
        let pools = ResourcePools::from_settings(&DatabaseSettings::default(), &CacheSettings::default())
            .await
            .unwrap();
        let names: Vec<String> = pools.states().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["sql", "cache"]);
        assert_eq!(pools.sql().unwrap().state().idle, 1);
        assert_eq!(pools.sql_acquire_timeout(), Duration::from_secs(1));
        pools.close();
        assert!(pools.sql().unwrap().is_closed());
    }

    #[tokio::test]
    async fn disabled_backends_are_skipped() {
        let db = DatabaseSettings {
            enabled: false,
            ..DatabaseSettings::default()
        };
        let pools = ResourcePools::from_settings(&db, &CacheSettings::default())
            .await
            .unwrap();
        assert!(pools.sql().is_err());
        assert!(pools.cache().is_ok());
    }

    #[tokio::test]
    async fn sql_and_cache_through_pools() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseSettings {
            path: Some(dir.path().join("pools.db").to_string_lossy().into_owned()),
            ..DatabaseSettings::default()
        };
        let pools = ResourcePools::from_settings(&db, &CacheSettings::default())
            .await
            .unwrap();

        let sql = pools.sql().unwrap();
        let _ = sql.run(Duration::from_secs(1), |conn| {
            SqlBackend::execute(conn, "CREATE TABLE t (x INTEGER)", &[])?;
            SqlBackend::execute(conn, "INSERT INTO t VALUES (?1)", &[SqlValue::Integer(5)])
        })
        .await
        .unwrap();
        let rows = sql
            .run(Duration::from_secs(1), |conn| conn.query("SELECT x FROM t", &[]))
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![vec![SqlValue::Integer(5)]]);

        let cache = pools.cache().unwrap();
        cache
            .run(Duration::from_secs(1), |conn| conn.set("k", b"v".to_vec(), None))
            .await
            .unwrap();
        let got = cache
            .run(Duration::from_secs(1), |conn| conn.get("k"))
            .await
            .unwrap();
        assert_eq!(got, Some(b"v".to_vec()));
    }
}
