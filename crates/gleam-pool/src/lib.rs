//! # gleam-pool
//!
//! Bounded, health-checked pools of backend connections.
//!
//! [`ResourcePool`] works over any `r2d2::ManageConnection`: the SQL backend
//! uses `r2d2_sqlite`, the cache backend uses the in-process
//! [`MemoryCacheManager`]. Handlers reach both through [`ResourcePools`].

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod metrics;
pub mod pool;
pub mod resources;
pub mod sql;

pub use cache::{CacheBackend, CacheConnection, MemoryCacheManager};
pub use errors::{PoolError, Result};
pub use pool::{HealthReport, Lease, PoolConfig, PoolState, ResourcePool};
pub use resources::{CachePool, ResourcePools, SqlPool};
pub use sql::{QueryResult, SqlBackend, SqlValue, SqliteOptions, sqlite_manager};
