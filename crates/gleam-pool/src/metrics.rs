//! Pool metric names.

/// Acquire attempts (labels: `pool`, `outcome`).
pub const POOL_ACQUIRE_TOTAL: &str = "pool_acquire_total";
/// Time spent waiting for a connection (label: `pool`).
pub const POOL_ACQUIRE_WAIT_SECONDS: &str = "pool_acquire_wait_seconds";
/// Leases dropped without release (label: `pool`).
pub const POOL_LEAKS_TOTAL: &str = "pool_leaks_total";
/// Connections destroyed after failing validation or breaking (label: `pool`).
pub const POOL_EVICTIONS_TOTAL: &str = "pool_evictions_total";
/// Live connections, idle and leased (label: `pool`).
pub const POOL_CONNECTIONS: &str = "pool_connections";
