//! Bounded handler capacity.
//!
//! A process-wide semaphore caps concurrently running handlers across all
//! connections; each connection additionally gets its own in-flight cap so
//! one busy peer cannot take every worker.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shared handler capacity.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    global: Arc<Semaphore>,
    max_concurrent: usize,
    per_connection: usize,
}

/// In-flight cap for one connection.
#[derive(Clone, Debug)]
pub struct ConnectionLimiter {
    local: Arc<Semaphore>,
}

/// Held for the duration of one handler invocation.
#[derive(Debug)]
pub struct WorkerPermit {
    _local: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl WorkerPool {
    /// Capacity of `max_concurrent` handlers, at most `per_connection` per
    /// connection.
    pub fn new(max_concurrent: usize, per_connection: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            per_connection,
        }
    }

    /// Limiter for a newly accepted connection.
    pub fn connection_limiter(&self) -> ConnectionLimiter {
        ConnectionLimiter {
            local: Arc::new(Semaphore::new(self.per_connection)),
        }
    }

    /// Wait for a worker slot. Called from the connection's read loop, so
    /// permits are granted in read order.
    ///
    /// Returns `None` once the pool is closed.
    pub async fn acquire(&self, limiter: &ConnectionLimiter) -> Option<WorkerPermit> {
        let local = Arc::clone(&limiter.local).acquire_owned().await.ok()?;
        let global = Arc::clone(&self.global).acquire_owned().await.ok()?;
        Some(WorkerPermit {
            _local: local,
            _global: global,
        })
    }

    /// Free global slots.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Handlers currently running.
    pub fn busy(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }

    /// Stop granting permits; pending `acquire` calls return `None`.
    pub fn close(&self) {
        self.global.close();
    }
}

impl ConnectionLimiter {
    /// Free slots on this connection.
    pub fn available(&self) -> usize {
        self.local.available_permits()
    }

    /// Stop granting permits for this connection.
    pub fn close(&self) {
        self.local.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn per_connection_cap_applies() {
        let pool = WorkerPool::new(10, 2);
        let conn = pool.connection_limiter();
        let _a = pool.acquire(&conn).await.unwrap();
        let _b = pool.acquire(&conn).await.unwrap();
        assert_eq!(conn.available(), 0);
        let third = tokio::time::timeout(Duration::from_millis(20), pool.acquire(&conn)).await;
        assert!(third.is_err());

        // Another connection still gets capacity.
        let other = pool.connection_limiter();
        assert!(pool.acquire(&other).await.is_some());
        assert_eq!(pool.busy(), 3);
    }

    #[tokio::test]
    async fn global_cap_applies() {
        let pool = WorkerPool::new(1, 4);
        let a = pool.connection_limiter();
        let b = pool.connection_limiter();
        let held = pool.acquire(&a).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(20), pool.acquire(&b)).await;
        assert!(blocked.is_err());
        drop(held);
        assert!(pool.acquire(&b).await.is_some());
    }

    #[tokio::test]
    async fn permit_release_frees_both_slots() {
        let pool = WorkerPool::new(4, 4);
        let conn = pool.connection_limiter();
        let permit = pool.acquire(&conn).await.unwrap();
        assert_eq!((pool.available(), conn.available()), (3, 3));
        drop(permit);
        assert_eq!((pool.available(), conn.available()), (4, 4));
    }

    #[tokio::test]
    async fn closed_pool_refuses() {
        let pool = WorkerPool::new(4, 4);
        let conn = pool.connection_limiter();
        pool.close();
        assert!(pool.acquire(&conn).await.is_none());
    }
}
