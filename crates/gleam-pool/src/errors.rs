//! Pool error types.

use thiserror::Error;

/// Errors from acquiring, releasing, or using pooled resources.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every connection is leased and no more callers may wait.
    #[error("pool '{pool}' exhausted")]
    Exhausted {
        /// Pool name.
        pool: String,
    },
    /// No connection became free within the timeout.
    #[error("timed out acquiring from pool '{pool}' after {waited_ms}ms")]
    AcquireTimeout {
        /// Pool name.
        pool: String,
        /// Time spent waiting.
        waited_ms: u64,
    },
    /// The pool has been closed.
    #[error("pool '{pool}' is closed")]
    Closed {
        /// Pool name.
        pool: String,
    },
    /// The lease was already released or belongs to another pool.
    #[error("invalid or already released lease")]
    InvalidHandle,
    /// Warm-up could not establish the minimum number of connections.
    #[error("pool '{pool}' failed to initialize: {reason}")]
    Init {
        /// Pool name.
        pool: String,
        /// Backend error.
        reason: String,
    },
    /// The requested backend is not configured.
    #[error("pool '{pool}' is not configured")]
    NotConfigured {
        /// Pool name.
        pool: String,
    },
    /// Connecting to the backend failed.
    #[error("backend connect failed: {0}")]
    Connect(String),
    /// A SQL statement failed.
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    /// A cache operation failed.
    #[error("cache error: {0}")]
    Cache(String),
    /// A blocking pool task panicked or was cancelled.
    #[error("pool task failed: {0}")]
    Task(String),
}

impl PoolError {
    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::AcquireTimeout { .. })
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_variants() {
        assert!(PoolError::Exhausted { pool: "sql".into() }.is_retryable());
        assert!(
            PoolError::AcquireTimeout {
                pool: "sql".into(),
                waited_ms: 0
            }
            .is_retryable()
        );
        assert!(!PoolError::InvalidHandle.is_retryable());
        assert!(!PoolError::Closed { pool: "sql".into() }.is_retryable());
    }

    #[test]
    fn display() {
        let err = PoolError::AcquireTimeout {
            pool: "cache".into(),
            waited_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "timed out acquiring from pool 'cache' after 250ms"
        );
    }
}
