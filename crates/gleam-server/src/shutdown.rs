//! Graceful shutdown coordination.
//!
//! One `CancellationToken` fans the stop signal out to the accept loop,
//! every connection, the heartbeat sweeper, pool health checks, and the
//! HTTP side-port. Background tasks are spawned through the coordinator's
//! `TaskTracker` so shutdown can wait for them.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time allowed for tracked tasks to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the stop signal and the set of background tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Fresh coordinator; nothing cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the stop token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Signal every holder of the token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of tracked tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Signal shutdown and wait up to `timeout` for tracked tasks.
    ///
    /// Returns `false` if some task was still running at the deadline.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        let _ = self.tasks.close();
        info!(
            task_count = self.tasks.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for tasks to complete"
        );
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(remaining = self.tasks.len(), "shutdown timed out after {timeout:?}");
            return false;
        }
        true
    }
}
