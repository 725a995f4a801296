//! Bounded async pool over any `r2d2::ManageConnection`.
//!
//! The connection manager supplies `connect`/`is_valid`/`has_broken`; this
//! module supplies the async leasing discipline:
//!
//! - at most `max_size` leases outstanding (one semaphore permit each)
//! - `acquire(timeout)` waits only the calling task; a zero timeout never waits
//! - at most `max_waiters` tasks queued before callers get `Exhausted`
//! - every lease is returned exactly once; a second `release` is
//!   `InvalidHandle`, a dropped lease is counted as a leak
//!
//! Every connection outside the idle queue belongs to a permit holder, so
//! idle plus leased never exceeds `max_size`. Blocking manager calls run on
//! the blocking thread pool.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use r2d2::ManageConnection;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gleam_settings::PoolSettings;

use crate::errors::{PoolError, Result};
use crate::metrics::{
    POOL_ACQUIRE_TOTAL, POOL_ACQUIRE_WAIT_SECONDS, POOL_CONNECTIONS, POOL_EVICTIONS_TOTAL,
    POOL_LEAKS_TOTAL,
};

/// Pool sizing.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Connections opened at construction and restored by the health check.
    pub min_idle: usize,
    /// Hard cap on live connections.
    pub max_size: usize,
    /// Tasks allowed to wait in `acquire`.
    pub max_waiters: usize,
    /// Health check cadence.
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(s: &PoolSettings) -> Self {
        Self {
            min_idle: s.min_idle,
            max_size: s.max_size,
            max_waiters: s.max_waiters,
            health_check_interval: s.health_check_interval(),
        }
    }
}

/// Point-in-time counts for `/health` and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    /// Connections ready to lease.
    pub idle: usize,
    /// Leases outstanding.
    pub leased: usize,
    /// Live connections (idle, leased, or being opened/validated).
    pub total: usize,
    /// Tasks waiting in `acquire`.
    pub waiters: usize,
    /// Leases dropped without release since start.
    pub leaks: u64,
}

/// Outcome of one health-check pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Idle connections validated.
    pub checked: usize,
    /// Connections destroyed for failing validation.
    pub evicted: usize,
    /// Connections opened to restore `min_idle`.
    pub created: usize,
}

struct Shared<M: ManageConnection> {
    name: String,
    manager: M,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<M::Connection>>,
    leased: Mutex<HashSet<u64>>,
    next_token: AtomicU64,
    total: AtomicUsize,
    waiters: AtomicUsize,
    leaks: AtomicU64,
    closed: AtomicBool,
}

impl<M: ManageConnection> Shared<M> {
    /// Open one connection, counting it in `total` for the duration.
    ///
    /// The slot travels with the blocking task, so a caller that stops
    /// waiting leaves `total` correct once the connect finishes.
    async fn connect(self: &Arc<Self>) -> Result<M::Connection> {
        let slot = OpeningSlot::reserve(Arc::clone(self));
        let opened = tokio::task::spawn_blocking(move || {
            let conn = slot.shared.manager.connect().map_err(|e| e.to_string())?;
            Ok::<_, String>(slot.commit(conn))
        })
        .await;
        match opened {
            Ok(Ok(mut committed)) => committed
                .conn
                .take()
                .ok_or_else(|| PoolError::Task("opened connection went missing".into())),
            Ok(Err(reason)) => Err(PoolError::Connect(reason)),
            Err(join) => Err(PoolError::Task(join.to_string())),
        }
    }

    fn destroy(&self, conn: M::Connection) {
        drop(conn);
        let _ = self.total.fetch_sub(1, Ordering::SeqCst);
        self.publish_size();
    }

    fn push_idle(&self, conn: M::Connection) {
        if self.closed.load(Ordering::SeqCst) {
            self.destroy(conn);
        } else {
            self.idle.lock().push_back(conn);
        }
    }

    /// Return a leased connection. The permit is dropped only after the
    /// connection is back in the idle queue (or destroyed).
    fn check_in(
        self: &Arc<Self>,
        mut conn: M::Connection,
        token: u64,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let _ = self.leased.lock().remove(&token);
        if self.manager.has_broken(&mut conn) {
            warn!(pool = %self.name, token, "connection broken on release, replacing");
            counter!(POOL_EVICTIONS_TOTAL, "pool" => self.name.clone()).increment(1);
            self.destroy(conn);
            self.spawn_replacement(permit);
            return;
        }
        self.push_idle(conn);
        drop(permit);
    }

    fn spawn_replacement(self: &Arc<Self>, permit: Option<OwnedSemaphorePermit>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = Arc::clone(self);
        drop(handle.spawn(async move {
            let _permit = permit;
            match shared.connect().await {
                Ok(conn) => shared.push_idle(conn),
                Err(e) => warn!(pool = %shared.name, error = %e, "replacement connection failed"),
            }
        }));
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_size(&self) {
        gauge!(POOL_CONNECTIONS, "pool" => self.name.clone())
            .set(self.total.load(Ordering::SeqCst) as f64);
    }
}

/// A `total` slot held while a connection is being opened. Dropping it
/// uncommitted (failed connect, or a result nobody awaited) gives the slot
/// back.
struct OpeningSlot<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    committed: bool,
}

impl<M: ManageConnection> OpeningSlot<M> {
    fn reserve(shared: Arc<Shared<M>>) -> Self {
        let _ = shared.total.fetch_add(1, Ordering::SeqCst);
        shared.publish_size();
        Self {
            shared,
            committed: false,
        }
    }

    fn commit(mut self, conn: M::Connection) -> Committed<M> {
        self.committed = true;
        Committed {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> Drop for OpeningSlot<M> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.shared.total.fetch_sub(1, Ordering::SeqCst);
            self.shared.publish_size();
        }
    }
}

/// A freshly opened connection on its way back to the awaiting task. If the
/// task is gone the connection is destroyed on drop.
struct Committed<M: ManageConnection> {
    conn: Option<M::Connection>,
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Drop for Committed<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(pool = %self.shared.name, "opened connection abandoned by caller");
            self.shared.destroy(conn);
        }
    }
}

/// Decrements the waiter count when the waiting future finishes or is dropped.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn enter(counter: &'a AtomicUsize, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive use of one pooled connection until released.
pub struct Lease<M: ManageConnection> {
    conn: Option<M::Connection>,
    token: u64,
    acquired_at: Instant,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Lease<M> {
    /// The leased connection, or `InvalidHandle` once released.
    pub fn connection(&mut self) -> Result<&mut M::Connection> {
        self.conn.as_mut().ok_or(PoolError::InvalidHandle)
    }

    /// Unique id of this lease within its pool.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// When the lease was handed out.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Whether the connection has already been returned.
    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    fn give_back(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            error!(pool = %self.shared.name, token = self.token, "lease released twice");
            return Err(PoolError::InvalidHandle);
        };
        debug!(
            pool = %self.shared.name,
            token = self.token,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "lease released"
        );
        self.shared.check_in(conn, self.token, self.permit.take());
        Ok(())
    }
}

impl<M: ManageConnection> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.shared.name)
            .field("token", &self.token)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Drop for Lease<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let _ = self.shared.leaks.fetch_add(1, Ordering::SeqCst);
        let _ = self.shared.leased.lock().remove(&self.token);
        warn!(
            pool = %self.shared.name,
            token = self.token,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "lease dropped without release, reclaiming slot"
        );
        counter!(POOL_LEAKS_TOTAL, "pool" => self.shared.name.clone()).increment(1);
        // State of a leaked connection is unknown (open transaction, ...).
        self.shared.destroy(conn);
    }
}

/// A named, bounded pool of backend connections.
pub struct ResourcePool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for ResourcePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<M: ManageConnection> ResourcePool<M> {
    /// Build the pool and open `min_idle` connections.
    ///
    /// Failing to open the minimum is [`PoolError::Init`].
    pub async fn new(name: impl Into<String>, manager: M, config: PoolConfig) -> Result<Self> {
        let name = name.into();
        let max_size = config.max_size.max(1);
        let warm = config.min_idle.min(max_size);
        let shared = Arc::new(Shared {
            name: name.clone(),
            manager,
            permits: Arc::new(Semaphore::new(max_size)),
            config,
            idle: Mutex::new(VecDeque::with_capacity(max_size)),
            leased: Mutex::new(HashSet::new()),
            next_token: AtomicU64::new(1),
            total: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            leaks: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        for _ in 0..warm {
            let conn = shared.connect().await.map_err(|e| PoolError::Init {
                pool: name.clone(),
                reason: e.to_string(),
            })?;
            shared.idle.lock().push_back(conn);
        }

        info!(pool = %name, min_idle = warm, max_size, "pool ready");
        Ok(Self { shared })
    }

    /// Pool name used in logs, metrics, and errors.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Pool sizing.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Lease a connection, waiting at most `timeout` for one to free up.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease<M>> {
        let started = Instant::now();
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(self.closed_error()),
            Err(TryAcquireError::NoPermits) => {
                if timeout.is_zero() {
                    return Err(self.timeout_error(started));
                }
                let Some(_waiter) =
                    WaiterGuard::enter(&self.shared.waiters, self.shared.config.max_waiters)
                else {
                    return Err(self.exhausted_error());
                };
                let waiting = Arc::clone(&self.shared.permits).acquire_owned();
                match tokio::time::timeout(timeout, waiting).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(self.closed_error()),
                    Err(_) => return Err(self.timeout_error(started)),
                }
            }
        };
        histogram!(POOL_ACQUIRE_WAIT_SECONDS, "pool" => self.shared.name.clone())
            .record(started.elapsed().as_secs_f64());
        self.checkout(permit).await
    }

    /// Lease a connection only if one is free right now.
    pub async fn try_acquire(&self) -> Result<Lease<M>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => self.checkout(permit).await,
            Err(TryAcquireError::Closed) => Err(self.closed_error()),
            Err(TryAcquireError::NoPermits) => Err(self.exhausted_error()),
        }
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<Lease<M>> {
        let reused = self.shared.idle.lock().pop_front();
        let conn = match reused {
            Some(conn) => conn,
            None => match self.shared.connect().await {
                Ok(conn) => conn,
                Err(e) => {
                    self.count_acquire("error");
                    return Err(e);
                }
            },
        };
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        let _ = self.shared.leased.lock().insert(token);
        self.count_acquire("ok");
        Ok(Lease {
            conn: Some(conn),
            token,
            acquired_at: Instant::now(),
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Return a lease to the pool.
    ///
    /// Releasing the same lease twice, or a lease from another pool, is
    /// rejected with [`PoolError::InvalidHandle`] and logged at error level.
    pub fn release(&self, lease: &mut Lease<M>) -> Result<()> {
        if !Arc::ptr_eq(&self.shared, &lease.shared) {
            error!(pool = %self.shared.name, owner = %lease.shared.name, token = lease.token, "lease released to the wrong pool");
            return Err(PoolError::InvalidHandle);
        }
        lease.give_back()
    }

    /// Acquire, run `f` on the blocking pool, and release.
    ///
    /// The lease is returned on the blocking thread as soon as `f` finishes,
    /// so a caller that stops waiting does not leak it. A panic inside `f`
    /// drops the lease there; it is counted as a leak and the slot is
    /// reclaimed.
    pub async fn run<F, R>(&self, timeout: Duration, f: F) -> Result<R>
    where
        F: FnOnce(&mut M::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut lease = self.acquire(timeout).await?;
        tokio::task::spawn_blocking(move || {
            let result = lease.connection().and_then(f);
            lease.give_back()?;
            result
        })
        .await
        .map_err(|e| PoolError::Task(e.to_string()))?
    }

    /// Reject further acquires and drop idle connections. Outstanding
    /// leases stay usable; their connections are destroyed on release.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.permits.close();
        let drained: Vec<M::Connection> = self.shared.idle.lock().drain(..).collect();
        for conn in drained {
            self.shared.destroy(conn);
        }
        info!(pool = %self.shared.name, "pool closed");
    }

    /// Current counts.
    pub fn state(&self) -> PoolState {
        PoolState {
            idle: self.shared.idle.lock().len(),
            leased: self.shared.leased.lock().len(),
            total: self.shared.total.load(Ordering::SeqCst),
            waiters: self.shared.waiters.load(Ordering::SeqCst),
            leaks: self.shared.leaks.load(Ordering::SeqCst),
        }
    }

    /// Validate idle connections, destroy failures, and refill to `min_idle`.
    ///
    /// Each connection is checked while holding a permit, so a busy pool is
    /// checked only as far as spare capacity allows.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        let candidates = self.shared.idle.lock().len();
        for _ in 0..candidates {
            let Ok(permit) = Arc::clone(&self.shared.permits).try_acquire_owned() else {
                break;
            };
            let Some(conn) = self.shared.idle.lock().pop_front() else {
                break;
            };
            let shared = Arc::clone(&self.shared);
            let checked = tokio::task::spawn_blocking(move || {
                let mut conn = conn;
                let valid = shared.manager.is_valid(&mut conn).map_err(|e| e.to_string());
                (conn, valid)
            })
            .await;
            report.checked += 1;
            match checked {
                Ok((conn, Ok(()))) => self.shared.push_idle(conn),
                Ok((conn, Err(reason))) => {
                    warn!(pool = %self.shared.name, %reason, "idle connection failed validation");
                    counter!(POOL_EVICTIONS_TOTAL, "pool" => self.shared.name.clone()).increment(1);
                    report.evicted += 1;
                    self.shared.destroy(conn);
                }
                Err(join) => {
                    warn!(pool = %self.shared.name, error = %join, "validation task failed");
                    report.evicted += 1;
                    let _ = self.shared.total.fetch_sub(1, Ordering::SeqCst);
                }
            }
            drop(permit);
        }

        while !self.is_closed()
            && self.shared.total.load(Ordering::SeqCst) < self.shared.config.min_idle
        {
            let Ok(permit) = Arc::clone(&self.shared.permits).try_acquire_owned() else {
                break;
            };
            match self.shared.connect().await {
                Ok(conn) => {
                    self.shared.push_idle(conn);
                    report.created += 1;
                }
                Err(e) => {
                    warn!(pool = %self.shared.name, error = %e, "could not replenish pool");
                    break;
                }
            }
            drop(permit);
        }
        report
    }

    /// Run [`health_check`](Self::health_check) every
    /// `health_check_interval` until cancelled or closed.
    pub fn spawn_health_check(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        let period = self.shared.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if pool.is_closed() {
                            break;
                        }
                        let report = pool.health_check().await;
                        if report.evicted > 0 || report.created > 0 {
                            info!(pool = %pool.name(), checked = report.checked, evicted = report.evicted, created = report.created, "pool health check");
                        } else {
                            debug!(pool = %pool.name(), checked = report.checked, "pool health check");
                        }
                    }
                }
            }
        })
    }

    fn count_acquire(&self, outcome: &'static str) {
        counter!(POOL_ACQUIRE_TOTAL, "pool" => self.shared.name.clone(), "outcome" => outcome)
            .increment(1);
    }

    fn closed_error(&self) -> PoolError {
        self.count_acquire("closed");
        PoolError::Closed {
            pool: self.shared.name.clone(),
        }
    }

    fn exhausted_error(&self) -> PoolError {
        self.count_acquire("exhausted");
        PoolError::Exhausted {
            pool: self.shared.name.clone(),
        }
    }

    fn timeout_error(&self, started: Instant) -> PoolError {
        self.count_acquire("timeout");
        PoolError::AcquireTimeout {
            pool: self.shared.name.clone(),
            waited_ms: started.elapsed().as_millis() as u64,
        }
    }
}
