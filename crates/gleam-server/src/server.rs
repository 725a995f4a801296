//! `GatewayServer`: the TCP gateway plus the HTTP health/metrics side-port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router as HttpRouter;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};

use gleam_core::DisconnectReason;
use gleam_pool::ResourcePools;
use gleam_rpc::Router;

use crate::config::ConnectionConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::heartbeat;
use crate::listener::ConnectionListener;
use crate::manager::{Authenticator, ConnectionManager};
use crate::shutdown::ShutdownCoordinator;

/// Addresses the server actually bound (ports may have been `0`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundAddrs {
    /// Gateway protocol listener.
    pub tcp: SocketAddr,
    /// HTTP side-port, if enabled.
    pub http: Option<SocketAddr>,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection manager (session counts).
    pub manager: Arc<ConnectionManager>,
    /// Backend pools (health states).
    pub resources: Arc<ResourcePools>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Gateway server builder and runtime handle.
pub struct GatewayServer {
    config: ConnectionConfig,
    manager: Arc<ConnectionManager>,
    resources: Arc<ResourcePools>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    bound: Mutex<Option<BoundAddrs>>,
}

impl GatewayServer {
    /// Wire a server from its parts. Nothing is bound until [`start`](Self::start).
    pub fn new(
        config: ConnectionConfig,
        router: Router,
        resources: Arc<ResourcePools>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self::with_hooks(config, router, resources, metrics, None, Vec::new())
    }

    /// Like [`new`](Self::new), with an authenticator and extra listeners.
    pub fn with_hooks(
        config: ConnectionConfig,
        router: Router,
        resources: Arc<ResourcePools>,
        metrics: Option<PrometheusHandle>,
        authenticator: Option<Arc<dyn Authenticator>>,
        listeners: Vec<Arc<dyn ConnectionListener>>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let mut manager = ConnectionManager::new(
            config.clone(),
            Arc::new(router),
            Arc::clone(&resources),
            shutdown.token(),
        );
        if let Some(authenticator) = authenticator {
            manager = manager.with_authenticator(authenticator);
        }
        for listener in listeners {
            manager.add_listener(listener);
        }
        Self {
            config,
            manager: Arc::new(manager),
            resources,
            shutdown,
            metrics,
            start_time: Instant::now(),
            bound: Mutex::new(None),
        }
    }

    /// Build the Axum router for the HTTP side-port.
    pub fn http_router(&self) -> HttpRouter {
        let state = AppState {
            manager: Arc::clone(&self.manager),
            resources: Arc::clone(&self.resources),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };
        HttpRouter::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the listeners and spawn the accept loop, HTTP side-port,
    /// heartbeat sweeper, and pool health checks.
    pub async fn start(&self, tcp_addr: &str, http_addr: Option<&str>) -> Result<BoundAddrs, ServerError> {
        if let Some(bound) = *self.bound.lock() {
            return Err(ServerError::AlreadyRunning(bound.tcp));
        }
        let tcp = bind(tcp_addr).await?;
        let http = match http_addr {
            Some(addr) => Some(bind(addr).await?),
            None => None,
        };
        let bound = BoundAddrs {
            tcp: tcp.local_addr()?,
            http: http.as_ref().map(TcpListener::local_addr).transpose()?,
        };

        let token = self.shutdown.token();
        let _ = self.shutdown.spawn(Arc::clone(&self.manager).run(tcp));
        let _ = self.shutdown.spawn(heartbeat::run_sweeper(
            Arc::clone(self.manager.registry()),
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
            self.config.call_timeout.saturating_mul(2),
            token.clone(),
        ));
        for task in self.resources.spawn_health_checks(&token) {
            let _ = self.shutdown.spawn(async move {
                let _ = task.await;
            });
        }
        if let Some(listener) = http {
            let app = self.http_router();
            let stop = token.clone();
            let _ = self.shutdown.spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move { stop.cancelled().await });
                if let Err(e) = serve.await {
                    warn!(error = %e, "http side-port failed");
                }
            });
        }

        info!(tcp = %bound.tcp, http = ?bound.http, "gateway listening");
        *self.bound.lock() = Some(bound);
        Ok(bound)
    }

    /// Stop accepting, close every session with `Shutdown`, wait up to
    /// `timeout` for connections and background tasks, then close the pools.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("gateway shutting down");
        self.shutdown.shutdown();
        let _ = self.manager.close_all(DisconnectReason::Shutdown);
        let connections_done = self.manager.wait_closed(timeout).await;
        let tasks_done = self.shutdown.graceful_shutdown(Some(timeout)).await;
        self.resources.close();
        connections_done && tasks_done
    }

    /// Connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Addresses bound by [`start`](Self::start).
    pub fn bound(&self) -> Option<BoundAddrs> {
        *self.bound.lock()
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.manager.open_connections(),
        state.manager.registry().len(),
        state.resources.states(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(handle)),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
