//! Handler registry keyed by `(service_id, method_id)` and async dispatch.
//!
//! Handlers are registered on a [`RouterBuilder`] at startup and frozen into
//! an immutable [`Router`]. Every dispatch runs under the handler budget
//! and behind a panic boundary, so a request always gets exactly one
//! response (or none, for one-way messages).

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use metrics::{counter, histogram};
use prost::Message;
use tracing::{debug, error, warn};

use gleam_core::constants::SYSTEM_SERVICE_ID;
use gleam_wire::{Envelope, encode_message};

use crate::context::HandlerContext;
use crate::errors::{RegistrationError, RpcError};

/// Requests slower than this are logged.
const SLOW_REQUEST: Duration = Duration::from_secs(1);

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the raw request payload.
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError>;
}

/// Adapter turning an async closure into a [`MethodHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a handler. The context is passed by value.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Bytes, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Bytes, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
{
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        (self.0)(payload, ctx.clone()).await
    }
}

/// Decode a typed request payload; failures become `INVALID_PAYLOAD`.
pub fn decode_payload<M: Message + Default>(payload: &Bytes) -> Result<M, RpcError> {
    Ok(M::decode(payload.clone())?)
}

/// Encode a typed reply payload.
pub fn encode_reply<M: Message>(reply: &M) -> Bytes {
    encode_message(reply)
}

/// A registered handler and its display name.
#[derive(Clone)]
pub struct Route {
    /// Service id.
    pub service_id: u16,
    /// Method id.
    pub method_id: u16,
    /// Name used in logs and metric labels (`service.method`).
    pub name: String,
    handler: Arc<dyn MethodHandler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("service_id", &self.service_id)
            .field("method_id", &self.method_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Collects handlers before the router is frozen.
pub struct RouterBuilder {
    routes: HashMap<(u16, u16), Route>,
    handler_timeout: Duration,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// Empty builder with a 5 second handler budget.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            handler_timeout: Duration::from_secs(5),
        }
    }

    /// Set the per-invocation execution budget.
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Register `handler` under `(service_id, method_id)`.
    pub fn register(
        &mut self,
        service_id: u16,
        method_id: u16,
        name: &str,
        handler: impl MethodHandler + 'static,
    ) -> Result<&mut Self, RegistrationError> {
        if service_id == SYSTEM_SERVICE_ID {
            return Err(RegistrationError::ReservedService { service_id });
        }
        let key = (service_id, method_id);
        if self.routes.contains_key(&key) {
            return Err(RegistrationError::Duplicate {
                service_id,
                method_id,
            });
        }
        let _ = self.routes.insert(
            key,
            Route {
                service_id,
                method_id,
                name: name.to_owned(),
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> Router {
        let mut services: HashMap<u16, usize> = HashMap::new();
        for (service_id, _) in self.routes.keys() {
            *services.entry(*service_id).or_default() += 1;
        }
        debug!(
            routes = self.routes.len(),
            services = services.len(),
            "router built"
        );
        Router {
            routes: self.routes,
            services,
            handler_timeout: self.handler_timeout,
        }
    }
}

/// Immutable dispatch table.
pub struct Router {
    routes: HashMap<(u16, u16), Route>,
    services: HashMap<u16, usize>,
    handler_timeout: Duration,
}

impl Router {
    /// Find the route for a request, distinguishing unknown services from
    /// unknown methods.
    pub fn resolve(&self, service_id: u16, method_id: u16) -> Result<&Route, RpcError> {
        if let Some(route) = self.routes.get(&(service_id, method_id)) {
            return Ok(route);
        }
        if self.services.contains_key(&service_id) {
            Err(RpcError::UnknownMethod {
                service_id,
                method_id,
            })
        } else {
            Err(RpcError::UnknownService { service_id })
        }
    }

    /// Handler budget.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Dispatch one inbound request.
    ///
    /// Returns the response envelope, or `None` for a one-way message.
    pub async fn dispatch(&self, request: &Envelope, ctx: &HandlerContext) -> Option<Envelope> {
        let one_way = request.is_one_way();
        let result = match self.resolve(request.service_id, request.method_id) {
            Ok(route) => self.invoke(route, request, ctx).await,
            Err(err) => {
                counter!("rpc_errors_total", "method" => "unknown", "error_type" => err.code().to_owned())
                    .increment(1);
                debug!(
                    service_id = request.service_id,
                    method_id = request.method_id,
                    message_id = request.message_id,
                    code = err.code(),
                    "unroutable request"
                );
                Err(err)
            }
        };

        match (one_way, result) {
            (true, Ok(_)) => None,
            (true, Err(err)) => {
                warn!(
                    service_id = request.service_id,
                    method_id = request.method_id,
                    error = %err,
                    "one-way handler failed"
                );
                None
            }
            (false, Ok(payload)) => Some(request.reply(payload)),
            (false, Err(err)) => Some(request.error_reply(encode_message(&err.to_error_reply()))),
        }
    }

    async fn invoke(&self, route: &Route, request: &Envelope, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let method = route.name.clone();
        counter!("rpc_requests_total", "method" => method.clone()).increment(1);

        let start = Instant::now();
        let call = AssertUnwindSafe(route.handler.handle(request.payload.clone(), ctx)).catch_unwind();
        let result = match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => {
                error!(method, message_id = request.message_id, "handler panicked");
                Err(RpcError::Internal {
                    message: format!("handler for '{method}' panicked"),
                })
            }
            Err(_elapsed) => {
                error!(
                    method,
                    message_id = request.message_id,
                    "handler timed out after {:?}",
                    self.handler_timeout
                );
                Err(RpcError::Timeout {
                    budget_ms: u64::try_from(self.handler_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        };

        if let Err(err) = &result {
            counter!("rpc_errors_total", "method" => method.clone(), "error_type" => err.code().to_owned())
                .increment(1);
        }

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.clone()).record(duration.as_secs_f64());
        if duration >= SLOW_REQUEST {
            warn!(
                method,
                duration_secs = duration.as_secs_f64(),
                "slow RPC request"
            );
        }
        result
    }

    /// All registered routes, sorted by key.
    pub fn routes(&self) -> Vec<&Route> {
        let mut routes: Vec<&Route> = self.routes.values().collect();
        routes.sort_by_key(|r| (r.service_id, r.method_id));
        routes
    }

    /// Whether a handler exists for the key.
    pub fn has_route(&self, service_id: u16, method_id: u16) -> bool {
        self.routes.contains_key(&(service_id, method_id))
    }
}
