//! What a handler can see: the calling session and the backend pools.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use gleam_core::{DisconnectReason, Identity, SessionId};
use gleam_pool::ResourcePools;

use crate::errors::CallError;

/// A live session as seen from handlers and the router.
///
/// Implemented by the connection manager's session type; handlers never
/// own the connection.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Gateway-assigned id.
    fn session_id(&self) -> &SessionId;

    /// Identity bound at handshake.
    fn identity(&self) -> Option<Identity>;

    /// Peer address.
    fn remote_addr(&self) -> SocketAddr;

    /// Read a session attribute.
    fn attribute(&self, key: &str) -> Option<Value>;

    /// Write a session attribute, returning the previous value.
    fn set_attribute(&self, key: &str, value: Value) -> Option<Value>;

    /// Call a method on the peer and await its reply payload.
    async fn call(
        &self,
        service_id: u16,
        method_id: u16,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, CallError>;

    /// Send a one-way message to the peer.
    async fn notify(&self, service_id: u16, method_id: u16, payload: Bytes) -> Result<(), CallError>;

    /// Close the session, telling the peer why.
    fn close(&self, reason: DisconnectReason);
}

/// Shared context passed to every handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    /// The session the request arrived on.
    pub session: Arc<dyn SessionHandle>,
    /// Backend pools.
    pub resources: Arc<ResourcePools>,
    /// Message id of the request being handled (`0` for one-way).
    pub message_id: u32,
}

impl HandlerContext {
    /// Context for one request.
    pub fn new(session: Arc<dyn SessionHandle>, resources: Arc<ResourcePools>, message_id: u32) -> Self {
        Self {
            session,
            resources,
            message_id,
        }
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("session_id", self.session.session_id())
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}
