//! In-memory session for handler and router tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use gleam_core::{DisconnectReason, Identity, SessionId};
use gleam_pool::ResourcePools;

use crate::context::{HandlerContext, SessionHandle};
use crate::errors::CallError;

#[derive(Default)]
pub(crate) struct MockSession {
    id: SessionId,
    attributes: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl SessionHandle for MockSession {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn identity(&self) -> Option<Identity> {
        Some(Identity::from("test-peer"))
    }

    fn remote_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40_000))
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().get(key).cloned()
    }

    fn set_attribute(&self, key: &str, value: Value) -> Option<Value> {
        self.attributes.lock().insert(key.to_owned(), value)
    }

    async fn call(&self, _s: u16, _m: u16, payload: Bytes, _t: Duration) -> Result<Bytes, CallError> {
        Ok(payload)
    }

    async fn notify(&self, _s: u16, _m: u16, _payload: Bytes) -> Result<(), CallError> {
        Ok(())
    }

    fn close(&self, _reason: DisconnectReason) {}
}

/// Context over a fresh mock session and no backend pools.
pub(crate) fn make_test_context() -> HandlerContext {
    HandlerContext::new(Arc::new(MockSession::default()), Arc::new(ResourcePools::empty()), 1)
}
