//! Session state owned by the connection manager.
//!
//! A [`Session`] wraps the write half of one connection: a bounded queue
//! drained by the connection's writer task. Handlers and the registry only
//! ever see it through `Arc`/`Weak` references.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gleam_core::{DisconnectReason, Identity, SessionId};
use gleam_rpc::{CallError, PendingCalls, SessionHandle};
use gleam_settings::BackPressurePolicy;
use gleam_wire::{Envelope, control};

use crate::errors::SendError;
use crate::metrics::SEND_REJECTED_TOTAL;

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Created, `HelloAck` not yet written.
    Handshaking = 0,
    /// Serving requests.
    Active = 1,
    /// No more sends accepted; the write queue is draining.
    Closing = 2,
    /// Transport gone.
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Handshaking,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// How a session's write queue behaves when full.
#[derive(Clone, Copy, Debug)]
pub struct SendPolicy {
    /// Reject or block.
    pub back_pressure: BackPressurePolicy,
    /// Upper bound for a blocking send.
    pub send_timeout: Duration,
}

/// Serializable view of a session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id.
    pub session_id: SessionId,
    /// Bound identity, if any.
    pub identity: Option<Identity>,
    /// Peer address.
    pub remote_addr: SocketAddr,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Current state.
    pub state: SessionState,
    /// Outstanding server-initiated calls.
    pub pending_calls: usize,
}

/// One accepted connection after a successful handshake.
pub struct Session {
    id: SessionId,
    identity: Option<Identity>,
    remote_addr: SocketAddr,
    created_at: DateTime<Utc>,
    attributes: RwLock<HashMap<String, Value>>,
    tx: mpsc::Sender<Envelope>,
    policy: SendPolicy,
    state: AtomicU8,
    last_activity: Mutex<Instant>,
    close_reason: Mutex<Option<DisconnectReason>>,
    closing: CancellationToken,
    pending: PendingCalls,
}

impl Session {
    /// New session in `Handshaking` state writing into `tx`.
    pub fn new(
        identity: Option<Identity>,
        remote_addr: SocketAddr,
        tx: mpsc::Sender<Envelope>,
        policy: SendPolicy,
    ) -> Self {
        Self {
            id: SessionId::new(),
            identity,
            remote_addr,
            created_at: Utc::now(),
            attributes: RwLock::new(HashMap::new()),
            tx,
            policy,
            state: AtomicU8::new(SessionState::Handshaking as u8),
            last_activity: Mutex::new(Instant::now()),
            close_reason: Mutex::new(None),
            closing: CancellationToken::new(),
            pending: PendingCalls::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Handshaking` → `Active`. Returns `false` if the session already
    /// started closing.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Handshaking as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Outstanding server-initiated calls.
    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Queue a frame for the writer, honoring the back-pressure policy.
    pub async fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        if self.state() as u8 >= SessionState::Closing as u8 {
            return Err(SendError::SessionClosing);
        }
        let result = match self.policy.back_pressure {
            BackPressurePolicy::Reject => self.tx.try_send(envelope).map_err(|e| match e {
                TrySendError::Full(_) => SendError::QueueFull,
                TrySendError::Closed(_) => SendError::SessionClosing,
            }),
            BackPressurePolicy::Block => self
                .tx
                .send_timeout(envelope, self.policy.send_timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => SendError::QueueFull,
                    SendTimeoutError::Closed(_) => SendError::SessionClosing,
                }),
        };
        if result == Err(SendError::QueueFull) {
            counter!(SEND_REJECTED_TOTAL).increment(1);
            debug!(session_id = %self.id, "write queue full");
        }
        result
    }

    /// Begin closing: refuse further sends, queue a `Kick` when the peer
    /// should hear the reason, cancel every pending call, and signal the
    /// connection tasks. Only the first call has any effect.
    pub fn begin_close(&self, reason: DisconnectReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        *self.close_reason.lock() = Some(reason);
        if reason.notifies_peer() {
            // Bypasses the state check above; a full queue loses the notice.
            let _ = self.tx.try_send(control::kick(reason));
        }
        let _ = self.pending.cancel_all();
        self.closing.cancel();
        debug!(session_id = %self.id, %reason, "session closing");
        true
    }

    /// Transport is gone.
    pub fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Why the session closed, once closing has begun.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        *self.close_reason.lock()
    }

    /// Resolves once closing has begun.
    pub async fn closed(&self) {
        self.closing.cancelled().await;
    }

    /// Token cancelled when closing begins.
    pub fn closing_token(&self) -> &CancellationToken {
        &self.closing
    }

    /// Snapshot for the registry and health endpoint.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            identity: self.identity.clone(),
            remote_addr: self.remote_addr,
            created_at: self.created_at,
            state: self.state(),
            pending_calls: self.pending.len(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionHandle for Session {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn identity(&self) -> Option<Identity> {
        self.identity.clone()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    fn set_attribute(&self, key: &str, value: Value) -> Option<Value> {
        self.attributes.write().insert(key.to_owned(), value)
    }

    async fn call(
        &self,
        service_id: u16,
        method_id: u16,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, CallError> {
        let (message_id, reply) = self.pending.register()?;
        let request = Envelope::request(message_id, service_id, method_id, payload);
        if let Err(e) = self.send(request).await {
            self.pending.forget(message_id);
            return Err(match e {
                SendError::SessionClosing => CallError::Cancelled,
                other => CallError::Send(other.to_string()),
            });
        }
        self.pending.wait(message_id, reply, timeout).await
    }

    async fn notify(&self, service_id: u16, method_id: u16, payload: Bytes) -> Result<(), CallError> {
        self.send(Envelope::notify(service_id, method_id, payload))
            .await
            .map_err(|e| CallError::Send(e.to_string()))
    }

    fn close(&self, reason: DisconnectReason) {
        let _ = self.begin_close(reason);
    }
}
