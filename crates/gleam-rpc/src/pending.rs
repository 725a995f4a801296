//! Correlation of server-initiated calls with their replies.
//!
//! Each session owns one [`PendingCalls`]. Message ids are non-zero, wrap
//! around, and skip ids that are still outstanding. Closing the session
//! resolves every outstanding call with [`CallError::Cancelled`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::debug;

use gleam_wire::{Envelope, ErrorReply, decode_message};

use crate::errors::CallError;

type Slot = oneshot::Sender<Result<Envelope, CallError>>;

/// Receives the reply (or failure) of one registered call.
pub type ReplyReceiver = oneshot::Receiver<Result<Envelope, CallError>>;

struct PendingCall {
    issued_at: Instant,
    slot: Slot,
}

/// Outstanding calls of one session, keyed by message id.
pub struct PendingCalls {
    calls: DashMap<u32, PendingCall>,
    next_id: AtomicU32,
    closed: AtomicBool,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    /// Empty table; the first id handed out is `1`.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Empty table whose next candidate id is `first`.
    pub fn starting_at(first: u32) -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU32::new(first),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate a message id and a reply slot.
    ///
    /// Fails with `Cancelled` once the table has been cancelled.
    pub fn register(&self) -> Result<(u32, ReplyReceiver), CallError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::Cancelled);
        }
        // At most `len` ids are taken and one candidate may be zero.
        let attempts = self.calls.len() + 2;
        for _ in 0..attempts {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.calls.entry(id) {
                let (tx, rx) = oneshot::channel();
                let _ = slot.insert(PendingCall {
                    issued_at: Instant::now(),
                    slot: tx,
                });
                return Ok((id, rx));
            }
        }
        Err(CallError::Send("no free message id".to_string()))
    }

    /// Route a response to its waiting caller. Returns `false` when no
    /// call is pending under its id.
    pub fn complete(&self, response: Envelope) -> bool {
        match self.calls.remove(&response.message_id) {
            Some((_, call)) => {
                let _ = call.slot.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without resolving it.
    pub fn forget(&self, id: u32) {
        let _ = self.calls.remove(&id);
    }

    /// Resolve every outstanding call with `Cancelled` and refuse new ones.
    pub fn cancel_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<u32> = self.calls.iter().map(|e| *e.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                let _ = call.slot.send(Err(CallError::Cancelled));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "pending calls cancelled");
        }
        cancelled
    }

    /// Resolve calls older than `max_age` with `Timeout`.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .calls
            .iter()
            .filter(|e| now.duration_since(e.issued_at) >= max_age)
            .map(|e| *e.key())
            .collect();
        let mut swept = 0;
        for id in expired {
            if let Some((_, call)) = self.calls.remove(&id) {
                let _ = call.slot.send(Err(CallError::Timeout));
                swept += 1;
            }
        }
        swept
    }

    /// Await the reply for `id`, removing the entry on timeout.
    ///
    /// An error response becomes [`CallError::Remote`].
    pub async fn wait(&self, id: u32, reply: ReplyReceiver, timeout: Duration) -> Result<Bytes, CallError> {
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(envelope))) if envelope.is_error => {
                let err = decode_message::<ErrorReply>(&envelope.payload)
                    .map_or_else(
                        |e| CallError::Remote {
                            code: crate::errors::INVALID_PAYLOAD.to_string(),
                            message: e.to_string(),
                        },
                        CallError::from,
                    );
                Err(err)
            }
            Ok(Ok(Ok(envelope))) => Ok(envelope.payload),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(CallError::Cancelled),
            Err(_) => {
                self.forget(id);
                Err(CallError::Timeout)
            }
        }
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is outstanding.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
