//! Hooks for connection lifecycle events.

use std::sync::Arc;

use gleam_core::DisconnectReason;

use crate::session::Session;

/// Notified when sessions open and close.
///
/// Called inline on the connection task; implementations must not block.
pub trait ConnectionListener: Send + Sync {
    /// A session completed its handshake.
    fn on_open(&self, _session: &Arc<Session>) {}

    /// A session closed. Its pending calls are already cancelled.
    fn on_close(&self, _session: &Session, _reason: DisconnectReason) {}
}
