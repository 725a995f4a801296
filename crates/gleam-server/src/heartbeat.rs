//! Inactivity sweeper.
//!
//! Any inbound frame counts as activity; clients that have nothing to say
//! send `Heartbeat`. Sessions silent for longer than the timeout are closed
//! with `HeartbeatTimeout`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gleam_core::DisconnectReason;

use crate::registry::SessionRegistry;

/// Close every session idle for at least `timeout`. Also times out
/// server-initiated calls older than `call_timeout` whose caller gave up
/// without collecting them. Returns the number of sessions closed.
pub fn sweep_once(registry: &SessionRegistry, timeout: Duration, call_timeout: Duration) -> usize {
    let mut closed = 0;
    for session in registry.sessions() {
        if session.idle_for() >= timeout {
            if session.begin_close(DisconnectReason::HeartbeatTimeout) {
                info!(session_id = %session.id(), idle = ?session.idle_for(), "heartbeat timeout");
                closed += 1;
            }
            continue;
        }
        let swept = session.pending().sweep_expired(call_timeout);
        if swept > 0 {
            debug!(session_id = %session.id(), swept, "expired pending calls");
        }
    }
    closed
}

/// Run [`sweep_once`] every `interval` until cancelled.
pub async fn run_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    timeout: Duration,
    call_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = sweep_once(&registry, timeout, call_timeout);
            }
            () = cancel.cancelled() => {
                debug!("heartbeat sweeper stopped");
                return;
            }
        }
    }
}
