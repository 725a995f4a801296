//! Process-wide index of live sessions.
//!
//! Entries hold `Weak` references; the connection manager owns each
//! session. The identity index guarantees at most one live session per
//! identity: registering a second one hands back the older session so the
//! caller can evict it.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use gleam_core::{DisconnectReason, Identity, SessionId};
use gleam_wire::Envelope;

use crate::listener::ConnectionListener;
use crate::metrics::BROADCAST_FAILURES_TOTAL;
use crate::session::{Session, SessionInfo};

struct SessionEntry {
    identity: Option<Identity>,
    session: Weak<Session>,
}

/// Outcome of a fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Sessions the frame was queued to.
    pub delivered: usize,
    /// Sessions that refused it (queue full, closing, or gone).
    pub failed: usize,
}

/// Live sessions by id and by identity.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    identities: DashMap<Identity, SessionId>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns the session previously bound to the same
    /// identity, which the caller must close.
    pub fn register(&self, session: &Arc<Session>) -> Option<Arc<Session>> {
        let info = session.info();
        let _ = self.sessions.insert(
            info.session_id.clone(),
            SessionEntry {
                identity: info.identity.clone(),
                session: Arc::downgrade(session),
            },
        );
        let identity = info.identity?;
        let previous = self.identities.insert(identity.clone(), info.session_id.clone())?;
        debug!(%identity, old = %previous, new = %info.session_id, "identity rebound");
        self.lookup(&previous)
    }

    /// Remove a session. The identity index is cleared only if it still
    /// points at this session.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return false;
        };
        if let Some(identity) = entry.identity {
            let _ = self.identities.remove_if(&identity, |_, bound| bound == session_id);
        }
        true
    }

    /// Live session by id.
    pub fn lookup(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(session_id)?.session.upgrade()
    }

    /// Live session bound to `identity`.
    pub fn by_identity(&self, identity: &Identity) -> Option<Arc<Session>> {
        let session_id = self.identities.get(identity)?.clone();
        self.lookup(&session_id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().filter_map(|e| e.session.upgrade()).collect()
    }

    /// Info for every live session, oldest first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions().iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Queue `envelope` to every live session matching `predicate`.
    ///
    /// One session failing never stops delivery to the rest.
    pub async fn broadcast<P>(&self, predicate: P, envelope: &Envelope) -> BroadcastReport
    where
        P: Fn(&Session) -> bool,
    {
        let mut report = BroadcastReport::default();
        for session in self.sessions() {
            if !predicate(&session) {
                continue;
            }
            match session.send(envelope.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    counter!(BROADCAST_FAILURES_TOTAL).increment(1);
                    warn!(session_id = %session.id(), error = %e, "broadcast delivery failed");
                }
            }
        }
        report
    }
}

impl ConnectionListener for SessionRegistry {
    fn on_close(&self, session: &Session, _reason: DisconnectReason) {
        let _ = self.remove(session.id());
    }
}
