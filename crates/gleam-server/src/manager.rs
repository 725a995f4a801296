//! Connection manager: accept loop, handshake, and the per-connection
//! reader/writer tasks.
//!
//! Each accepted connection runs one read loop (on its own task) and one
//! writer task draining the session's bounded queue. Requests are handed to
//! the shared worker pool in read order; responses come back through the
//! same queue, so they may be reordered across message ids.

use std::collections::VecDeque;
use std::future::{Future, poll_fn};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Span, debug, info, instrument, warn};

use gleam_core::constants::{SYSTEM_SERVICE_ID, VERSION};
use gleam_core::{DisconnectReason, Identity, SessionId};
use gleam_pool::ResourcePools;
use gleam_rpc::{HandlerContext, Router, SessionHandle, WorkerPermit, WorkerPool};
use gleam_wire::control::{self, Hello, HelloAck, HeartbeatAck};
use gleam_wire::{Control, Envelope, EnvelopeCodec, encode_message};

use crate::config::ConnectionConfig;
use crate::errors::SendError;
use crate::listener::ConnectionListener;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
    HANDLERS_ABANDONED_TOTAL, HANDSHAKE_FAILURES_TOTAL, SESSION_DURATION_SECONDS, UNMATCHED_RESPONSES_TOTAL,
};
use crate::registry::SessionRegistry;
use crate::session::{SendPolicy, Session};

/// Error code sent when a handshake is refused.
pub const AUTH_FAILED: &str = "AUTH_FAILED";
/// Error code for a second `Hello` on an established session.
pub const ALREADY_AUTHENTICATED: &str = "ALREADY_AUTHENTICATED";

type Transport = Framed<TcpStream, EnvelopeCodec>;

/// A pending worker-permit request, kept across read-loop iterations so the
/// connection does not lose its place in the semaphore queue.
type PermitWait<'a> = Pin<Box<dyn Future<Output = Option<WorkerPermit>> + Send + 'a>>;

enum ReadEvent {
    Permit(Option<WorkerPermit>),
    Frame(Option<Result<Envelope, gleam_wire::CodecError>>),
}

/// Decides whether a `Hello` is accepted.
pub trait Authenticator: Send + Sync {
    /// `Err(detail)` refuses the connection with `AuthFail`.
    fn authenticate(&self, hello: &Hello) -> Result<(), String>;
}

/// Accepts every handshake.
#[derive(Debug, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _hello: &Hello) -> Result<(), String> {
        Ok(())
    }
}

/// Accepts handshakes carrying one shared token.
#[derive(Debug)]
pub struct SharedToken(pub String);

impl Authenticator for SharedToken {
    fn authenticate(&self, hello: &Hello) -> Result<(), String> {
        if hello.token == self.0 {
            Ok(())
        } else {
            Err("invalid token".to_string())
        }
    }
}

struct Handshake {
    request: Envelope,
    identity: Option<Identity>,
}

/// Owns every connection and its session.
pub struct ConnectionManager {
    config: ConnectionConfig,
    router: Arc<Router>,
    resources: Arc<ResourcePools>,
    registry: Arc<SessionRegistry>,
    workers: WorkerPool,
    authenticator: Arc<dyn Authenticator>,
    listeners: Vec<Arc<dyn ConnectionListener>>,
    connection_limit: Arc<Semaphore>,
    connections: TaskTracker,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// New manager; stops accepting when `shutdown` is cancelled.
    pub fn new(
        config: ConnectionConfig,
        router: Arc<Router>,
        resources: Arc<ResourcePools>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let workers = WorkerPool::new(config.max_concurrent_handlers, config.max_in_flight_per_connection);
        Self {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            listeners: vec![Arc::clone(&registry) as Arc<dyn ConnectionListener>],
            registry,
            workers,
            authenticator: Arc::new(AllowAll),
            router,
            resources,
            connections: TaskTracker::new(),
            shutdown,
            config,
        }
    }

    /// Replace the handshake authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Add a lifecycle listener. The registry is always the first one.
    pub fn add_listener(&mut self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.push(listener);
    }

    /// Live sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Runtime limits.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Handler capacity shared by all connections.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Accepted connections still open (including ones mid-handshake).
    pub fn open_connections(&self) -> usize {
        self.config
            .max_connections
            .saturating_sub(self.connection_limit.available_permits())
    }

    /// Queue a frame to a session.
    pub async fn send(&self, session_id: &SessionId, envelope: Envelope) -> Result<(), SendError> {
        let session = self.registry.lookup(session_id).ok_or(SendError::SessionNotFound)?;
        session.send(envelope).await
    }

    /// Close a session, telling the peer why.
    pub fn close(&self, session_id: &SessionId, reason: DisconnectReason) -> Result<(), SendError> {
        let session = self.registry.lookup(session_id).ok_or(SendError::SessionNotFound)?;
        if session.begin_close(reason) {
            Ok(())
        } else {
            Err(SendError::SessionClosing)
        }
    }

    /// Close every live session. Returns how many started closing.
    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        self.registry
            .sessions()
            .iter()
            .filter(|s| s.begin_close(reason))
            .count()
    }

    /// Accept connections until shutdown, then close every session.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        info!(addr = ?listener.local_addr().ok(), "accepting connections");
        loop {
            let accepted = tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&self.connection_limit).try_acquire_owned() else {
                counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                warn!(%addr, max = self.config.max_connections, "connection limit reached, refusing");
                drop(stream);
                continue;
            };
            let _ = stream.set_nodelay(true);
            let manager = Arc::clone(&self);
            let _ = self.connections.spawn(manager.serve(stream, addr, permit));
        }
        let closed = self.close_all(DisconnectReason::Shutdown);
        info!(closed, "accept loop stopped");
    }

    /// Wait for every connection task to finish. Returns `false` on timeout.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let _ = self.connections.close();
        tokio::time::timeout(timeout, self.connections.wait()).await.is_ok()
    }

    #[instrument(skip_all, fields(remote = %addr, session_id = tracing::field::Empty))]
    async fn serve(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, _permit: OwnedSemaphorePermit) {
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let mut framed = Framed::new(stream, EnvelopeCodec::new(self.config.max_frame_size));
        match self.handshake(&mut framed).await {
            Ok(handshake) => self.run_session(framed, addr, handshake).await,
            Err(reason) => {
                counter!(HANDSHAKE_FAILURES_TOTAL, "reason" => reason.as_str()).increment(1);
                debug!(%reason, "handshake failed");
            }
        }
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    }

    async fn handshake(&self, framed: &mut Transport) -> Result<Handshake, DisconnectReason> {
        let first = match tokio::time::timeout(self.config.handshake_timeout, framed.next()).await {
            Err(_elapsed) => return self.refuse(framed, None, DisconnectReason::AuthTimeout, "").await,
            Ok(None) => return Err(DisconnectReason::Client),
            Ok(Some(Err(e))) => {
                return self
                    .refuse(framed, None, DisconnectReason::DecodeError, &e.to_string())
                    .await;
            }
            Ok(Some(Ok(envelope))) => envelope,
        };
        if first.service_id != SYSTEM_SERVICE_ID || first.is_response {
            return self
                .refuse(framed, Some(&first), DisconnectReason::AuthFail, "expected Hello")
                .await;
        }
        let hello = match Control::parse(&first) {
            Ok(Control::Hello(hello)) => hello,
            Ok(_) => {
                return self
                    .refuse(framed, Some(&first), DisconnectReason::AuthFail, "expected Hello")
                    .await;
            }
            Err(e) => {
                return self
                    .refuse(framed, Some(&first), DisconnectReason::DecodeError, &e.to_string())
                    .await;
            }
        };
        let identity = if hello.identity.is_empty() {
            None
        } else {
            let identity = Identity::from(hello.identity.as_str());
            if !identity.is_valid() {
                return self
                    .refuse(framed, Some(&first), DisconnectReason::AuthFail, "blank identity")
                    .await;
            }
            Some(identity)
        };
        if let Err(detail) = self.authenticator.authenticate(&hello) {
            return self.refuse(framed, Some(&first), DisconnectReason::AuthFail, &detail).await;
        }
        debug!(identity = ?identity, client_version = %hello.client_version, "handshake accepted");
        Ok(Handshake {
            request: first,
            identity,
        })
    }

    /// Best-effort error reply and `Kick` before dropping a connection
    /// that never became a session.
    async fn refuse(
        &self,
        framed: &mut Transport,
        request: Option<&Envelope>,
        reason: DisconnectReason,
        detail: &str,
    ) -> Result<Handshake, DisconnectReason> {
        let mut frames = Vec::with_capacity(2);
        if let Some(request) = request.filter(|r| !r.is_one_way()) {
            frames.push(control::error_response(request, AUTH_FAILED, detail));
        }
        if reason.notifies_peer() {
            frames.push(control::kick(reason));
        }
        let write = async {
            for frame in frames {
                framed.feed(frame).await?;
            }
            framed.flush().await
        };
        let _ = tokio::time::timeout(self.config.drain_timeout, write).await;
        Err(reason)
    }

    async fn run_session(self: &Arc<Self>, mut framed: Transport, addr: SocketAddr, handshake: Handshake) {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel(self.config.write_queue_depth);
        let policy = SendPolicy {
            back_pressure: self.config.back_pressure,
            send_timeout: self.config.send_timeout,
        };
        let session = Arc::new(Session::new(handshake.identity, addr, tx, policy));
        let _ = Span::current().record("session_id", tracing::field::display(session.id()));

        let ack = HelloAck {
            session_id: session.id().to_string(),
            server_version: VERSION.to_string(),
            heartbeat_interval_ms: duration_ms(self.config.heartbeat_interval),
        };
        if let Err(e) = framed.send(handshake.request.reply(encode_message(&ack))).await {
            debug!(error = %e, "failed to write HelloAck");
            return;
        }
        if !session.activate() {
            return;
        }
        if let Some(previous) = self.registry.register(&session) {
            info!(previous = %previous.id(), "identity already bound, evicting older session");
            let _ = previous.begin_close(DisconnectReason::SameIdentity);
        }
        for listener in &self.listeners {
            listener.on_open(&session);
        }
        info!("session opened");

        let (sink, stream) = framed.split();
        let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&session), self.config.drain_timeout));
        let mut handlers = JoinSet::new();
        self.read_loop(stream, &session, &mut handlers).await;

        let settle = async { while handlers.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.close_grace, settle).await.is_err() {
            let abandoned = handlers.len();
            handlers.abort_all();
            counter!(HANDLERS_ABANDONED_TOTAL).increment(abandoned as u64);
            warn!(abandoned, "handlers still running after close grace, aborting");
        }
        let _ = writer.await;
        session.mark_closed();

        let reason = session.close_reason().unwrap_or(DisconnectReason::Client);
        for listener in &self.listeners {
            listener.on_close(&session, reason);
        }
        counter!(DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        histogram!(SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(%reason, "session closed");
    }

    /// Read frames until the session closes.
    ///
    /// Responses and control frames are handled as they arrive. Requests
    /// wait in a FIFO backlog for a worker permit, so the stream keeps being
    /// read (replies to server-initiated calls, heartbeats) while every
    /// worker slot is taken. A full backlog pauses reading.
    async fn read_loop(
        &self,
        mut frames: SplitStream<Transport>,
        session: &Arc<Session>,
        handlers: &mut JoinSet<()>,
    ) {
        let limiter = self.workers.connection_limiter();
        let backlog_limit = self.config.max_queued_per_connection.max(1);
        let mut backlog: VecDeque<Envelope> = VecDeque::with_capacity(backlog_limit);
        let mut waiting: Option<PermitWait<'_>> = None;
        loop {
            while handlers.try_join_next().is_some() {}
            if waiting.is_none() && !backlog.is_empty() {
                waiting = Some(Box::pin(self.workers.acquire(&limiter)));
            }
            let reading = backlog.len() < backlog_limit;

            let event = tokio::select! {
                biased;
                () = session.closed() => break,
                () = self.shutdown.cancelled() => {
                    let _ = session.begin_close(DisconnectReason::Shutdown);
                    break;
                }
                permit = async {
                    match waiting.as_mut() {
                        Some(wait) => wait.await,
                        None => std::future::pending().await,
                    }
                }, if waiting.is_some() => ReadEvent::Permit(permit),
                next = frames.next(), if reading => ReadEvent::Frame(next),
            };

            let envelope = match event {
                ReadEvent::Permit(permit) => {
                    waiting = None;
                    let Some(permit) = permit else {
                        let _ = session.begin_close(DisconnectReason::Shutdown);
                        break;
                    };
                    if let Some(request) = backlog.pop_front() {
                        self.spawn_handler(session, request, permit, handlers);
                    }
                    continue;
                }
                ReadEvent::Frame(None) => {
                    let _ = session.begin_close(DisconnectReason::Client);
                    break;
                }
                ReadEvent::Frame(Some(Err(e))) => {
                    warn!(error = %e, "malformed frame, closing connection");
                    let _ = session.begin_close(DisconnectReason::DecodeError);
                    break;
                }
                ReadEvent::Frame(Some(Ok(envelope))) => envelope,
            };
            session.touch();

            if envelope.is_response {
                let message_id = envelope.message_id;
                if !session.pending().complete(envelope) {
                    counter!(UNMATCHED_RESPONSES_TOTAL).increment(1);
                    debug!(message_id, "unmatched response dropped");
                }
                continue;
            }
            if envelope.service_id == SYSTEM_SERVICE_ID {
                if self.handle_control(session, &envelope).await.is_break() {
                    break;
                }
                continue;
            }
            backlog.push_back(envelope);
        }
        if !backlog.is_empty() {
            debug!(dropped = backlog.len(), "session closed with undispatched requests");
        }
    }

    fn spawn_handler(
        &self,
        session: &Arc<Session>,
        envelope: Envelope,
        permit: WorkerPermit,
        handlers: &mut JoinSet<()>,
    ) {
        let ctx = HandlerContext::new(
            Arc::clone(session) as Arc<dyn SessionHandle>,
            Arc::clone(&self.resources),
            envelope.message_id,
        );
        let router = Arc::clone(&self.router);
        let owner = Arc::clone(session);
        let _ = handlers.spawn(async move {
            let _permit = permit;
            if let Some(response) = router.dispatch(&envelope, &ctx).await {
                if let Err(e) = owner.send(response).await {
                    debug!(message_id = envelope.message_id, error = %e, "response not queued");
                }
            }
        });
    }

    async fn handle_control(&self, session: &Session, envelope: &Envelope) -> ControlFlow<()> {
        match Control::parse(envelope) {
            Ok(Control::Heartbeat(heartbeat)) => {
                if !envelope.is_one_way() {
                    let ack = HeartbeatAck {
                        sent_at_ms: heartbeat.sent_at_ms,
                        server_time_ms: now_ms(),
                    };
                    if let Err(e) = session.send(envelope.reply(encode_message(&ack))).await {
                        debug!(error = %e, "heartbeat ack not queued");
                    }
                }
                ControlFlow::Continue(())
            }
            Ok(Control::Hello(_)) => {
                let reply = control::error_response(envelope, ALREADY_AUTHENTICATED, "handshake already completed");
                let _ = session.send(reply).await;
                ControlFlow::Continue(())
            }
            Ok(Control::Kick(kick)) => {
                debug!(reason = %kick.reason, "peer announced disconnect");
                let _ = session.begin_close(DisconnectReason::Client);
                ControlFlow::Break(())
            }
            Ok(other) => {
                debug!(?other, "unexpected control frame ignored");
                ControlFlow::Continue(())
            }
            Err(e) => {
                warn!(error = %e, "malformed control frame, closing connection");
                let _ = session.begin_close(DisconnectReason::DecodeError);
                ControlFlow::Break(())
            }
        }
    }
}

/// Forward queued frames until closing begins, then flush what is left
/// within `drain_timeout` and shut the write half.
///
/// A frame taken off the queue stays in `in_flight` until the sink has
/// accepted it, so closing mid-write never loses it.
async fn write_loop(
    mut sink: SplitSink<Transport, Envelope>,
    mut rx: mpsc::Receiver<Envelope>,
    session: Arc<Session>,
    drain_timeout: Duration,
) {
    let mut in_flight: Option<Envelope> = None;
    let failed = loop {
        if in_flight.is_none() {
            in_flight = tokio::select! {
                biased;
                () = session.closed() => break None,
                next = rx.recv() => match next {
                    Some(envelope) => Some(envelope),
                    None => break None,
                },
            };
        }
        let ready = tokio::select! {
            biased;
            ready = poll_fn(|cx| sink.poll_ready_unpin(cx)) => ready,
            () = session.closed() => break None,
        };
        if let Err(e) = ready {
            break Some(e);
        }
        if let Some(envelope) = in_flight.take() {
            if let Err(e) = sink.start_send_unpin(envelope) {
                break Some(e);
            }
        }
        let flushed = tokio::select! {
            biased;
            flushed = sink.flush() => flushed,
            () = session.closed() => break None,
        };
        if let Err(e) = flushed {
            break Some(e);
        }
    };
    if let Some(e) = failed {
        warn!(error = %e, "write failed, closing connection");
        let _ = session.begin_close(DisconnectReason::WriteError);
        return;
    }

    let drain = async {
        if let Some(envelope) = in_flight.take() {
            sink.feed(envelope).await?;
        }
        while let Ok(envelope) = rx.try_recv() {
            sink.feed(envelope).await?;
        }
        sink.close().await
    };
    match tokio::time::timeout(drain_timeout, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "drain failed"),
        Err(_) => warn!(?drain_timeout, "write queue not drained in time"),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(token: &str) -> Hello {
        Hello {
            identity: "peer".into(),
            client_version: "test".into(),
            token: token.into(),
        }
    }

    #[test]
    fn allow_all_accepts() {
        assert!(AllowAll.authenticate(&hello("")).is_ok());
    }

    #[test]
    fn shared_token_checks_token() {
        let auth = SharedToken("s3cret".into());
        assert!(auth.authenticate(&hello("s3cret")).is_ok());
        assert_eq!(auth.authenticate(&hello("nope")), Err("invalid token".to_string()));
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn send_to_unknown_session_fails() {
        let manager = ConnectionManager::new(
            ConnectionConfig::default(),
            Arc::new(gleam_rpc::RouterBuilder::new().build()),
            Arc::new(ResourcePools::empty()),
            CancellationToken::new(),
        );
        let missing = SessionId::new();
        assert_eq!(
            manager.send(&missing, Envelope::notify(1, 1, bytes::Bytes::new())).await,
            Err(SendError::SessionNotFound)
        );
        assert_eq!(
            manager.close(&missing, DisconnectReason::Force),
            Err(SendError::SessionNotFound)
        );
        assert_eq!(manager.open_connections(), 0);
    }
}
