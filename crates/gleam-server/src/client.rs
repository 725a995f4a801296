//! Client side of the gateway protocol.
//!
//! [`GatewayClient`] performs the handshake, keeps the session alive with
//! heartbeats, issues calls, and answers server-initiated calls through an
//! optional client-side [`Router`]. Handlers on the client see the link to
//! the server as their [`SessionHandle`], so they can call back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gleam_core::constants::{DEFAULT_MAX_FRAME_SIZE, SYSTEM_SERVICE_ID, VERSION};
use gleam_core::{DisconnectReason, Identity, SessionId};
use gleam_pool::ResourcePools;
use gleam_rpc::errors::{INVALID_PAYLOAD, UNKNOWN_SERVICE};
use gleam_rpc::{CallError, HandlerContext, PendingCalls, Router, SessionHandle};
use gleam_wire::control::{self, Heartbeat, HeartbeatAck, Hello};
use gleam_wire::{Control, Envelope, EnvelopeCodec, SystemMethod, decode_message};

use crate::errors::ClientError;

type Transport = Framed<TcpStream, EnvelopeCodec>;

const HELLO_MESSAGE_ID: u32 = 1;
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

/// Connection parameters.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Identity to bind; empty for an anonymous session.
    pub identity: String,
    /// Credential passed to the server's authenticator.
    pub token: String,
    /// Largest frame accepted from the server.
    pub max_frame_size: usize,
    /// Deadline for `HelloAck`.
    pub handshake_timeout: Duration,
    /// Default timeout of [`GatewayClient::call`].
    pub call_timeout: Duration,
    /// Outbound queue depth.
    pub write_queue_depth: usize,
    /// Send heartbeats at the interval the server advertises.
    pub heartbeat: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            identity: String::new(),
            token: String::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            write_queue_depth: 256,
            heartbeat: true,
        }
    }
}

impl ClientOptions {
    /// Options binding `identity`.
    pub fn with_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }
}

/// The client's view of its connection; handed to client-side handlers.
struct ClientLink {
    session_id: SessionId,
    identity: Option<Identity>,
    server_addr: SocketAddr,
    tx: mpsc::Sender<Envelope>,
    pending: PendingCalls,
    attributes: RwLock<HashMap<String, Value>>,
    kicked: Mutex<Option<DisconnectReason>>,
    closed: CancellationToken,
}

impl ClientLink {
    async fn enqueue(&self, envelope: Envelope) -> Result<(), CallError> {
        if self.closed.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        self.tx.send(envelope).await.map_err(|_| CallError::Cancelled)
    }

    async fn request(&self, service_id: u16, method_id: u16, payload: Bytes, timeout: Duration) -> Result<Bytes, CallError> {
        let (message_id, reply) = self.pending.register()?;
        if let Err(e) = self
            .enqueue(Envelope::request(message_id, service_id, method_id, payload))
            .await
        {
            self.pending.forget(message_id);
            return Err(e);
        }
        self.pending.wait(message_id, reply, timeout).await
    }

    fn shut(&self) {
        self.closed.cancel();
        let _ = self.pending.cancel_all();
    }
}

#[async_trait]
impl SessionHandle for ClientLink {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn identity(&self) -> Option<Identity> {
        self.identity.clone()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.server_addr
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
        self.request(service_id, method_id, payload, timeout).await
    }

    async fn notify(&self, service_id: u16, method_id: u16, payload: Bytes) -> Result<(), CallError> {
        self.enqueue(Envelope::notify(service_id, method_id, payload)).await
    }

    fn close(&self, _reason: DisconnectReason) {
        self.shut();
    }
}

/// A connected, handshaken gateway session.
pub struct GatewayClient {
    link: Arc<ClientLink>,
    heartbeat_interval: Duration,
    call_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayClient {
    /// Connect without a client-side router; server-initiated requests are
    /// answered with `UNKNOWN_SERVICE`.
    pub async fn connect(addr: impl ToSocketAddrs, options: ClientOptions) -> Result<Self, ClientError> {
        Self::connect_with_router(addr, options, None).await
    }

    /// Connect and serve server-initiated calls with `router`.
    pub async fn connect_with_router(
        addr: impl ToSocketAddrs,
        options: ClientOptions,
        router: Option<Arc<Router>>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let server_addr = stream.peer_addr()?;
        let mut framed = Framed::new(stream, EnvelopeCodec::new(options.max_frame_size));

        let hello = Hello {
            identity: options.identity.clone(),
            client_version: VERSION.to_string(),
            token: options.token.clone(),
        };
        framed
            .send(control::system_request(SystemMethod::Hello, HELLO_MESSAGE_ID, &hello))
            .await?;
        let ack = match tokio::time::timeout(options.handshake_timeout, framed.next()).await {
            Err(_) => return Err(ClientError::HandshakeTimeout),
            Ok(None) => return Err(ClientError::Protocol("connection closed during handshake".into())),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(reply))) => handshake_reply(&reply)?,
        };

        let (tx, rx) = mpsc::channel(options.write_queue_depth);
        let link = Arc::new(ClientLink {
            session_id: SessionId::from(ack.session_id),
            identity: (!options.identity.is_empty()).then(|| Identity::from(options.identity.as_str())),
            server_addr,
            tx,
            pending: PendingCalls::starting_at(HELLO_MESSAGE_ID + 1),
            attributes: RwLock::new(HashMap::new()),
            kicked: Mutex::new(None),
            closed: CancellationToken::new(),
        });
        info!(session_id = %link.session_id, server_version = %ack.server_version, "connected to gateway");

        let heartbeat_interval = Duration::from_millis(ack.heartbeat_interval_ms);
        let (sink, stream) = framed.split();
        let mut tasks = vec![
            tokio::spawn(client_writer(sink, rx, Arc::clone(&link))),
            tokio::spawn(client_reader(stream, Arc::clone(&link), router)),
        ];
        if options.heartbeat && !heartbeat_interval.is_zero() {
            tasks.push(tokio::spawn(client_heartbeat(
                Arc::clone(&link),
                heartbeat_interval,
                options.call_timeout,
            )));
        }
        Ok(Self {
            link,
            heartbeat_interval,
            call_timeout: options.call_timeout,
            tasks,
        })
    }

    /// Session id assigned by the server.
    pub fn session_id(&self) -> &SessionId {
        &self.link.session_id
    }

    /// Heartbeat interval the server advertised.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// The link as a [`SessionHandle`].
    pub fn handle(&self) -> Arc<dyn SessionHandle> {
        Arc::clone(&self.link) as Arc<dyn SessionHandle>
    }

    /// Call with the default timeout.
    pub async fn call(&self, service_id: u16, method_id: u16, payload: Bytes) -> Result<Bytes, CallError> {
        self.link.request(service_id, method_id, payload, self.call_timeout).await
    }

    /// Call with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        service_id: u16,
        method_id: u16,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, CallError> {
        self.link.request(service_id, method_id, payload, timeout).await
    }

    /// Send a one-way message.
    pub async fn notify(&self, service_id: u16, method_id: u16, payload: Bytes) -> Result<(), CallError> {
        self.link.enqueue(Envelope::notify(service_id, method_id, payload)).await
    }

    /// Send a raw frame. Used to exercise protocol edge cases.
    pub async fn send_raw(&self, envelope: Envelope) -> Result<(), CallError> {
        self.link.enqueue(envelope).await
    }

    /// One heartbeat round trip.
    pub async fn heartbeat(&self) -> Result<HeartbeatAck, CallError> {
        heartbeat_round_trip(&self.link, self.call_timeout).await
    }

    /// Reason the server gave when it kicked this client.
    pub fn kicked(&self) -> Option<DisconnectReason> {
        *self.link.kicked.lock()
    }

    /// Whether the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.link.closed.is_cancelled()
    }

    /// Resolves once the connection is gone.
    pub async fn closed(&self) {
        self.link.closed.cancelled().await;
    }

    /// Outstanding calls.
    pub fn pending_calls(&self) -> usize {
        self.link.pending.len()
    }

    /// Close the connection and wait for the background tasks.
    pub async fn close(mut self) {
        self.link.shut();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.link.shut();
    }
}

fn handshake_reply(reply: &Envelope) -> Result<gleam_wire::control::HelloAck, ClientError> {
    if reply.service_id != SYSTEM_SERVICE_ID {
        return Err(ClientError::Protocol(format!("reply from service {}", reply.service_id)));
    }
    match Control::parse(reply) {
        Ok(Control::HelloAck(ack)) => Ok(ack),
        Ok(Control::Error(err)) => Err(ClientError::Rejected {
            code: err.code,
            message: err.message,
        }),
        Ok(Control::Kick(kick)) => Err(ClientError::Rejected {
            code: kick.reason.clone(),
            message: format!("kicked during handshake ({})", kick.reason),
        }),
        Ok(other) => Err(ClientError::Protocol(format!("{other:?}"))),
        Err(e) => Err(ClientError::Codec(e.into())),
    }
}

async fn heartbeat_round_trip(link: &ClientLink, timeout: Duration) -> Result<HeartbeatAck, CallError> {
    let sent_at_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    let (message_id, reply) = link.pending.register()?;
    let request = control::system_request(SystemMethod::Heartbeat, message_id, &Heartbeat { sent_at_ms });
    if let Err(e) = link.enqueue(request).await {
        link.pending.forget(message_id);
        return Err(e);
    }
    let payload = link.pending.wait(message_id, reply, timeout).await?;
    decode_message(&payload).map_err(|e| CallError::Remote {
        code: INVALID_PAYLOAD.to_string(),
        message: e.to_string(),
    })
}

async fn client_writer(mut sink: SplitSink<Transport, Envelope>, mut rx: mpsc::Receiver<Envelope>, link: Arc<ClientLink>) {
    let forward = async {
        while let Some(envelope) = rx.recv().await {
            sink.send(envelope).await?;
        }
        Ok::<(), gleam_wire::CodecError>(())
    };
    let failed = tokio::select! {
        () = link.closed.cancelled() => None,
        result = forward => result.err(),
    };
    if let Some(e) = failed {
        warn!(error = %e, "client write failed");
        link.shut();
        return;
    }
    let drain = async {
        while let Ok(envelope) = rx.try_recv() {
            sink.feed(envelope).await?;
        }
        sink.close().await
    };
    let _ = tokio::time::timeout(CLOSE_DRAIN, drain).await;
}

async fn client_reader(mut stream: SplitStream<Transport>, link: Arc<ClientLink>, router: Option<Arc<Router>>) {
    let resources = Arc::new(ResourcePools::empty());
    loop {
        let next = tokio::select! {
            () = link.closed.cancelled() => break,
            next = stream.next() => next,
        };
        let envelope = match next {
            None => {
                debug!("server closed the connection");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "malformed frame from server");
                break;
            }
            Some(Ok(envelope)) => envelope,
        };
        if envelope.is_response {
            let message_id = envelope.message_id;
            if !link.pending.complete(envelope) {
                debug!(message_id, "unmatched response dropped");
            }
            continue;
        }
        if envelope.service_id == SYSTEM_SERVICE_ID {
            if let Ok(Control::Kick(kick)) = Control::parse(&envelope) {
                info!(reason = %kick.reason, "kicked by server");
                *link.kicked.lock() = kick.disconnect_reason();
                break;
            }
            continue;
        }
        match &router {
            Some(router) => {
                let router = Arc::clone(router);
                let ctx = HandlerContext::new(
                    Arc::clone(&link) as Arc<dyn SessionHandle>,
                    Arc::clone(&resources),
                    envelope.message_id,
                );
                let link = Arc::clone(&link);
                drop(tokio::spawn(async move {
                    if let Some(response) = router.dispatch(&envelope, &ctx).await {
                        let _ = link.enqueue(response).await;
                    }
                }));
            }
            None if !envelope.is_one_way() => {
                let reply = control::error_response(&envelope, UNKNOWN_SERVICE, "client serves no methods");
                let _ = link.enqueue(reply).await;
            }
            None => {}
        }
    }
    link.shut();
}

async fn client_heartbeat(link: Arc<ClientLink>, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = link.closed.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = heartbeat_round_trip(&link, timeout).await {
                    debug!(error = %e, "heartbeat failed");
                }
            }
        }
    }
}
