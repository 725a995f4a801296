//! Server-side error types.

use std::net::SocketAddr;

/// Why a frame could not be queued to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No live session with that id.
    #[error("session not found")]
    SessionNotFound,
    /// The write queue is at capacity.
    #[error("write queue full")]
    QueueFull,
    /// The session is closing and accepts no more frames.
    #[error("session closing")]
    SessionClosing,
}

/// Startup failures of the gateway server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Some other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Server was already started.
    #[error("server already running on {0}")]
    AlreadyRunning(SocketAddr),
}

/// Client-side connection failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect or socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Framing failure on the client's own connection.
    #[error(transparent)]
    Codec(#[from] gleam_wire::CodecError),
    /// No `HelloAck` within the handshake timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The server refused the handshake.
    #[error("handshake rejected: {code}: {message}")]
    Rejected {
        /// Server error code.
        code: String,
        /// Server message.
        message: String,
    },
    /// The server answered with something other than `HelloAck`.
    #[error("unexpected handshake reply: {0}")]
    Protocol(String),
}
