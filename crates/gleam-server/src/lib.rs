//! # gleam-server
//!
//! The Gleam gateway runtime: persistent TCP connections carrying framed
//! RPC envelopes, bound to authenticated sessions.
//!
//! - [`ConnectionManager`]: accept loop, handshake, per-connection read/write tasks
//! - [`Session`] / [`SessionRegistry`]: live sessions indexed by id and identity
//! - [`GatewayServer`]: wires the manager, heartbeat sweeper, pools, and the
//!   HTTP `/health` + `/metrics` side-port
//! - [`GatewayClient`]: the peer side of the protocol
//! - [`services`]: built-in `db`, `cache`, and `session` services

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod health;
pub mod heartbeat;
pub mod listener;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod services;
pub mod session;
pub mod shutdown;

pub use client::{ClientOptions, GatewayClient};
pub use config::ConnectionConfig;
pub use errors::{ClientError, SendError, ServerError};
pub use listener::ConnectionListener;
pub use manager::{AllowAll, Authenticator, ConnectionManager, SharedToken};
pub use registry::{BroadcastReport, SessionRegistry};
pub use server::{BoundAddrs, GatewayServer};
pub use session::{SendPolicy, Session, SessionInfo, SessionState};
pub use shutdown::ShutdownCoordinator;
