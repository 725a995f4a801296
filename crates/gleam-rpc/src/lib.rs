//! # gleam-rpc
//!
//! Request dispatch for the Gleam gateway.
//!
//! - [`Router`] / [`RouterBuilder`]: `(service_id, method_id)` handler registry
//! - [`HandlerContext`] / [`SessionHandle`]: what handlers see of a session
//! - [`PendingCalls`]: correlation of server-initiated calls with replies
//! - [`WorkerPool`]: bounded handler concurrency
//! - [`errors`]: wire error codes and error types

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod pending;
pub mod router;
pub mod workers;

#[cfg(test)]
mod test_helpers;

pub use context::{HandlerContext, SessionHandle};
pub use errors::{CallError, RegistrationError, RpcError};
pub use pending::{PendingCalls, ReplyReceiver};
pub use router::{FnHandler, MethodHandler, Route, Router, RouterBuilder, decode_payload, encode_reply, handler_fn};
pub use workers::{ConnectionLimiter, WorkerPermit, WorkerPool};
