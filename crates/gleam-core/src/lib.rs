//! # gleam-core
//!
//! Foundation types shared by every Gleam gateway crate:
//!
//! - **Branded IDs**: [`SessionId`] and [`Identity`] newtypes for type safety
//! - **Disconnect reasons**: [`DisconnectReason`] codes carried in `Kick` frames
//! - **Constants**: reserved service ids and protocol defaults
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod constants;
pub mod disconnect;
pub mod ids;
pub mod logging;

pub use disconnect::DisconnectReason;
pub use ids::{Identity, SessionId};
