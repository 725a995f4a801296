//! # gleam-wire
//!
//! The Gleam wire format: a length-prefixed binary envelope carrying a
//! correlation id, a `(service_id, method_id)` routing key, and a protobuf
//! payload.
//!
//! - [`Envelope`]: the decoded frame
//! - [`EnvelopeCodec`]: `tokio_util` codec with a frame-size limit
//! - [`decode`] / [`encode`]: buffer-level functions for non-`Framed` callers
//! - [`control`]: handshake, heartbeat, kick, and error-reply messages

#![deny(unsafe_code)]

pub mod codec;
pub mod control;
pub mod envelope;
pub mod error;

pub use codec::{DecodeOutcome, EnvelopeCodec, WIRE_VERSION, decode, encode, encode_to_bytes};
pub use control::{Control, ErrorReply, SystemMethod, decode_message, encode_message};
pub use envelope::{Envelope, flags};
pub use error::{CodecError, MalformedFrame};
