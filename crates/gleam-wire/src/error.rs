//! Codec errors.

use thiserror::Error;

/// Why a frame was rejected. The offending connection is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedFrame {
    /// Length prefix exceeds the configured maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Length prefix is smaller than the fixed header.
    #[error("frame length {len} is shorter than the header")]
    TooShort {
        /// Declared length.
        len: usize,
    },
    /// Version byte is not one this codec speaks.
    #[error("unknown wire version {0}")]
    UnknownVersion(u8),
    /// Reserved flag bits were set.
    #[error("reserved flag bits set: {0:#010b}")]
    ReservedFlags(u8),
    /// `ERROR` flag without `RESPONSE`.
    #[error("error flag set on a request")]
    ErrorWithoutResponse,
    /// A system-service payload did not decode.
    #[error("invalid control message for method {method_id}: {reason}")]
    Control {
        /// System method id.
        method_id: u16,
        /// Decoder message.
        reason: String,
    },
}

/// Errors produced by [`EnvelopeCodec`](crate::EnvelopeCodec).
#[derive(Debug, Error)]
pub enum CodecError {
    /// Inbound bytes do not form a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),
    /// Outbound envelope does not fit within the frame limit.
    #[error("payload of {len} bytes exceeds frame limit {max}")]
    Oversize {
        /// Frame length the envelope would need.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Transport failure underneath the codec.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
