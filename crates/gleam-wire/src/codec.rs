//! Frame encoding and resumable decoding.
//!
//! Frame layout (big-endian):
//!
//! ```text
//! u32 length      bytes that follow the prefix
//! u8  version     WIRE_VERSION
//! u8  flags       bit0 RESPONSE, bit1 ERROR, others reserved
//! u32 message_id
//! u16 service_id
//! u16 method_id
//! ..  payload     length - FRAME_HEADER_LEN bytes
//! ```
//!
//! Header fields are validated as soon as they are buffered, so an
//! oversized or corrupt frame is rejected before its payload arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use gleam_core::constants::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};

use crate::envelope::{Envelope, flags};
use crate::error::{CodecError, MalformedFrame};

/// Protocol version written into every frame.
pub const WIRE_VERSION: u8 = 1;

const PREFIX_LEN: usize = 4;

/// Result of a non-consuming decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A whole frame was present.
    Complete {
        /// The decoded envelope.
        envelope: Envelope,
        /// Bytes the frame occupied (prefix included).
        consumed: usize,
    },
    /// Buffer holds a valid but incomplete frame.
    NeedMoreData,
    /// Buffer cannot start a valid frame.
    Malformed(MalformedFrame),
}

struct Header {
    len: usize,
    flags: u8,
    message_id: u32,
    service_id: u16,
    method_id: u16,
}

/// Validate whatever header bytes are present.
///
/// `Ok(None)` means the prefix or header is not fully buffered yet.
fn parse_header(buf: &[u8], max_frame_size: usize) -> Result<Option<Header>, MalformedFrame> {
    let Some(prefix) = buf.get(..PREFIX_LEN) else {
        return Ok(None);
    };
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if len > max_frame_size {
        return Err(MalformedFrame::TooLarge {
            len,
            max: max_frame_size,
        });
    }
    if len < FRAME_HEADER_LEN {
        return Err(MalformedFrame::TooShort { len });
    }
    let Some(mut header) = buf.get(PREFIX_LEN..PREFIX_LEN + FRAME_HEADER_LEN) else {
        return Ok(None);
    };

    let version = header.get_u8();
    if version != WIRE_VERSION {
        return Err(MalformedFrame::UnknownVersion(version));
    }
    let frame_flags = header.get_u8();
    if frame_flags & flags::RESERVED != 0 {
        return Err(MalformedFrame::ReservedFlags(frame_flags));
    }
    if frame_flags & flags::ERROR != 0 && frame_flags & flags::RESPONSE == 0 {
        return Err(MalformedFrame::ErrorWithoutResponse);
    }

    Ok(Some(Header {
        len,
        flags: frame_flags,
        message_id: header.get_u32(),
        service_id: header.get_u16(),
        method_id: header.get_u16(),
    }))
}

impl Header {
    fn into_envelope(self, payload: Bytes) -> Envelope {
        Envelope {
            message_id: self.message_id,
            service_id: self.service_id,
            method_id: self.method_id,
            payload,
            is_response: self.flags & flags::RESPONSE != 0,
            is_error: self.flags & flags::ERROR != 0,
        }
    }
}

/// Try to decode one frame from the front of `buf` without consuming it.
pub fn decode(buf: &[u8], max_frame_size: usize) -> DecodeOutcome {
    match parse_header(buf, max_frame_size) {
        Err(malformed) => DecodeOutcome::Malformed(malformed),
        Ok(None) => DecodeOutcome::NeedMoreData,
        Ok(Some(header)) => {
            let total = PREFIX_LEN + header.len;
            match buf.get(PREFIX_LEN + FRAME_HEADER_LEN..total) {
                None => DecodeOutcome::NeedMoreData,
                Some(payload) => DecodeOutcome::Complete {
                    envelope: header.into_envelope(Bytes::copy_from_slice(payload)),
                    consumed: total,
                },
            }
        }
    }
}

/// Append the frame for `envelope` to `dst`. No size limit is applied.
pub fn encode(envelope: &Envelope, dst: &mut BytesMut) {
    let len = FRAME_HEADER_LEN + envelope.payload.len();
    dst.reserve(PREFIX_LEN + len);
    dst.put_u32(len as u32);
    dst.put_u8(WIRE_VERSION);
    dst.put_u8(envelope.flags());
    dst.put_u32(envelope.message_id);
    dst.put_u16(envelope.service_id);
    dst.put_u16(envelope.method_id);
    dst.extend_from_slice(&envelope.payload);
}

/// Encode `envelope` into a fresh buffer.
pub fn encode_to_bytes(envelope: &Envelope) -> Bytes {
    let mut buf = BytesMut::new();
    encode(envelope, &mut buf);
    buf.freeze()
}

/// `tokio_util` codec for [`Envelope`] frames with a length limit.
#[derive(Clone, Copy, Debug)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    /// Codec rejecting frames whose length prefix exceeds `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        let Some(header) = parse_header(src, self.max_frame_size)? else {
            return Ok(None);
        };
        let total = PREFIX_LEN + header.len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(total);
        frame.advance(PREFIX_LEN + FRAME_HEADER_LEN);
        Ok(Some(header.into_envelope(frame.freeze())))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = FRAME_HEADER_LEN + item.payload.len();
        if len > self.max_frame_size {
            return Err(CodecError::Oversize {
                len,
                max: self.max_frame_size,
            });
        }
        encode(&item, dst);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::{SinkExt, StreamExt};
    use proptest::prelude::*;
    use tokio_util::codec::Framed;

    fn envelope_strategy() -> impl Strategy<Value = Envelope> {
        (
            any::<u32>(),
            any::<u16>(),
            any::<u16>(),
            proptest::collection::vec(any::<u8>(), 0..256),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(message_id, service_id, method_id, payload, resp, err)| Envelope {
                message_id,
                service_id,
                method_id,
                payload: Bytes::from(payload),
                is_response: resp,
                is_error: resp && err,
            })
    }

    fn raw_frame(len: u32, version: u8, frame_flags: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(version);
        buf.push(frame_flags);
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(env in envelope_strategy()) {
            let bytes = encode_to_bytes(&env);
            let outcome = decode(&bytes, DEFAULT_MAX_FRAME_SIZE);
            prop_assert_eq!(outcome, DecodeOutcome::Complete { envelope: env, consumed: bytes.len() });
        }

        #[test]
        fn arbitrary_split_points_decode(
            envs in proptest::collection::vec(envelope_strategy(), 1..6),
            cuts in proptest::collection::vec(1usize..64, 0..32),
        ) {
            let mut wire = BytesMut::new();
            for env in &envs {
                encode(env, &mut wire);
            }
            let wire = wire.freeze();

            let mut codec = EnvelopeCodec::default();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut pos = 0;
            let mut cuts = cuts.into_iter();
            while pos < wire.len() {
                let step = cuts.next().unwrap_or(wire.len());
                let end = (pos + step).min(wire.len());
                buf.extend_from_slice(&wire[pos..end]);
                pos = end;
                while let Some(env) = codec.decode(&mut buf).unwrap() {
                    decoded.push(env);
                }
            }
            prop_assert!(buf.is_empty());
            prop_assert_eq!(decoded, envs);
        }
    }

    #[test]
    fn partial_prefix_needs_more() {
        assert_eq!(decode(&[0, 0], 1024), DecodeOutcome::NeedMoreData);
        let full = encode_to_bytes(&Envelope::request(1, 2, 3, Bytes::from_static(b"abc")));
        assert_eq!(decode(&full[..full.len() - 1], 1024), DecodeOutcome::NeedMoreData);
    }

    #[test]
    fn decoder_consumes_nothing_until_complete() {
        let full = encode_to_bytes(&Envelope::request(1, 2, 3, Bytes::from_static(b"abcdef")));
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::from(&full[..PREFIX_LEN + FRAME_HEADER_LEN + 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), PREFIX_LEN + FRAME_HEADER_LEN + 2);
    }

    #[test]
    fn oversize_prefix_rejected_before_payload() {
        let frame = raw_frame(2048, WIRE_VERSION, 0);
        assert_eq!(
            decode(&frame[..PREFIX_LEN], 1024),
            DecodeOutcome::Malformed(MalformedFrame::TooLarge { len: 2048, max: 1024 })
        );
    }

    #[test]
    fn short_length_rejected() {
        let frame = raw_frame(3, WIRE_VERSION, 0);
        assert_eq!(
            decode(&frame, 1024),
            DecodeOutcome::Malformed(MalformedFrame::TooShort { len: 3 })
        );
    }

    #[test]
    fn unknown_version_rejected() {
        let frame = raw_frame(FRAME_HEADER_LEN as u32, 9, 0);
        assert_eq!(
            decode(&frame, 1024),
            DecodeOutcome::Malformed(MalformedFrame::UnknownVersion(9))
        );
    }

    #[test]
    fn reserved_flags_rejected() {
        let frame = raw_frame(FRAME_HEADER_LEN as u32, WIRE_VERSION, 0b1000_0001);
        assert_eq!(
            decode(&frame, 1024),
            DecodeOutcome::Malformed(MalformedFrame::ReservedFlags(0b1000_0001))
        );
    }

    #[test]
    fn error_without_response_rejected() {
        let frame = raw_frame(FRAME_HEADER_LEN as u32, WIRE_VERSION, flags::ERROR);
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::from(&frame[..]);
        assert_matches!(
            codec.decode(&mut buf),
            Err(CodecError::Malformed(MalformedFrame::ErrorWithoutResponse))
        );
    }

    #[test]
    fn empty_payload_frame() {
        let frame = raw_frame(FRAME_HEADER_LEN as u32, WIRE_VERSION, flags::RESPONSE);
        let DecodeOutcome::Complete { envelope, consumed } = decode(&frame, 1024) else {
            panic!("expected complete frame");
        };
        assert_eq!(consumed, frame.len());
        assert!(envelope.payload.is_empty());
        assert!(envelope.is_response);
        assert_eq!(envelope.message_id, 7);
    }

    #[test]
    fn encoder_rejects_oversize() {
        let mut codec = EnvelopeCodec::new(16);
        let env = Envelope::request(1, 1, 1, Bytes::from(vec![0u8; 7]));
        let mut dst = BytesMut::new();
        assert_matches!(
            codec.encode(env, &mut dst),
            Err(CodecError::Oversize { len: 17, max: 16 })
        );
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn framed_duplex_exchange() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = Framed::new(a, EnvelopeCodec::default());
        let mut right = Framed::new(b, EnvelopeCodec::default());

        let req = Envelope::request(42, 1, 2, Bytes::from(vec![7u8; 300]));
        left.send(req.clone()).await.unwrap();
        let got = right.next().await.unwrap().unwrap();
        assert_eq!(got, req);

        right.send(got.reply(Bytes::from_static(b"ok"))).await.unwrap();
        let resp = left.next().await.unwrap().unwrap();
        assert!(resp.is_response);
        assert_eq!(resp.payload, Bytes::from_static(b"ok"));
    }
}
