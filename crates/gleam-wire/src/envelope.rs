//! The message envelope: routing key, correlation id, and opaque payload.

use bytes::Bytes;

use gleam_core::constants::ONE_WAY_MESSAGE_ID;

/// Flag bits carried in the envelope header.
pub mod flags {
    /// Set on every response frame.
    pub const RESPONSE: u8 = 0b0000_0001;
    /// Set on a response whose payload is an `ErrorReply`.
    pub const ERROR: u8 = 0b0000_0010;
    /// Bits that must be zero.
    pub const RESERVED: u8 = !(RESPONSE | ERROR);
}

/// One framed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation id. `0` on a request marks a one-way notification.
    pub message_id: u32,
    /// Target service.
    pub service_id: u16,
    /// Method within the service.
    pub method_id: u16,
    /// Encoded message body.
    pub payload: Bytes,
    /// Whether this answers an earlier request with the same `message_id`.
    pub is_response: bool,
    /// Whether `payload` is an `ErrorReply` (responses only).
    pub is_error: bool,
}

impl Envelope {
    /// A request expecting a response.
    pub fn request(message_id: u32, service_id: u16, method_id: u16, payload: Bytes) -> Self {
        Self {
            message_id,
            service_id,
            method_id,
            payload,
            is_response: false,
            is_error: false,
        }
    }

    /// A one-way message; the receiver never answers it.
    pub fn notify(service_id: u16, method_id: u16, payload: Bytes) -> Self {
        Self::request(ONE_WAY_MESSAGE_ID, service_id, method_id, payload)
    }

    /// A successful response to `self`.
    #[must_use]
    pub fn reply(&self, payload: Bytes) -> Self {
        Self {
            message_id: self.message_id,
            service_id: self.service_id,
            method_id: self.method_id,
            payload,
            is_response: true,
            is_error: false,
        }
    }

    /// An error response to `self`; `payload` is an encoded `ErrorReply`.
    #[must_use]
    pub fn error_reply(&self, payload: Bytes) -> Self {
        Self {
            is_error: true,
            ..self.reply(payload)
        }
    }

    /// Whether this is a request that expects no response.
    pub fn is_one_way(&self) -> bool {
        !self.is_response && self.message_id == ONE_WAY_MESSAGE_ID
    }

    /// Header flag byte for this envelope.
    pub fn flags(&self) -> u8 {
        let mut f = 0;
        if self.is_response {
            f |= flags::RESPONSE;
        }
        if self.is_error {
            f |= flags::ERROR;
        }
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_routing() {
        let req = Envelope::request(9, 1, 2, Bytes::from_static(b"q"));
        let resp = req.reply(Bytes::from_static(b"a"));
        assert_eq!(resp.message_id, 9);
        assert_eq!((resp.service_id, resp.method_id), (1, 2));
        assert!(resp.is_response);
        assert!(!resp.is_error);
        assert_eq!(resp.flags(), flags::RESPONSE);
    }

    #[test]
    fn error_reply_sets_both_flags() {
        let req = Envelope::request(3, 1, 1, Bytes::new());
        let err = req.error_reply(Bytes::new());
        assert_eq!(err.flags(), flags::RESPONSE | flags::ERROR);
    }

    #[test]
    fn notify_is_one_way() {
        let n = Envelope::notify(0, 3, Bytes::new());
        assert!(n.is_one_way());
        assert!(!Envelope::request(1, 0, 3, Bytes::new()).is_one_way());
    }

    #[test]
    fn reserved_mask() {
        assert_eq!(flags::RESERVED & flags::RESPONSE, 0);
        assert_eq!(flags::RESERVED & flags::ERROR, 0);
        assert_eq!(flags::RESERVED | flags::RESPONSE | flags::ERROR, 0xFF);
    }
}
