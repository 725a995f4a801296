//! System-service (service `0`) control messages.
//!
//! Every control payload is a protobuf message. A control frame whose
//! payload does not decode is a [`MalformedFrame`], unlike application
//! payloads, which only fail their own request.

use bytes::Bytes;
use prost::Message;

use gleam_core::DisconnectReason;
use gleam_core::constants::SYSTEM_SERVICE_ID;

use crate::envelope::Envelope;
use crate::error::MalformedFrame;

/// Handshake request; must be the first frame on a connection.
#[derive(Clone, PartialEq, Message)]
pub struct Hello {
    /// Identity to bind (account, peer server name, ...).
    #[prost(string, tag = "1")]
    pub identity: String,
    /// Free-form client version string.
    #[prost(string, tag = "2")]
    pub client_version: String,
    /// Optional credential checked by the authenticator.
    #[prost(string, tag = "3")]
    pub token: String,
}

/// Handshake acceptance.
#[derive(Clone, PartialEq, Message)]
pub struct HelloAck {
    /// Session id assigned by the gateway.
    #[prost(string, tag = "1")]
    pub session_id: String,
    /// Gateway version.
    #[prost(string, tag = "2")]
    pub server_version: String,
    /// How often the client should send `Heartbeat`.
    #[prost(uint64, tag = "3")]
    pub heartbeat_interval_ms: u64,
}

/// Keep-alive probe from the client.
#[derive(Clone, PartialEq, Message)]
pub struct Heartbeat {
    /// Client clock at send time (echoed back).
    #[prost(uint64, tag = "1")]
    pub sent_at_ms: u64,
}

/// Keep-alive answer.
#[derive(Clone, PartialEq, Message)]
pub struct HeartbeatAck {
    /// Echo of [`Heartbeat::sent_at_ms`].
    #[prost(uint64, tag = "1")]
    pub sent_at_ms: u64,
    /// Gateway clock when answering.
    #[prost(uint64, tag = "2")]
    pub server_time_ms: u64,
}

/// Payload of every error response (any service).
#[derive(Clone, PartialEq, Message)]
pub struct ErrorReply {
    /// Stable error code (`UNKNOWN_SERVICE`, `TIMEOUT`, ...).
    #[prost(string, tag = "1")]
    pub code: String,
    /// Human-readable detail.
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Server-initiated disconnect notice, sent just before closing.
#[derive(Clone, PartialEq, Message)]
pub struct Kick {
    /// [`DisconnectReason::code`].
    #[prost(uint32, tag = "1")]
    pub reason_code: u32,
    /// Reason label.
    #[prost(string, tag = "2")]
    pub reason: String,
}

impl Kick {
    /// Decoded reason, if the code is known.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        DisconnectReason::from_code(self.reason_code)
    }
}

/// Method ids of the system service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum SystemMethod {
    /// `Hello` / `HelloAck`.
    Hello = 1,
    /// `Heartbeat` / `HeartbeatAck`.
    Heartbeat = 2,
    /// `Kick` (one-way).
    Kick = 3,
}

impl SystemMethod {
    /// Wire method id.
    pub fn id(self) -> u16 {
        self as u16
    }
}

/// A decoded system-service frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    /// Handshake request.
    Hello(Hello),
    /// Handshake acceptance.
    HelloAck(HelloAck),
    /// Keep-alive probe.
    Heartbeat(Heartbeat),
    /// Keep-alive answer.
    HeartbeatAck(HeartbeatAck),
    /// Disconnect notice.
    Kick(Kick),
    /// Error response to a control request.
    Error(ErrorReply),
}

impl Control {
    /// Decode a system-service envelope.
    pub fn parse(envelope: &Envelope) -> Result<Self, MalformedFrame> {
        let method_id = envelope.method_id;
        let payload = &envelope.payload;
        if envelope.is_error {
            return decode_control(method_id, payload).map(Self::Error);
        }
        let hello = SystemMethod::Hello.id();
        let heartbeat = SystemMethod::Heartbeat.id();
        let kick = SystemMethod::Kick.id();
        match (method_id, envelope.is_response) {
            (m, false) if m == hello => decode_control(m, payload).map(Self::Hello),
            (m, true) if m == hello => decode_control(m, payload).map(Self::HelloAck),
            (m, false) if m == heartbeat => decode_control(m, payload).map(Self::Heartbeat),
            (m, true) if m == heartbeat => decode_control(m, payload).map(Self::HeartbeatAck),
            (m, false) if m == kick => decode_control(m, payload).map(Self::Kick),
            _ => Err(MalformedFrame::Control {
                method_id,
                reason: "unknown system method".to_string(),
            }),
        }
    }
}

fn decode_control<M: Message + Default>(method_id: u16, payload: &Bytes) -> Result<M, MalformedFrame> {
    decode_message(payload).map_err(|e| MalformedFrame::Control {
        method_id,
        reason: e.to_string(),
    })
}

/// Encode a protobuf message into a payload.
pub fn encode_message<M: Message>(msg: &M) -> Bytes {
    Bytes::from(msg.encode_to_vec())
}

/// Decode a protobuf payload.
pub fn decode_message<M: Message + Default>(payload: &Bytes) -> Result<M, prost::DecodeError> {
    M::decode(payload.clone())
}

/// A system-service request carrying `msg`.
pub fn system_request<M: Message>(method: SystemMethod, message_id: u32, msg: &M) -> Envelope {
    Envelope::request(message_id, SYSTEM_SERVICE_ID, method.id(), encode_message(msg))
}

/// The `Kick` notice for `reason`.
pub fn kick(reason: DisconnectReason) -> Envelope {
    let msg = Kick {
        reason_code: reason.code(),
        reason: reason.as_str().to_string(),
    };
    Envelope::notify(SYSTEM_SERVICE_ID, SystemMethod::Kick.id(), encode_message(&msg))
}

/// An error response to `request` with the given code and detail.
pub fn error_response(request: &Envelope, code: &str, message: impl Into<String>) -> Envelope {
    let reply = ErrorReply {
        code: code.to_string(),
        message: message.into(),
    };
    request.error_reply(encode_message(&reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn hello_parses_as_request() {
        let hello = Hello {
            identity: "player:1".into(),
            client_version: "test".into(),
            token: String::new(),
        };
        let env = system_request(SystemMethod::Hello, 1, &hello);
        assert_eq!(Control::parse(&env).unwrap(), Control::Hello(hello));
    }

    #[test]
    fn hello_reply_parses_as_ack() {
        let req = system_request(SystemMethod::Hello, 5, &Hello::default());
        let ack = HelloAck {
            session_id: "s".into(),
            server_version: "0.1.0".into(),
            heartbeat_interval_ms: 10_000,
        };
        let resp = req.reply(encode_message(&ack));
        assert_eq!(Control::parse(&resp).unwrap(), Control::HelloAck(ack));
    }

    #[test]
    fn kick_carries_reason() {
        let env = kick(DisconnectReason::SameIdentity);
        assert!(env.is_one_way());
        let Control::Kick(k) = Control::parse(&env).unwrap() else {
            panic!("expected kick");
        };
        assert_eq!(k.disconnect_reason(), Some(DisconnectReason::SameIdentity));
        assert_eq!(k.reason, "same_identity");
    }

    #[test]
    fn error_response_round_trip() {
        let req = system_request(SystemMethod::Heartbeat, 3, &Heartbeat { sent_at_ms: 1 });
        let resp = error_response(&req, "AUTH_FAIL", "nope");
        assert!(resp.is_error && resp.is_response);
        assert_matches!(Control::parse(&resp), Ok(Control::Error(e)) if e.code == "AUTH_FAIL");
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let env = Envelope::request(1, SYSTEM_SERVICE_ID, SystemMethod::Hello.id(), Bytes::from_static(&[0xFF, 0xFF, 0xFF]));
        assert_matches!(Control::parse(&env), Err(MalformedFrame::Control { method_id: 1, .. }));
    }

    #[test]
    fn unknown_method_is_malformed() {
        let env = Envelope::request(1, SYSTEM_SERVICE_ID, 99, Bytes::new());
        assert_matches!(Control::parse(&env), Err(MalformedFrame::Control { method_id: 99, .. }));
    }
}
