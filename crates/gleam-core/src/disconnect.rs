//! Reasons a session is closed.
//!
//! The numeric codes travel to the peer inside a `Kick` control frame so the
//! client can tell a maintenance shutdown from a protocol violation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a connection was (or is being) closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Another connection bound the same identity.
    SameIdentity,
    /// The peer did not complete the handshake in time.
    AuthTimeout,
    /// No frame (heartbeat or otherwise) within the heartbeat timeout.
    HeartbeatTimeout,
    /// The handshake was rejected.
    AuthFail,
    /// A frame could not be decoded.
    DecodeError,
    /// The peer closed the connection (EOF or reset).
    Client,
    /// Gateway is shutting down.
    Shutdown,
    /// Closed by an operator or handler.
    Force,
    /// Write side failed or drained past its deadline.
    WriteError,
}

impl DisconnectReason {
    /// Stable numeric code sent on the wire.
    pub fn code(self) -> u32 {
        match self {
            Self::SameIdentity => 1,
            Self::AuthTimeout => 2,
            Self::HeartbeatTimeout => 3,
            Self::AuthFail => 4,
            Self::DecodeError => 5,
            Self::Client => 7,
            Self::Shutdown => 8,
            Self::Force => 10,
            Self::WriteError => 15,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::SameIdentity,
            2 => Self::AuthTimeout,
            3 => Self::HeartbeatTimeout,
            4 => Self::AuthFail,
            5 => Self::DecodeError,
            7 => Self::Client,
            8 => Self::Shutdown,
            10 => Self::Force,
            15 => Self::WriteError,
            _ => return None,
        })
    }

    /// Short label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SameIdentity => "same_identity",
            Self::AuthTimeout => "auth_timeout",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::AuthFail => "auth_fail",
            Self::DecodeError => "decode_error",
            Self::Client => "client",
            Self::Shutdown => "shutdown",
            Self::Force => "force",
            Self::WriteError => "write_error",
        }
    }

    /// Whether the peer should be told why (a `Kick` frame is worth sending).
    pub fn notifies_peer(self) -> bool {
        !matches!(self, Self::Client | Self::WriteError)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DisconnectReason; 9] = [
        DisconnectReason::SameIdentity,
        DisconnectReason::AuthTimeout,
        DisconnectReason::HeartbeatTimeout,
        DisconnectReason::AuthFail,
        DisconnectReason::DecodeError,
        DisconnectReason::Client,
        DisconnectReason::Shutdown,
        DisconnectReason::Force,
        DisconnectReason::WriteError,
    ];

    #[test]
    fn codes_round_trip() {
        for reason in ALL {
            assert_eq!(DisconnectReason::from_code(reason.code()), Some(reason));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(DisconnectReason::from_code(0), None);
        assert_eq!(DisconnectReason::from_code(999), None);
    }

    #[test]
    fn codes_are_unique() {
        let mut codes: Vec<u32> = ALL.iter().map(|r| r.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn client_close_does_not_notify() {
        assert!(!DisconnectReason::Client.notifies_peer());
        assert!(DisconnectReason::HeartbeatTimeout.notifies_peer());
    }

    #[test]
    fn display_matches_label() {
        assert_eq!(DisconnectReason::DecodeError.to_string(), "decode_error");
    }
}
