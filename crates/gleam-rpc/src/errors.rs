//! RPC error codes and error types.

use gleam_pool::PoolError;
use gleam_wire::ErrorReply;

// ── Error code constants ────────────────────────────────────────────

/// No service registered under the requested id.
pub const UNKNOWN_SERVICE: &str = "UNKNOWN_SERVICE";
/// Service exists but has no such method.
pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
/// Handler exceeded its execution budget.
pub const TIMEOUT: &str = "TIMEOUT";
/// Request payload did not decode.
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
/// Unexpected internal error (including handler panics).
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Backend pool has no free connection and no room to wait.
pub const POOL_EXHAUSTED: &str = "POOL_EXHAUSTED";
/// Backend pool did not free a connection in time.
pub const ACQUIRE_TIMEOUT: &str = "ACQUIRE_TIMEOUT";
/// Backend is disabled or closed.
pub const NOT_AVAILABLE: &str = "NOT_AVAILABLE";
/// Backend operation failed (SQL error, cache failure).
pub const BACKEND_ERROR: &str = "BACKEND_ERROR";
/// Request names something that does not exist.
pub const NOT_FOUND: &str = "NOT_FOUND";

/// Error returned by handlers and synthesized by the router.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No service with this id.
    #[error("unknown service {service_id}")]
    UnknownService {
        /// Requested service.
        service_id: u16,
    },
    /// Service known, method not.
    #[error("unknown method {method_id} on service {service_id}")]
    UnknownMethod {
        /// Requested service.
        service_id: u16,
        /// Requested method.
        method_id: u16,
    },
    /// Handler ran past its budget.
    #[error("handler timed out after {budget_ms}ms")]
    Timeout {
        /// Configured budget.
        budget_ms: u64,
    },
    /// Payload could not be decoded.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Decoder detail.
        message: String,
    },
    /// Internal failure.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
    /// Backend failure surfaced from the pool layer.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Domain-specific error with an arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::UnknownService { .. } => UNKNOWN_SERVICE,
            Self::UnknownMethod { .. } => UNKNOWN_METHOD,
            Self::Timeout { .. } => TIMEOUT,
            Self::InvalidPayload { .. } => INVALID_PAYLOAD,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Pool(e) => match e {
                PoolError::Exhausted { .. } => POOL_EXHAUSTED,
                PoolError::AcquireTimeout { .. } => ACQUIRE_TIMEOUT,
                PoolError::Closed { .. } | PoolError::NotConfigured { .. } => NOT_AVAILABLE,
                PoolError::InvalidHandle | PoolError::Task(_) => INTERNAL_ERROR,
                PoolError::Init { .. }
                | PoolError::Connect(_)
                | PoolError::Sql(_)
                | PoolError::Cache(_) => BACKEND_ERROR,
            },
            Self::Custom { code, .. } => code,
        }
    }

    /// Whether the client may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Pool(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Wire payload for the error response.
    pub fn to_error_reply(&self) -> ErrorReply {
        ErrorReply {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

impl From<prost::DecodeError> for RpcError {
    fn from(e: prost::DecodeError) -> Self {
        Self::InvalidPayload {
            message: e.to_string(),
        }
    }
}

/// Building a router failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Two handlers for one key.
    #[error("handler already registered for ({service_id}, {method_id})")]
    Duplicate {
        /// Service id.
        service_id: u16,
        /// Method id.
        method_id: u16,
    },
    /// Service id reserved for gateway control traffic.
    #[error("service {service_id} is reserved")]
    ReservedService {
        /// Service id.
        service_id: u16,
    },
}

/// Outcome of a server-initiated call that did not produce a reply payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No reply within the timeout.
    #[error("call timed out")]
    Timeout,
    /// The session closed while the call was pending.
    #[error("call cancelled: session closed")]
    Cancelled,
    /// The peer answered with an error reply.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Peer's error code.
        code: String,
        /// Peer's message.
        message: String,
    },
    /// The request could not be queued.
    #[error("send failed: {0}")]
    Send(String),
}

impl From<ErrorReply> for CallError {
    fn from(reply: ErrorReply) -> Self {
        Self::Remote {
            code: reply.code,
            message: reply.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_codes() {
        assert_eq!(RpcError::UnknownService { service_id: 9 }.code(), UNKNOWN_SERVICE);
        assert_eq!(
            RpcError::UnknownMethod {
                service_id: 1,
                method_id: 9
            }
            .code(),
            UNKNOWN_METHOD
        );
        assert_eq!(RpcError::Timeout { budget_ms: 5 }.code(), TIMEOUT);
    }

    #[test]
    fn pool_errors_map_to_codes() {
        let exhausted = RpcError::from(PoolError::Exhausted { pool: "sql".into() });
        assert_eq!(exhausted.code(), POOL_EXHAUSTED);
        assert!(exhausted.is_retryable());

        let missing = RpcError::from(PoolError::NotConfigured { pool: "cache".into() });
        assert_eq!(missing.code(), NOT_AVAILABLE);
        assert!(!missing.is_retryable());

        let sql = RpcError::from(PoolError::Cache("down".into()));
        assert_eq!(sql.code(), BACKEND_ERROR);
    }

    #[test]
    fn error_reply_carries_code_and_message() {
        let reply = RpcError::InvalidPayload {
            message: "bad tag".into(),
        }
        .to_error_reply();
        assert_eq!(reply.code, INVALID_PAYLOAD);
        assert_eq!(reply.message, "invalid payload: bad tag");
    }

    #[test]
    fn custom_code_passes_through() {
        let err = RpcError::Custom {
            code: NOT_FOUND.into(),
            message: "no such key".into(),
        };
        assert_eq!(err.code(), NOT_FOUND);
        assert_eq!(err.to_string(), "no such key");
    }

    #[test]
    fn remote_call_error_from_reply() {
        let err = CallError::from(ErrorReply {
            code: "NOPE".into(),
            message: "denied".into(),
        });
        assert_eq!(err.to_string(), "remote error NOPE: denied");
    }
}
