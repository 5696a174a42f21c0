//! Client error taxonomy

use portside_protocol::ErrorObject;
use thiserror::Error;

/// Errors surfaced to callers of the client.
///
/// Transport failures (`NotConnected`, `ConnectionLost`) are never
/// silently retried at the request layer; retry policy belongs to the
/// caller or to the reconnect-driven resubscribe path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// A request was attempted while the connection was not up.
    #[error("not connected")]
    NotConnected,

    /// An in-flight request was invalidated by a disconnect.
    #[error("connection lost")]
    ConnectionLost,

    /// The caller-supplied deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// Application-level error reported by the server, surfaced verbatim.
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Malformed or unexpected frame content. The offending frame is
    /// dropped; the connection stays up.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client handle outlived its connection task.
    #[error("client closed")]
    Closed,
}

impl From<ErrorObject> for ClientError {
    fn from(err: ErrorObject) -> Self {
        ClientError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}
