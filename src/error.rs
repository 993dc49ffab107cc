//! Error types for the connection engine.

use thiserror::Error;

use crate::types::DisconnectReason;

/// Errors surfaced by the connection engine.
///
/// Waiters registered with the correlator receive a clone of the same error
/// when the socket tears down, so every variant is cheaply cloneable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WaError {
    /// A per-request deadline or `pending_request_timeout` elapsed.
    #[error("request timed out")]
    Timeout,

    /// The connection is closed; `code` is an HTTP-like status.
    #[error("connection closed (code {code})")]
    Closed { code: u16 },

    /// The server invalidated the session mid-request (status 599).
    #[error("server invalidated the session")]
    BadSession,

    /// The stored credentials were rejected.
    #[error("credentials rejected by server")]
    InvalidSession,

    /// Another client took over this session.
    #[error("connection replaced by another client")]
    Replaced,

    /// The caller closed the connection.
    #[error("connection closed by caller")]
    Intentional,

    /// The server replied with a non-2xx status to an `expect_2xx` query.
    #[error("server returned {status} {status_text} for {query}")]
    ServerError {
        status: u16,
        status_text: String,
        query: String,
    },

    /// HMAC verification of an inbound binary frame failed.
    #[error("frame hmac mismatch")]
    BadMac,

    /// CBC unpadding of an inbound binary frame failed.
    #[error("bad frame padding")]
    BadPadding,

    /// A waiter is already registered under this tag.
    #[error("duplicate pending tag {0}")]
    DuplicateTag(String),

    /// The operation needs an open socket.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a connection is already up.
    #[error("already connected")]
    AlreadyConnected,

    /// Binary frames need `enc_key`/`mac_key` from a loaded `AuthInfo`.
    #[error("no session credentials loaded")]
    NoSession,

    /// Transport-level failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// An inbound or outbound frame could not be parsed or built.
    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("json error: {0}")]
    Json(String),

    #[error("auth bootstrap error: {0}")]
    Auth(String),

    #[error("http error: {0}")]
    Http(String),
}

impl WaError {
    /// Error delivered to pending waiters when the socket closes for `reason`.
    pub fn from_disconnect(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::Intentional => WaError::Intentional,
            DisconnectReason::TimedOut => WaError::Timeout,
            DisconnectReason::Replaced => WaError::Replaced,
            DisconnectReason::InvalidSession => WaError::InvalidSession,
            DisconnectReason::BadSession => WaError::BadSession,
            DisconnectReason::Close => WaError::Closed { code: 1006 },
            DisconnectReason::Error => WaError::Socket("websocket error".into()),
        }
    }
}

impl From<serde_json::Error> for WaError {
    fn from(e: serde_json::Error) -> Self {
        WaError::Json(e.to_string())
    }
}

/// Textual names for the HTTP-like statuses the server uses.
pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "ok",
        400 => "bad request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not found",
        409 => "conflict",
        419 => "resource gone",
        428 => "connection required",
        429 => "too many requests",
        500 => "internal server error",
        599 => "invalid session",
        _ => "unknown",
    }
}
