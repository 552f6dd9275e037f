//! Error types for the REST and realtime layers.
//!
//! The two taxonomies are deliberately separate: `RestError` describes the
//! HTTP gateway path, `RpcError` the realtime session. They are never merged.

use thiserror::Error;

/// Errors produced by the REST gateway, transport, and token authority.
///
/// `Clone` so a single coalesced refresh failure can be delivered to every
/// waiter unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    /// The endpoint descriptor could not be turned into a request
    #[error("invalid request")]
    InvalidRequest,

    /// The server rejected the credentials (HTTP 401)
    #[error("unauthorized")]
    Unauthorized,

    /// The server refused the operation (HTTP 403)
    #[error("forbidden")]
    Forbidden,

    /// The response body could not be decoded
    #[error("invalid response")]
    InvalidResponse,

    /// Any other transport or server failure
    #[error("unknown error")]
    Unknown,
}

/// Result type for REST operations
pub type RestResult<T> = std::result::Result<T, RestError>;

/// Reply messages the realtime backend uses to signal a lapsed login.
///
/// Detection only; forced logout is left to the caller.
pub const NOT_LOGGED_IN_SIGNALS: [&str; 2] = [
    "User is not logged in",
    "You must be logged in to perform this action!",
];

/// Errors produced by the realtime RPC session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// A reply payload did not decode into the requested type
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The socket endpoint rejected the session with an HTTP status
    #[error("http error: {0}")]
    Http(u16),

    /// The handshake completed without a transport session id
    #[error("missing transport session id")]
    MissingTransportSessionId,

    /// No session exists or it is not connected
    #[error("not connected")]
    NotConnected,

    /// The reply carried neither keyed nor positional results
    #[error("no results received")]
    NoResultsReceived,

    /// The backend answered the call with an application-level error
    #[error("request error: {0}")]
    Request(String),
}

impl RpcError {
    /// True when an application-level error reply matches one of the known
    /// "not logged in" signals.
    pub fn indicates_logged_out(&self) -> bool {
        matches!(self, RpcError::Request(message) if NOT_LOGGED_IN_SIGNALS.contains(&message.as_str()))
    }
}

/// Result type for realtime RPC operations
pub type RpcResult<T> = std::result::Result<T, RpcError>;
