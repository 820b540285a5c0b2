//! Error types for ARI operations.
//!
//! All fallible operations in this crate return [`AriResult<T>`].  Errors are
//! classified on two axes:
//!
//! - **Connection errors** ([`AriError::is_connection_error`]): the socket
//!   is gone. The command transport reconnects on its own for the next
//!   request; the event stream must be reconnected by the caller.
//! - **Recoverable errors** ([`AriError::is_recoverable`]): the operation
//!   failed but retrying it is reasonable (e.g. timeout, rejected subscription).

use thiserror::Error;

/// Result type alias for ARI operations
pub type AriResult<T> = Result<T, AriError>;

/// Error returned by an application event handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by application event handlers
pub type HandlerResult = Result<(), HandlerError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AriError {
    /// IO error from underlying TCP operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Host name resolved to no usable address
    #[error("Could not resolve {host}")]
    Resolve { host: String },

    /// Event stream is not connected
    #[error("Not connected to Asterisk")]
    NotConnected,

    /// Connection closed by the remote side
    #[error("Connection closed by Asterisk")]
    ConnectionClosed,

    /// Event stream was shut down with `close()`
    #[error("Event stream closed")]
    Closed,

    /// No response within the configured timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed HTTP response
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    /// Invalid header line or value
    #[error("Invalid header format: {header}")]
    InvalidHeader { header: String },

    /// Buffer overflow - response too large
    #[error("Buffer overflow: message size {size} exceeds limit {limit}")]
    BufferOverflow { size: usize, limit: usize },

    /// Event payload lacks a required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// The finalizing subscription command was rejected
    #[error("Subscription failed: {status} {reason}")]
    SubscriptionFailed { status: u16, reason: String },

    /// The command transport task is no longer running
    #[error("Command transport is shut down")]
    TransportShutdown,
}

impl AriError {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn timeout(limit: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// `true` if retrying the same operation is reasonable.
    ///
    /// Recoverable: `Timeout`, `SubscriptionFailed`, `ConnectionClosed`, `Io`.
    /// Event payload and protocol errors are not; retrying yields the same result.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AriError::Timeout { .. }
                | AriError::SubscriptionFailed { .. }
                | AriError::ConnectionClosed
                | AriError::Io(_)
        )
    }

    /// `true` if the socket this error came from is dead.
    ///
    /// Matches: `Io`, `Resolve`, `NotConnected`, `ConnectionClosed`, `Closed`, `WebSocket`.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AriError::Io(_)
                | AriError::Resolve { .. }
                | AriError::NotConnected
                | AriError::ConnectionClosed
                | AriError::Closed
                | AriError::WebSocket(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AriError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AriError::WebSocket(Box::new(err))
    }
}
