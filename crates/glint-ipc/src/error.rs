//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors produced by the socket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection is open.
    #[error("Socket not connected")]
    NotConnected,

    /// A connection is already open on this transport.
    #[error("Socket already connected")]
    AlreadyConnected,

    /// The connection closed before the response arrived.
    #[error("Connection closed before response to request {id}")]
    Disconnected { id: String },

    /// No response arrived within the request window.
    #[error("Request timeout: {id} got no response within {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// The request payload was not a JSON object.
    #[error("Invalid payload for '{kind}': expected a JSON object")]
    InvalidPayload { kind: String },

    /// The message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the error means the link itself is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Disconnected { .. } | Self::Io(_)
        )
    }
}
