//! Gateway error types

use crate::protocol::CloseStatus;
use gateway_common::ConfigError;
use thiserror::Error;

/// Gateway client error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The underlying connection failed to open, read, or write
    #[error("Transport error: {0}")]
    Transport(String),

    /// An outbound message could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// An inbound frame could not be decompressed or decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Fetching the gateway endpoint failed
    #[error("REST error: {0}")]
    Rest(String),

    /// The gateway URL could not be parsed
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server closed the connection
    #[error("Gateway closed: {0}")]
    Closed(CloseStatus),

    /// The operation was cancelled by a disconnect or reconnect
    #[error("Operation cancelled")]
    Cancelled,

    /// No handshake message arrived within the startup timeout
    #[error("Timed out waiting for the first gateway message")]
    StartupTimeout,

    /// The server stopped acknowledging heartbeats
    #[error("Heartbeat not acknowledged after {attempts} attempts")]
    HeartbeatUnacknowledged { attempts: u8 },

    /// The server sent something other than what the handshake requires
    #[error("Expected {expected}, received {received}")]
    UnexpectedPayload {
        expected: &'static str,
        received: String,
    },

    /// An outbound message was sent without an open connection
    #[error("Not connected")]
    NotConnected,

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GatewayError {
    /// Whether this error is a normal end of an event loop rather than a failure
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed(_))
    }

    /// The close status, if the server closed the connection
    #[must_use]
    pub const fn close_status(&self) -> Option<&CloseStatus> {
        match self {
            Self::Closed(status) => Some(status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Self::Transport(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Self::Decode(e.to_string())
        } else {
            Self::Encode(e.to_string())
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Rest(e.to_string())
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
