//! Connection lifecycle state

use std::fmt;

/// Where the client is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection open
    #[default]
    Disconnected,
    /// Resolving the gateway URL and opening the connection
    Connecting,
    /// Waiting for Hello, then for `READY` after Identify
    Handshaking,
    /// Resume sent, replaying missed events until `RESUMED`
    Resuming,
    /// Session established, processing events
    Connected,
    /// Tearing the connection down
    Closing,
}

impl ConnectionState {
    /// Whether a connection is open or being opened
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Resuming | Self::Connected
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
