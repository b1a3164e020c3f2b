//! WebSocket close codes
//!
//! Gateway-specific close codes and the reconnect classification applied when the server
//! closes the connection.

use std::fmt;

/// Reported when the connection drops without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Gateway WebSocket close codes
///
/// These codes are sent by the server when closing a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding
    DecodeError = 4002,
    /// Sent payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token provided
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number for Resume
    InvalidSequence = 4007,
    /// Too many requests (rate limited)
    RateLimited = 4008,
    /// Session has timed out
    SessionTimedOut = 4009,
    /// Invalid shard configuration
    InvalidShard = 4010,
    /// Sharding is required
    ShardingRequired = 4011,
    /// Invalid/outdated API version
    InvalidApiVersion = 4012,
    /// Invalid intents bitmask
    InvalidIntents = 4013,
    /// Intent not enabled for the application
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if the client should reconnect after this close code
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        Self::should_reconnect_raw(self.as_u16())
    }

    /// Reconnect classification for any raw close code
    ///
    /// `UnknownError..=SessionTimedOut` is reconnect-eligible, except `AuthenticationFailed`.
    /// Everything outside the range (including plain WebSocket codes) is terminal.
    #[must_use]
    pub const fn should_reconnect_raw(code: u16) -> bool {
        code >= Self::UnknownError.as_u16()
            && code <= Self::SessionTimedOut.as_u16()
            && code != Self::AuthenticationFailed.as_u16()
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimedOut => "Session timed out",
            Self::InvalidShard => "Invalid shard configuration",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self, self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Close status reported by the transport when the server ends the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Raw close code
    pub code: u16,
    /// Close reason text, possibly empty
    pub reason: String,
}

impl CloseStatus {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The gateway close code, if this is one
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }

    /// A drop without a close frame, from a broken socket or a read error
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    /// Whether the client should reconnect after this closure
    ///
    /// An abnormal closure keeps the session; the server never rejected it.
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        self.code == ABNORMAL_CLOSURE || CloseCode::should_reconnect_raw(self.code)
    }
}

impl From<CloseCode> for CloseStatus {
    fn from(code: CloseCode) -> Self {
        Self::new(code.as_u16(), code.description())
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.close_code() {
            Some(code) => write!(f, "{code}"),
            None if self.reason.is_empty() => write!(f, "close code {}", self.code),
            None => write!(f, "close code {}: {}", self.code, self.reason),
        }
    }
}
