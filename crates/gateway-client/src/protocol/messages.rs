//! Gateway message format
//!
//! Defines the envelope shared by every message crossing the connection.

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message format
///
/// `t` and `s` are only populated on op=0 Dispatch messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event name (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(default)]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn control(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d,
        }
    }

    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::control(op, Some(serde_json::to_value(payload)?)))
    }

    // === Client Messages ===

    /// Create a Heartbeat message (op=1) carrying the last received sequence
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::control(
            OpCode::Heartbeat,
            Some(last_sequence.map_or(Value::Null, |s| Value::Number(s.into()))),
        )
    }

    /// Create an Identify message (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Identify, payload)
    }

    /// Create a Resume message (op=4)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Resume, payload)
    }

    /// Create a Presence Update message (op=3)
    pub fn presence_update(payload: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::PresenceUpdate, payload)
    }

    /// Create a Request Guild Members message (op=8)
    pub fn request_guild_members(
        payload: &RequestGuildMembersPayload,
    ) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::RequestGuildMembers, payload)
    }

    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    #[must_use]
    pub fn dispatch(event_name: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_name.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Create a Hello message (op=10)
    #[must_use]
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::control(
            OpCode::Hello,
            Some(serde_json::json!({ "heartbeat_interval": heartbeat_interval_ms })),
        )
    }

    /// Create a Heartbeat ACK message (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::control(OpCode::HeartbeatAck, None)
    }

    /// Create a Reconnect message (op=5)
    #[must_use]
    pub fn reconnect() -> Self {
        Self::control(OpCode::Reconnect, None)
    }

    /// Create an Invalid Session message (op=7)
    ///
    /// `resumable` indicates if the session can be resumed.
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::control(OpCode::InvalidSession, Some(Value::Bool(resumable)))
    }

    // === Parsing Server Messages ===

    /// Try to parse as a Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| HelloPayload::deserialize(d).ok())
    }

    /// Try to parse the resumable flag of an Invalid Session message (op=7)
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        self.d.as_ref().and_then(Value::as_bool)
    }

    /// Try to parse as a `READY` dispatch payload
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some("READY") {
            return None;
        }
        self.d.as_ref().and_then(|d| ReadyPayload::deserialize(d).ok())
    }

    /// Event name of a dispatch message
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self.op {
            OpCode::Dispatch => self.t.as_deref(),
            _ => None,
        }
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
