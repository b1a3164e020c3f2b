//! Payload definitions
//!
//! Defines the `d` payloads the client sends and the handshake payloads it reads.

use gateway_common::{ConnectionProperties, ShardSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to start a brand-new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// Intents bitmask
    pub intents: u64,

    /// Whether the server should compress individual payloads
    pub compress: bool,

    /// Member count above which offline members are omitted from guild payloads
    pub large_threshold: u16,

    /// `[shard_id, shard_count]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdatePayload>,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Browser or client library name
    pub browser: String,

    /// Device name
    pub device: String,
}

impl From<ConnectionProperties> for IdentifyProperties {
    fn from(props: ConnectionProperties) -> Self {
        Self {
            os: props.os,
            browser: props.browser,
            device: props.device,
        }
    }
}

/// Payload for op 4 (Resume)
///
/// Sent by the client to resume a disconnected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Payload of the `READY` dispatch
///
/// Only the fields the session manager needs; everything else is left for the dispatch sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version
    #[serde(default)]
    pub v: Option<u8>,

    /// Session ID used for resuming
    pub session_id: String,

    /// URL to reconnect to when resuming
    pub resume_gateway_url: String,

    /// `[shard_id, shard_count]`
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

impl ReadyPayload {
    /// Shard identity assigned by the server
    #[must_use]
    pub fn shard_spec(&self) -> Option<ShardSpec> {
        self.shard.map(|[id, count]| ShardSpec { id, count })
    }
}

/// Payload for op 3 (Presence Update)
///
/// Sent by the client to update its online status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    /// Unix time in milliseconds the client went idle
    pub since: Option<u64>,

    /// Activities shown for the user
    #[serde(default)]
    pub activities: Vec<Value>,

    /// New status (online, idle, dnd, invisible, offline)
    pub status: String,

    /// Whether the client is AFK
    #[serde(default)]
    pub afk: bool,
}

impl PresenceUpdatePayload {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] =
        &["online", "idle", "dnd", "invisible", "offline"];

    /// Create a presence with a status and no activities
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }

    /// Check if the status is valid
    #[must_use]
    pub fn is_valid_status(&self) -> bool {
        Self::VALID_STATUSES.contains(&self.status.as_str())
    }
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    /// Guild to request members for
    pub guild_id: String,

    /// Username prefix filter; empty string returns all members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Maximum number of members to send; 0 means no limit
    pub limit: u32,

    /// Include presences of the matched members
    #[serde(default)]
    pub presences: bool,

    /// Specific users to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,

    /// Echoed back in the resulting member chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembersPayload {
    /// Request every member of a guild
    #[must_use]
    pub fn all(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: None,
            nonce: None,
        }
    }
}
