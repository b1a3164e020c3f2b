//! Gateway client configuration
//!
//! Built programmatically by the embedding application or loaded from environment variables.

use super::GatewayIntents;
use std::env;
use std::fmt;
use std::time::Duration;

/// Main gateway client configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Bot token sent with Identify and Resume
    pub token: String,
    /// Intents requested on Identify
    pub intents: GatewayIntents,
    /// Gateway protocol version appended to the connection URI
    pub gateway_version: u8,
    /// Base URL of the REST API used to look up the gateway endpoint
    pub api_base: String,
    /// Fixed gateway URL; skips the REST lookup when set
    pub gateway_url: Option<String>,
    /// Member count above which a guild is considered large
    pub large_threshold: u16,
    /// Ask the server for per-payload compression
    pub compress: bool,
    /// Shard this client identifies as
    pub shard: Option<ShardSpec>,
    /// Properties reported to the server on Identify
    pub properties: ConnectionProperties,
    /// Outbound messages allowed per window
    pub outbound_limit: u32,
    /// Length of the outbound rate limit window
    pub outbound_window: Duration,
    /// How long to wait for Hello (or the first message of a resume)
    pub startup_timeout: Duration,
    /// How long to wait for each heartbeat ACK
    pub heartbeat_ack_timeout: Duration,
    /// Unacknowledged heartbeats tolerated before the connection is declared dead
    pub max_heartbeat_attempts: u8,
}

/// Shard identity `[shard_id, shard_count]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub id: u32,
    pub count: u32,
}

impl ShardSpec {
    /// Create a shard spec, validating that `id < count`
    pub fn new(id: u32, count: u32) -> Result<Self, ConfigError> {
        if count == 0 || id >= count {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_SHARD_ID",
                format!("shard {id} is out of range for {count} shards"),
            ));
        }
        Ok(Self { id, count })
    }
}

/// Connection properties reported on Identify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: env::consts::OS.to_string(),
            browser: default_client_name(),
            device: default_client_name(),
        }
    }
}

// Default value functions
fn default_client_name() -> String {
    format!("gateway-client {}", env!("CARGO_PKG_VERSION"))
}

fn default_gateway_version() -> u8 {
    10
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_large_threshold() -> u16 {
    50
}

fn default_outbound_limit() -> u32 {
    120
}

fn default_outbound_window() -> Duration {
    Duration::from_secs(60)
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_ack_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_max_heartbeat_attempts() -> u8 {
    3
}

impl GatewayConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: GatewayIntents::default(),
            gateway_version: default_gateway_version(),
            api_base: default_api_base(),
            gateway_url: None,
            large_threshold: default_large_threshold(),
            compress: false,
            shard: None,
            properties: ConnectionProperties::default(),
            outbound_limit: default_outbound_limit(),
            outbound_window: default_outbound_window(),
            startup_timeout: default_startup_timeout(),
            heartbeat_ack_timeout: default_heartbeat_ack_timeout(),
            max_heartbeat_attempts: default_max_heartbeat_attempts(),
        }
    }

    /// Set the requested intents
    #[must_use]
    pub fn with_intents(mut self, intents: GatewayIntents) -> Self {
        self.intents = intents;
        self
    }

    /// Use a fixed gateway URL instead of asking the REST API
    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Set the shard this client identifies as
    #[must_use]
    pub fn with_shard(mut self, shard: ShardSpec) -> Self {
        self.shard = Some(shard);
        self
    }

    /// Set the outbound rate limit
    #[must_use]
    pub fn with_outbound_limit(mut self, limit: u32, window: Duration) -> Self {
        self.outbound_limit = limit;
        self.outbound_window = window;
        self
    }

    /// Set the startup (Hello / first resume message) timeout
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set heartbeat tolerance: per-attempt ACK timeout and number of attempts
    #[must_use]
    pub fn with_heartbeat_tolerance(mut self, ack_timeout: Duration, attempts: u8) -> Self {
        self.heartbeat_ack_timeout = ack_timeout;
        self.max_heartbeat_attempts = attempts;
        self
    }

    /// Set connection properties reported on Identify
    #[must_use]
    pub fn with_properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("GATEWAY_TOKEN").ok_or(ConfigError::MissingVar("GATEWAY_TOKEN"))?;
        let mut config = Self::new(token);

        if let Some(bits) = parse_var::<u64, _>(&lookup, "GATEWAY_INTENTS")? {
            config.intents = GatewayIntents::from_bits_truncate(bits);
        }
        if let Some(version) = parse_var(&lookup, "GATEWAY_VERSION")? {
            config.gateway_version = version;
        }
        if let Some(api_base) = lookup("GATEWAY_API_BASE") {
            config.api_base = api_base.trim_end_matches('/').to_string();
        }
        config.gateway_url = lookup("GATEWAY_URL").filter(|url| !url.is_empty());
        if let Some(threshold) = parse_var(&lookup, "GATEWAY_LARGE_THRESHOLD")? {
            config.large_threshold = threshold;
        }
        if let Some(compress) = parse_var(&lookup, "GATEWAY_COMPRESS")? {
            config.compress = compress;
        }
        if let Some(limit) = parse_var(&lookup, "GATEWAY_OUTBOUND_LIMIT")? {
            config.outbound_limit = limit;
        }
        if let Some(secs) = parse_var(&lookup, "GATEWAY_OUTBOUND_WINDOW_SECS")? {
            config.outbound_window = Duration::from_secs(secs);
        }

        let shard_id = parse_var(&lookup, "GATEWAY_SHARD_ID")?;
        let shard_count = parse_var(&lookup, "GATEWAY_SHARD_COUNT")?;
        config.shard = match (shard_id, shard_count) {
            (Some(id), Some(count)) => Some(ShardSpec::new(id, count)?),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingVar("GATEWAY_SHARD_COUNT")),
            (None, Some(_)) => return Err(ConfigError::MissingVar("GATEWAY_SHARD_ID")),
        };

        if config.outbound_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_OUTBOUND_LIMIT",
                "must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue(name, e.to_string())),
        None => Ok(None),
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("gateway_version", &self.gateway_version)
            .field("api_base", &self.api_base)
            .field("gateway_url", &self.gateway_url)
            .field("large_threshold", &self.large_threshold)
            .field("compress", &self.compress)
            .field("shard", &self.shard)
            .field("outbound_limit", &self.outbound_limit)
            .field("outbound_window", &self.outbound_window)
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
