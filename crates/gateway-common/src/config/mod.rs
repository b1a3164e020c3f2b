//! Configuration structs

mod gateway_config;
mod intents;

pub use gateway_config::{ConfigError, ConnectionProperties, GatewayConfig, ShardSpec};
pub use intents::GatewayIntents;
