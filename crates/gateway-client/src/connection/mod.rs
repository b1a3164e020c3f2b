//! Connection management
//!
//! The session manager and the pieces it owns: session state, heartbeat, and the
//! outbound rate limiter.

mod builder;
mod heartbeat;
mod manager;
mod rate_limit;
mod session;
mod state;

pub use builder::GatewayClientBuilder;
pub use heartbeat::{HeartbeatDriver, HeartbeatMonitor, HeartbeatOutcome, HeartbeatSignal};
pub use manager::{FailureHook, GatewayClient};
pub use rate_limit::RateLimiter;
pub use session::{ResumeInfo, SessionState};
pub use state::ConnectionState;

impl GatewayClient {
    /// Start building a client
    #[must_use]
    pub fn builder(config: gateway_common::GatewayConfig) -> GatewayClientBuilder {
        GatewayClientBuilder::new(config)
    }
}
