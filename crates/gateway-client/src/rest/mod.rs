//! Gateway endpoint discovery
//!
//! A cold connect asks the REST API where to connect; a resume reuses the URL handed out
//! in `READY` and never comes through here.

mod endpoint;

pub use endpoint::{GatewayEndpoint, RestGatewayEndpoint, SessionStartLimit, StaticGatewayEndpoint};

use crate::error::GatewayResult;
use async_trait::async_trait;

/// Source of the gateway URL for cold connects
#[async_trait]
pub trait GatewayEndpointProvider: Send + Sync {
    async fn get_gateway(&self) -> GatewayResult<GatewayEndpoint>;
}
