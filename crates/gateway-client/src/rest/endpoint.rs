use super::GatewayEndpointProvider;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayEndpoint {
    /// WebSocket URL to connect to, without query parameters
    pub url: String,

    /// Recommended shard count
    #[serde(default)]
    pub shards: Option<u32>,

    #[serde(default)]
    pub session_start_limit: Option<SessionStartLimit>,
}

impl GatewayEndpoint {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shards: None,
            session_start_limit: None,
        }
    }
}

/// Identify budget reported alongside the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

/// Fetches the endpoint from `GET {api_base}/gateway/bot`
pub struct RestGatewayEndpoint {
    client: Client,
    api_base: String,
    token: String,
}

impl RestGatewayEndpoint {
    /// Request timeout for the endpoint lookup
    const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> GatewayResult<Self> {
        let client = Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self::with_client(client, api_base, token))
    }

    #[must_use]
    pub fn with_client(client: Client, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl GatewayEndpointProvider for RestGatewayEndpoint {
    #[instrument(skip(self), fields(api_base = %self.api_base))]
    async fn get_gateway(&self) -> GatewayResult<GatewayEndpoint> {
        let response = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rest(format!("{status}: {body}")));
        }

        let endpoint: GatewayEndpoint = response.json().await?;
        debug!(url = %endpoint.url, shards = ?endpoint.shards, "Fetched gateway endpoint");
        Ok(endpoint)
    }
}

/// Always answers with a fixed URL
#[derive(Debug, Clone)]
pub struct StaticGatewayEndpoint {
    url: String,
}

impl StaticGatewayEndpoint {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl GatewayEndpointProvider for StaticGatewayEndpoint {
    async fn get_gateway(&self) -> GatewayResult<GatewayEndpoint> {
        Ok(GatewayEndpoint::new(self.url.clone()))
    }
}
