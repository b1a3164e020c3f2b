//! Gateway client builder

use super::manager::{Collaborators, FailureHook, GatewayClient, GatewayInner};
use crate::dispatch::{DispatchRegistry, DispatchSink};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::PresenceUpdatePayload;
use crate::rest::{GatewayEndpointProvider, RestGatewayEndpoint, StaticGatewayEndpoint};
use crate::transport::{
    GatewayCompression, GatewayConnection, GatewayEncoding, JsonEncoding, WebSocketConnection,
};
use gateway_common::GatewayConfig;
use std::sync::Arc;

/// Builder for [`GatewayClient`]
///
/// Only the configuration is required. Without an endpoint provider the client uses the
/// configured fixed URL, or asks the REST API; without a dispatch sink it fans events out
/// through an internal [`DispatchRegistry`].
pub struct GatewayClientBuilder {
    config: GatewayConfig,
    endpoint: Option<Arc<dyn GatewayEndpointProvider>>,
    connection: Option<Arc<dyn GatewayConnection>>,
    encoding: Option<Arc<dyn GatewayEncoding>>,
    compression: Option<Arc<dyn GatewayCompression>>,
    sink: Option<Arc<dyn DispatchSink>>,
    on_failure: Option<FailureHook>,
    presence: Option<PresenceUpdatePayload>,
}

impl GatewayClientBuilder {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            endpoint: None,
            connection: None,
            encoding: None,
            compression: None,
            sink: None,
            on_failure: None,
            presence: None,
        }
    }

    #[must_use]
    pub fn endpoint_provider(mut self, provider: Arc<dyn GatewayEndpointProvider>) -> Self {
        self.endpoint = Some(provider);
        self
    }

    #[must_use]
    pub fn connection(mut self, connection: Arc<dyn GatewayConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    #[must_use]
    pub fn encoding(mut self, encoding: Arc<dyn GatewayEncoding>) -> Self {
        self.encoding = Some(encoding);
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: Arc<dyn GatewayCompression>) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Replace the internal registry with a custom sink
    #[must_use]
    pub fn dispatch_sink(mut self, sink: Arc<dyn DispatchSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Called with every fatal gateway failure before the connection is torn down
    #[must_use]
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&GatewayError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Presence sent along with Identify
    #[must_use]
    pub fn presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn build(self) -> GatewayResult<GatewayClient> {
        let endpoint: Arc<dyn GatewayEndpointProvider> =
            match (self.endpoint, &self.config.gateway_url) {
                (Some(provider), _) => provider,
                (None, Some(url)) => Arc::new(StaticGatewayEndpoint::new(url.clone())),
                (None, None) => Arc::new(RestGatewayEndpoint::new(
                    self.config.api_base.clone(),
                    self.config.token.clone(),
                )?),
            };

        let (sink, registry): (Arc<dyn DispatchSink>, _) = match self.sink {
            Some(sink) => (sink, None),
            None => {
                let registry = Arc::new(DispatchRegistry::new());
                (Arc::clone(&registry) as Arc<dyn DispatchSink>, Some(registry))
            }
        };

        let parts = Collaborators {
            endpoint,
            connection: self
                .connection
                .unwrap_or_else(|| Arc::new(WebSocketConnection::new())),
            encoding: self.encoding.unwrap_or_else(|| Arc::new(JsonEncoding)),
            compression: self.compression,
            sink,
            registry,
            on_failure: self.on_failure,
            presence: self.presence,
        };

        let inner = GatewayInner::new(self.config, parts);
        Ok(GatewayClient::from_inner(inner))
    }
}
