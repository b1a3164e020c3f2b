//! Dispatch hand-off
//!
//! Decoded dispatch events leave the session manager through [`DispatchSink`], one call
//! per event in receipt order. [`DispatchRegistry`] is the default sink: it fans events out
//! to channel-based subscriptions.

mod registry;

pub use registry::{DispatchEvent, DispatchRegistry, EventFilter, Subscription, SubscriptionId};

use async_trait::async_trait;
use serde_json::Value;

/// Consumer of decoded dispatch events
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn accept(&self, event_name: &str, payload: Option<Value>);
}
