//! Gateway events
//!
//! Names of the dispatch events the gateway sends to clients.

mod event_types;

pub use event_types::GatewayEventType;
