//! # gateway-client
//!
//! Client for a real-time push gateway: connects, keeps the session alive with
//! heartbeats, resumes after drops, and hands dispatch events to subscribers.
//!
//! ```no_run
//! use gateway_client::{EventFilter, GatewayClient};
//! use gateway_common::GatewayConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GatewayClient::builder(GatewayConfig::from_env()?).build()?;
//! let mut events = client
//!     .registry()
//!     .expect("default sink is the registry")
//!     .subscribe(EventFilter::All);
//!
//! client.connect().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod protocol;
pub mod rest;
pub mod transport;

pub use connection::{ConnectionState, GatewayClient, GatewayClientBuilder};
pub use dispatch::{DispatchEvent, DispatchRegistry, DispatchSink, EventFilter, Subscription};
pub use error::{GatewayError, GatewayResult};
pub use events::GatewayEventType;
pub use protocol::{CloseCode, CloseStatus, GatewayMessage, OpCode};
