//! Transport seams
//!
//! The session manager talks to the wire only through these traits: a duplex connection
//! that moves frames, an encoding that turns frames into messages, and an optional
//! compression applied to inbound frames before decoding.

mod encoding;
mod websocket;

pub use encoding::JsonEncoding;
pub use websocket::WebSocketConnection;

use crate::error::GatewayResult;
use crate::protocol::{CloseStatus, GatewayMessage};
use async_trait::async_trait;
use url::Url;

/// A single frame as carried by the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Raw bytes of the frame
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Result of a single read from the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A data frame
    Frame(Frame),
    /// The server closed the connection
    Closed(CloseStatus),
}

/// Duplex connection to the gateway
///
/// `read` and `send` may be called concurrently from different tasks.
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Open the connection, replacing any previous one
    async fn connect(&self, url: &Url) -> GatewayResult<()>;

    /// Wait for the next frame or the closure of the connection
    async fn read(&self) -> GatewayResult<Incoming>;

    /// Send a single frame
    async fn send(&self, frame: Frame) -> GatewayResult<()>;

    /// Close the connection; a no-op when nothing is open
    async fn disconnect(&self) -> GatewayResult<()>;
}

/// Message encoding negotiated through the `encoding` query parameter
pub trait GatewayEncoding: Send + Sync {
    /// Value of the `encoding` query parameter
    fn identifier(&self) -> &str;

    fn encode(&self, message: &GatewayMessage) -> GatewayResult<Frame>;

    fn decode(&self, bytes: &[u8]) -> GatewayResult<GatewayMessage>;
}

/// Transport compression negotiated through the `compress` query parameter
pub trait GatewayCompression: Send + Sync {
    /// Value of the `compress` query parameter
    fn identifier(&self) -> &str;

    /// Inflate one inbound frame
    fn decompress(&self, bytes: &[u8]) -> GatewayResult<Vec<u8>>;
}
