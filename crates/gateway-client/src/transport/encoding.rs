use super::{Frame, GatewayEncoding};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::GatewayMessage;

/// JSON text encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

impl GatewayEncoding for JsonEncoding {
    fn identifier(&self) -> &str {
        "json"
    }

    fn encode(&self, message: &GatewayMessage) -> GatewayResult<Frame> {
        message
            .to_json()
            .map(Frame::Text)
            .map_err(|e| GatewayError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> GatewayResult<GatewayMessage> {
        GatewayMessage::from_json(bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}
