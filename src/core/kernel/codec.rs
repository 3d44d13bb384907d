use crate::core::errors::BinanceError;
use serde_json::Value;

/// Codec trait for turning raw stream frames into typed messages
///
/// The transport hands over payload bytes exactly as received; the codec
/// decides what they mean. Control frames never reach a codec.
pub trait FrameCodec: Send + Sync + 'static {
    /// The type handed to endpoint handlers
    type Message: Send;

    /// Decode one inbound frame
    ///
    /// # Returns
    /// - `Ok(message)` - Successfully decoded message
    /// - `Err(error)` - The frame is malformed and must be dropped
    fn decode(&self, payload: &[u8]) -> Result<Self::Message, BinanceError>;
}

/// Every Binance stream frame is a single UTF-8 JSON document
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    type Message = Value;

    fn decode(&self, payload: &[u8]) -> Result<Value, BinanceError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
