//! Message serialization.
//!
//! Endpoints exchange [`Message`] values. A [`Codec`] turns a message into the
//! text carried by one frame and back. [`JsonCodec`] is the default.

use crate::error::Result;

/// Structured value exchanged between endpoints.
pub type Message = serde_json::Value;

/// Encodes messages to frame text and decodes frame text to messages.
pub trait Codec: Send + Sync + 'static {
    /// Serialize a message into the text of a single frame.
    fn encode(&self, message: &Message) -> Result<String>;

    /// Parse the text of a single frame into a message.
    fn decode(&self, text: &str) -> Result<Message>;
}

/// Compact JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<String> {
        Ok(serde_json::to_string(message)?)
    }

    fn decode(&self, text: &str) -> Result<Message> {
        Ok(serde_json::from_str(text)?)
    }
}
