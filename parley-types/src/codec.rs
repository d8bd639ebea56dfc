//! JSON framing shared by the duplex and streaming-text protocols.
//!
//! Both protocols tag every frame with a string `type`. Types we model are
//! decoded into typed events; anything else is passed through with its raw
//! payload so callers can log or forward it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::FrameError;

/// An inbound event enum with a catch-all for unmodeled `type` values.
pub trait TaggedEvent: DeserializeOwned {
    /// Whether this value is the catch-all variant.
    fn is_unrecognized(&self) -> bool;
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<E> {
    /// A modeled event.
    Event(E),
    /// An event type this crate does not model.
    Passthrough {
        /// The frame's `type` tag.
        kind: String,
        /// The full frame.
        payload: Value,
    },
}

impl<E> Decoded<E> {
    /// The modeled event, if this is one.
    pub fn into_event(self) -> Option<E> {
        match self {
            Decoded::Event(event) => Some(event),
            Decoded::Passthrough { .. } => None,
        }
    }
}

/// Decode a JSON text frame.
///
/// Fails if the text is not JSON, has no string `type`, or is a modeled type
/// whose fields do not match.
pub fn decode<E: TaggedEvent>(text: &str) -> Result<Decoded<E>, FrameError> {
    let payload: Value = serde_json::from_str(text).map_err(FrameError::Deserialization)?;
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();

    let event: E = serde_json::from_value(payload.clone()).map_err(FrameError::Deserialization)?;
    if event.is_unrecognized() {
        Ok(Decoded::Passthrough { kind, payload })
    } else {
        Ok(Decoded::Event(event))
    }
}

/// Encode an outbound frame as JSON text.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(FrameError::Serialization)
}
