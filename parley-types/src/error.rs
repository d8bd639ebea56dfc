//! Error types for Parley wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The frame is not a JSON object with a string `type` field
    #[error("frame has no type tag")]
    MissingType,

    /// Invalid data inside an otherwise well-formed frame
    #[error("invalid data: {0}")]
    InvalidData(String),
}
