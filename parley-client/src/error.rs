//! Top-level client errors.

use parley_core::{ConversationMode, SequencerError};
use parley_types::FrameError;
use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::transport::TransportError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Sequencer error.
    #[error("sequencer error: {0}")]
    Sequencer(#[from] SequencerError),

    /// Frame encode/decode error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Audio device error.
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The operation does not exist in the active mode.
    #[error("{operation} is not available in {mode} mode")]
    State {
        /// Operation name.
        operation: &'static str,
        /// Active mode.
        mode: ConversationMode,
    },

    /// The service ended a response without success.
    #[error("response failed: {0}")]
    ResponseFailed(String),

    /// The awaited result was abandoned before it resolved.
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_violation_names_operation_and_mode() {
        let err = ClientError::State {
            operation: "set_muted",
            mode: ConversationMode::Text,
        };
        assert_eq!(err.to_string(), "set_muted is not available in text mode");
    }

    #[test]
    fn transport_errors_convert() {
        let err: ClientError = TransportError::NotConnected.into();
        assert!(matches!(err, ClientError::Transport(TransportError::NotConnected)));
    }
}
