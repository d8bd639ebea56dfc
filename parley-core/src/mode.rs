//! Conversation and turn-taking modes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which transport family carries the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Persistent duplex session with speech in and out.
    Audio,
    /// Stateless streaming request/response.
    #[default]
    Text,
}

impl ConversationMode {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::Audio => "audio",
            ConversationMode::Text => "text",
        }
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who currently holds the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Speaker {
    /// The local user.
    User,
    /// The remote assistant.
    Assistant,
    /// Nobody.
    #[default]
    Neither,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
            Speaker::Neither => "none",
        };
        f.write_str(name)
    }
}

/// Remote voice-activity detector tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Activation threshold, 0.0 to 1.0.
    pub threshold: f32,
    /// Audio kept before detected speech.
    pub prefix_padding_ms: u32,
    /// Silence that ends a user turn.
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// How turns are ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnMode {
    /// The remote detector ends turns and may interrupt the assistant.
    Automatic(VadConfig),
    /// The caller ends turns, optionally after a silence timeout.
    Manual {
        /// Delay after the user stops speaking before the turn ends itself.
        timeout: Option<Duration>,
    },
    /// No turn management.
    Disabled,
}

impl TurnMode {
    /// Whether the remote detector drives turns.
    pub fn is_automatic(&self) -> bool {
        matches!(self, TurnMode::Automatic(_))
    }

    /// Whether the caller drives turns.
    pub fn is_manual(&self) -> bool {
        matches!(self, TurnMode::Manual { .. })
    }

    /// Manual-mode timeout, if one is configured.
    pub fn manual_timeout(&self) -> Option<Duration> {
        match self {
            TurnMode::Manual { timeout } => *timeout,
            _ => None,
        }
    }

    /// Detector tuning, in automatic mode.
    pub fn vad(&self) -> Option<VadConfig> {
        match self {
            TurnMode::Automatic(vad) => Some(*vad),
            _ => None,
        }
    }
}

impl Default for TurnMode {
    fn default() -> Self {
        TurnMode::Automatic(VadConfig::default())
    }
}
