//! Conversation messages.
//!
//! A [`Message`] is the immutable, finalized form of a conversation turn.
//! Messages only exist once their content is fully known; in-flight entries
//! live in the sequencer until then.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{MessageId, Sequence};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human participant
    User,
    /// The generated reply
    Assistant,
    /// Instructions injected by the application
    System,
    /// Output produced by a tool call
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transcription progress of an in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    /// Audio exists but transcription has not begun
    NotStarted,
    /// Transcription is running
    InProgress,
    /// Transcript text is known
    Completed,
    /// The message never needs a transcript (typed text, tool output)
    NotApplicable,
}

impl TranscriptStatus {
    /// Whether an entry with this status may be finalized.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::NotApplicable)
    }
}

/// A finalized conversation message.
///
/// Immutable once created. The sequence number fixes its position in history.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier
    pub id: MessageId,
    /// Author
    pub role: Role,
    /// Text content (typed text or transcript)
    pub text: Option<String>,
    /// Encoded audio, if any was retained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
    /// Unix timestamp (milliseconds) of intake
    pub created_at: u64,
    /// Intake sequence number
    pub sequence: Sequence,
}

impl Message {
    /// Text content, or the empty string when there is none.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("text", &self.text)
            .field(
                "audio",
                &self
                    .audio
                    .as_ref()
                    .map(|a| format!("[{} bytes REDACTED]", a.len())),
            )
            .field("created_at", &self.created_at)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Current Unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
