//! Observable conversation events.
//!
//! These are broadcast to external observers only. Nothing inside the engine
//! reacts to them.

use parley_types::{Message, MessageId};

use crate::mode::{ConversationMode, Speaker};

/// Something an observer may want to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// A party started speaking.
    SpeakingStarted {
        /// Who started.
        speaker: Speaker,
    },
    /// A party stopped speaking.
    SpeakingStopped {
        /// Who stopped.
        speaker: Speaker,
    },
    /// The turn moved between parties.
    TurnChanged {
        /// Previous holder.
        from: Speaker,
        /// New holder.
        to: Speaker,
    },
    /// User speech cut the assistant off, or the caller interrupted it.
    AssistantInterrupted,
    /// The user's turn was closed.
    UserTurnEnded,
    /// A message was committed to history.
    MessageFinalized(Message),
    /// The active transport connected or disconnected.
    ConnectionStatusChanged {
        /// New status.
        connected: bool,
    },
    /// A mode switch began.
    ModeSwitching {
        /// Current mode.
        from: ConversationMode,
        /// Requested mode.
        to: ConversationMode,
    },
    /// A mode switch completed.
    ModeSwitched {
        /// Previous mode.
        from: ConversationMode,
        /// New mode.
        to: ConversationMode,
    },
    /// The service asked for a tool call.
    ToolCallRequested {
        /// Call correlation id.
        call_id: String,
        /// Function name.
        name: String,
    },
    /// A tool result was sent back.
    ToolCallSubmitted {
        /// Call correlation id.
        call_id: String,
        /// Whether the result is an error object.
        is_error: bool,
    },
    /// A transcript for a message could not be produced.
    TranscriptFailed {
        /// Affected message.
        id: MessageId,
    },
    /// Something went wrong outside a caller-initiated action.
    Error {
        /// Description.
        message: String,
    },
}
