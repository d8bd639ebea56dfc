//! # parley-types
//!
//! Wire format types for the Parley duplex conversation engine.
//!
//! This crate provides the foundational types used across all Parley crates:
//! - [`MessageId`], [`ConversationId`], [`Sequence`] - Identity and ordering types
//! - [`Message`], [`Role`], [`TranscriptStatus`] - Conversation history
//! - [`ClientFrame`], [`ServerEvent`] - Duplex (realtime) protocol frames
//! - [`ResponseRequest`], [`TextStreamEvent`], [`ResponsePayload`] - Streaming text protocol
//! - [`FrameError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod error;
mod frames;
mod ids;
mod messages;
mod response;
mod tools;

pub use codec::{Decoded, TaggedEvent};
pub use error::FrameError;
pub use frames::{
    ClientFrame, ContentPart, ConversationItem, ResponseInfo, ServerContent, ServerEvent,
    ServerItem, SessionConfig, TranscriptionConfig, TurnDetection,
};
pub use ids::{ConversationId, MessageId, Sequence};
pub use messages::{unix_millis, Message, Role, TranscriptStatus};
pub use response::{
    ApiError, InputItem, OutputContent, OutputItem, ResponsePayload, ResponseRequest,
    TextStreamEvent, Usage,
};
pub use tools::{ToolCall, ToolDefinition};
