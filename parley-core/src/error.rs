//! Error types for parley-core.

use parley_types::MessageId;
use thiserror::Error;

/// Errors from sequencer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    /// No pending entry has this id.
    #[error("no pending entry with id {0}")]
    UnknownEntry(MessageId),

    /// The id is already pending or finalized.
    #[error("duplicate message id {0}")]
    DuplicateId(MessageId),
}
