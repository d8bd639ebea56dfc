//! Message sequencer for Parley.
//!
//! This module orders conversation messages that arrive out of order:
//! - Every entry gets a sequence number at intake
//! - Entries wait in a FIFO until their content is known
//! - Only the head of the FIFO may finalize (head-of-line blocking)
//!
//! A user's speech transcript can complete after the assistant's reply has
//! started. Both are enqueued when they begin, so the visible history always
//! follows intake order no matter which transcript lands first.

use std::collections::{HashMap, VecDeque};

use parley_types::{unix_millis, Message, MessageId, Role, Sequence, TranscriptStatus};

use crate::error::SequencerError;

/// Input to [`MessageSequencer::enqueue`].
#[derive(Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    /// Caller-supplied id; generated when absent.
    pub id: Option<MessageId>,
    /// Author.
    pub role: Role,
    /// Text, if already known.
    pub text: Option<String>,
    /// Encoded audio, if retained.
    pub audio: Option<Vec<u8>>,
    /// Transcript status at intake.
    pub status: TranscriptStatus,
}

impl EnqueueRequest {
    /// A message whose text is known up front.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            text: Some(text.into()),
            audio: None,
            status: TranscriptStatus::NotApplicable,
        }
    }

    /// A slot whose transcript will arrive later.
    pub fn slot(id: MessageId, role: Role) -> Self {
        Self {
            id: Some(id),
            role,
            text: None,
            audio: None,
            status: TranscriptStatus::InProgress,
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the intake status.
    pub fn with_status(mut self, status: TranscriptStatus) -> Self {
        self.status = status;
        self
    }

    /// Attach audio.
    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = Some(audio);
        self
    }
}

impl std::fmt::Debug for EnqueueRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueRequest")
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
            .field("status", &self.status)
            .finish()
    }
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// Id of the new entry.
    pub id: MessageId,
    /// Sequence number assigned to it.
    pub sequence: Sequence,
    /// Messages finalized as a consequence, in order.
    pub finalized: Vec<Message>,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    id: MessageId,
    role: Role,
    text: Option<String>,
    audio: Option<Vec<u8>>,
    status: TranscriptStatus,
    sequence: Sequence,
    created_at: u64,
}

impl PendingEntry {
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            role: self.role,
            text: self.text,
            audio: self.audio,
            created_at: self.created_at,
            sequence: self.sequence,
        }
    }
}

/// Ordering engine: buffers in-flight entries and commits them in sequence order.
///
/// Not synchronized; the async layer wraps it in a lock so that every
/// mutation, including the finalization it triggers, runs exclusively.
#[derive(Debug, Default)]
pub struct MessageSequencer {
    /// Next sequence number to assign.
    next_sequence: Sequence,
    /// Entries waiting for their content, ordered by sequence.
    pending: VecDeque<PendingEntry>,
    /// Finalized history, ordered by sequence.
    completed: Vec<Message>,
    /// Position of each finalized message in `completed`.
    index: HashMap<MessageId, usize>,
}

impl MessageSequencer {
    /// Create an empty sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry at the tail and finalize whatever became ready.
    pub fn enqueue(&mut self, request: EnqueueRequest) -> Result<Enqueued, SequencerError> {
        let id = request.id.unwrap_or_else(MessageId::generate);
        if self.contains(&id) {
            return Err(SequencerError::DuplicateId(id));
        }

        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        self.pending.push_back(PendingEntry {
            id: id.clone(),
            role: request.role,
            text: request.text,
            audio: request.audio,
            status: request.status,
            sequence,
            created_at: unix_millis(),
        });

        Ok(Enqueued {
            id,
            sequence,
            finalized: self.finalize_ready(),
        })
    }

    /// Complete the transcript of a pending entry and finalize whatever became ready.
    ///
    /// The entry may be anywhere in the queue. Returns
    /// [`SequencerError::UnknownEntry`] if no pending entry has this id,
    /// including entries that have already been finalized.
    pub fn update_transcript(
        &mut self,
        id: &MessageId,
        text: impl Into<String>,
    ) -> Result<Vec<Message>, SequencerError> {
        let entry = self
            .pending
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| SequencerError::UnknownEntry(id.clone()))?;
        entry.text = Some(text.into());
        entry.status = TranscriptStatus::Completed;
        Ok(self.finalize_ready())
    }

    /// Finalize every pending entry in order, keeping whatever text it has.
    ///
    /// Used when no further transcript can arrive for the queue, such as
    /// after the duplex session is torn down.
    pub fn flush_pending(&mut self) -> Vec<Message> {
        for entry in self.pending.iter_mut() {
            if !entry.status.is_final() {
                entry.status = TranscriptStatus::Completed;
            }
        }
        self.finalize_ready()
    }

    /// Pop finalizable entries off the head, in order.
    fn finalize_ready(&mut self) -> Vec<Message> {
        let mut finalized = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|head| head.status.is_final())
        {
            let Some(head) = self.pending.pop_front() else {
                break;
            };
            let message = head.into_message();
            self.index.insert(message.id.clone(), self.completed.len());
            self.completed.push(message.clone());
            finalized.push(message);
        }
        finalized
    }

    /// Snapshot of the finalized history.
    pub fn ordered_messages(&self) -> Vec<Message> {
        self.completed.clone()
    }

    /// Borrow the finalized history.
    pub fn completed(&self) -> &[Message] {
        &self.completed
    }

    /// Look up a finalized message.
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).and_then(|&i| self.completed.get(i))
    }

    /// Whether the id is pending or finalized.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id) || self.is_pending(id)
    }

    /// Whether the id is waiting in the queue.
    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.iter().any(|e| &e.id == id)
    }

    /// Number of entries waiting in the queue.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of finalized messages.
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Check if no message has been finalized.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Sequence number the next enqueue will receive.
    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    /// Drop all entries and restart numbering from zero.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.completed.clear();
        self.index.clear();
        self.next_sequence = Sequence::zero();
    }
}
