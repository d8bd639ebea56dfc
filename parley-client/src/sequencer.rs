//! Serialized access to the message sequencer.
//!
//! Wraps the pure [`MessageSequencer`] in a lock so that each mutation and
//! the finalization it triggers run as one exclusive step. Finalized messages
//! fan out from inside that step to live subscribers and to the event bus.

use std::sync::Arc;

use parley_core::{ConversationEvent, EnqueueRequest, Enqueued, MessageSequencer, SequencerError};
use parley_types::{Message, MessageId};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::bus::EventBus;

/// Finalized messages in sequence order: the backlog first, then live ones.
pub type MessageStream = UnboundedReceiverStream<Message>;

struct Shared {
    sequencer: MessageSequencer,
    subscribers: Vec<mpsc::UnboundedSender<Message>>,
}

impl Shared {
    fn deliver(&mut self, bus: &EventBus, finalized: &[Message]) {
        for message in finalized {
            tracing::debug!(
                "Finalized {} #{} ({})",
                message.id,
                message.sequence,
                message.role
            );
            self.subscribers
                .retain(|subscriber| subscriber.send(message.clone()).is_ok());
            bus.publish(ConversationEvent::MessageFinalized(message.clone()));
        }
    }
}

/// Shared handle to one conversation's sequencer.
#[derive(Clone)]
pub struct SequencerHandle {
    shared: Arc<Mutex<Shared>>,
    bus: EventBus,
}

impl SequencerHandle {
    /// Create an empty sequencer that announces finalized messages on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                sequencer: MessageSequencer::new(),
                subscribers: Vec::new(),
            })),
            bus,
        }
    }

    /// Add an entry and deliver whatever finalized.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Enqueued, SequencerError> {
        let mut shared = self.shared.lock().await;
        let enqueued = shared.sequencer.enqueue(request)?;
        shared.deliver(&self.bus, &enqueued.finalized);
        Ok(enqueued)
    }

    /// Complete a pending transcript and deliver whatever finalized.
    pub async fn update_transcript(
        &self,
        id: &MessageId,
        text: impl Into<String>,
    ) -> Result<Vec<Message>, SequencerError> {
        let mut shared = self.shared.lock().await;
        let finalized = shared.sequencer.update_transcript(id, text)?;
        shared.deliver(&self.bus, &finalized);
        Ok(finalized)
    }

    /// Finalize every pending entry with the text it has.
    pub async fn flush_pending(&self) -> Vec<Message> {
        let mut shared = self.shared.lock().await;
        let finalized = shared.sequencer.flush_pending();
        if !finalized.is_empty() {
            tracing::debug!("Flushing {} pending entries", finalized.len());
        }
        shared.deliver(&self.bus, &finalized);
        finalized
    }

    /// Snapshot of the finalized history.
    pub async fn ordered_messages(&self) -> Vec<Message> {
        self.shared.lock().await.sequencer.ordered_messages()
    }

    /// Look up a finalized message.
    pub async fn message(&self, id: &MessageId) -> Option<Message> {
        self.shared.lock().await.sequencer.message(id).cloned()
    }

    /// Whether the id is pending or finalized.
    pub async fn contains(&self, id: &MessageId) -> bool {
        self.shared.lock().await.sequencer.contains(id)
    }

    /// Whether the id is still waiting in the queue.
    pub async fn is_pending(&self, id: &MessageId) -> bool {
        self.shared.lock().await.sequencer.is_pending(id)
    }

    /// Number of entries waiting in the queue.
    pub async fn pending_len(&self) -> usize {
        self.shared.lock().await.sequencer.pending_len()
    }

    /// Subscribe to finalized messages.
    ///
    /// The backlog is queued and the subscriber registered under the same
    /// lock that guards finalization, so nothing is missed or repeated at
    /// the boundary.
    pub async fn subscribe(&self) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock().await;
        for message in shared.sequencer.completed() {
            let _ = tx.send(message.clone());
        }
        shared.subscribers.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Reset history and numbering. Existing subscriptions end.
    pub async fn clear(&self) {
        let mut shared = self.shared.lock().await;
        shared.sequencer.clear();
        shared.subscribers.clear();
        tracing::info!("History cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_types::Role;

    fn handle() -> (SequencerHandle, EventBus) {
        let bus = EventBus::new();
        (SequencerHandle::new(bus.clone()), bus)
    }

    // ===========================================
    // Ordering Tests
    // ===========================================

    #[tokio::test]
    async fn text_then_slot_scenario() {
        let (seq, _) = handle();
        let first = seq
            .enqueue(EnqueueRequest::text(Role::User, "hi"))
            .await
            .unwrap();
        let second = seq
            .enqueue(EnqueueRequest::slot(MessageId::generate(), Role::Assistant))
            .await
            .unwrap();
        seq.update_transcript(&second.id, "hello back").await.unwrap();

        let history = seq.ordered_messages().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[0].sequence.value(), 0);
        assert_eq!(history[1].text_or_empty(), "hello back");
        assert_eq!(history[1].sequence.value(), 1);
    }

    #[tokio::test]
    async fn finalized_messages_reach_the_bus() {
        let (seq, bus) = handle();
        let mut events = bus.subscribe();

        let out = seq
            .enqueue(EnqueueRequest::text(Role::User, "hi"))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ConversationEvent::MessageFinalized(message) => assert_eq!(message.id, out.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_updates_keep_sequence_order() {
        let (seq, _) = handle();
        let mut ids = Vec::new();
        for i in 0..20 {
            let out = seq
                .enqueue(EnqueueRequest::slot(format!("item_{i}").into(), Role::User))
                .await
                .unwrap();
            ids.push(out.id);
        }

        let mut tasks = Vec::new();
        for id in ids.into_iter().rev() {
            let seq = seq.clone();
            tasks.push(tokio::spawn(async move {
                seq.update_transcript(&id, id.as_str().to_string()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let history = seq.ordered_messages().await;
        assert_eq!(history.len(), 20);
        for (i, message) in history.iter().enumerate() {
            assert_eq!(message.sequence.value(), i as u64);
            assert_eq!(message.text_or_empty(), format!("item_{i}"));
        }
    }

    // ===========================================
    // Subscription Tests
    // ===========================================

    #[tokio::test]
    async fn subscriber_gets_backlog_then_live() {
        let (seq, _) = handle();
        seq.enqueue(EnqueueRequest::text(Role::User, "one"))
            .await
            .unwrap();
        seq.enqueue(EnqueueRequest::text(Role::Assistant, "two"))
            .await
            .unwrap();

        let mut stream = seq.subscribe().await;
        seq.enqueue(EnqueueRequest::text(Role::User, "three"))
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(stream.next().await.unwrap().text_or_empty().to_string());
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn subscribe_races_with_finalization_without_gaps() {
        let (seq, _) = handle();
        let writer = {
            let seq = seq.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    seq.enqueue(EnqueueRequest::text(Role::User, i.to_string()))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::task::yield_now().await;
        let stream = seq.subscribe().await;
        writer.await.unwrap();
        seq.clear().await;

        let seen: Vec<u64> = stream.map(|m| m.sequence.value()).collect().await;
        assert_eq!(seen, (0..50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn clear_ends_subscriptions() {
        let (seq, _) = handle();
        seq.enqueue(EnqueueRequest::text(Role::User, "before"))
            .await
            .unwrap();
        let mut stream = seq.subscribe().await;

        seq.clear().await;
        seq.enqueue(EnqueueRequest::text(Role::User, "after"))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().text_or_empty(), "before");
        assert!(stream.next().await.is_none());
        assert_eq!(seq.ordered_messages().await[0].sequence.value(), 0);
    }

    #[tokio::test]
    async fn flush_delivers_to_subscribers() {
        let (seq, _) = handle();
        let mut stream = seq.subscribe().await;
        seq.enqueue(EnqueueRequest::slot("item_u".into(), Role::User))
            .await
            .unwrap();

        let flushed = seq.flush_pending().await;

        assert_eq!(flushed.len(), 1);
        assert_eq!(stream.next().await.unwrap().id.as_str(), "item_u");
        assert_eq!(seq.pending_len().await, 0);
    }
}
