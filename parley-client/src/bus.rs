//! Fire-and-forget event fan-out for external observers.

use parley_core::ConversationEvent;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel of [`ConversationEvent`]s.
///
/// `publish` never waits. Receivers that fall behind lag and skip events
/// rather than slowing the engine down. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns how many receivers got it.
    pub fn publish(&self, event: ConversationEvent) -> usize {
        tracing::trace!("event: {:?}", event);
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
