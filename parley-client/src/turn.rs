//! Turn coordinator: runs the pure turn machine against real I/O.
//!
//! Each input is handled under one lock: the transition is computed, then its
//! actions run in order. Delegate notifications are awaited before the lock
//! is released; broadcasts go to the [`EventBus`]; the manual-mode timer is
//! a spawned sleep that is aborted and replaced, never left running across a
//! state change.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parley_core::{ConversationEvent, Speaker, TurnAction, TurnInput, TurnMachine, TurnMode};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::error::ClientError;

/// Receives turn transitions that other components must act on.
///
/// Called while the coordinator is locked, so implementations must not call
/// back into the coordinator.
#[async_trait]
pub trait TurnDelegate: Send + Sync {
    /// The assistant lost the turn before finishing.
    async fn assistant_interrupted(&self) -> Result<(), ClientError>;

    /// The user's turn was closed.
    async fn user_turn_ended(&self) -> Result<(), ClientError>;
}

struct TurnInner {
    machine: TurnMachine,
    timer: Option<JoinHandle<()>>,
}

impl TurnInner {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Serialized turn-taking for one duplex session.
#[derive(Clone)]
pub struct TurnCoordinator {
    inner: Arc<Mutex<TurnInner>>,
    delegate: Arc<dyn TurnDelegate>,
    bus: EventBus,
}

impl TurnCoordinator {
    /// Create a coordinator with nobody speaking.
    pub fn new(mode: TurnMode, delegate: Arc<dyn TurnDelegate>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TurnInner {
                machine: TurnMachine::new(mode),
                timer: None,
            })),
            delegate,
            bus,
        }
    }

    /// Speech from the user was detected.
    pub async fn user_started_speaking(&self) -> Result<(), ClientError> {
        self.apply(TurnInput::UserStartedSpeaking).await
    }

    /// The user went quiet.
    pub async fn user_stopped_speaking(&self) -> Result<(), ClientError> {
        self.apply(TurnInput::UserStoppedSpeaking).await
    }

    /// Reply audio started.
    pub async fn assistant_started_speaking(&self) -> Result<(), ClientError> {
        self.apply(TurnInput::AssistantStartedSpeaking).await
    }

    /// Reply audio finished.
    pub async fn assistant_finished_speaking(&self) -> Result<(), ClientError> {
        self.apply(TurnInput::AssistantFinishedSpeaking).await
    }

    /// Close the user's turn.
    pub async fn end_user_turn(&self) -> Result<(), ClientError> {
        self.apply(TurnInput::EndUserTurn).await
    }

    /// Cut the assistant off.
    pub async fn interrupt_assistant(&self) -> Result<(), ClientError> {
        self.apply(TurnInput::InterruptAssistant).await
    }

    /// Replace the turn mode. Cancels a pending manual timeout.
    pub async fn update_mode(&self, mode: TurnMode) -> Result<(), ClientError> {
        self.apply(TurnInput::UpdateMode(mode)).await
    }

    /// Who holds the turn.
    pub async fn speaker(&self) -> Speaker {
        self.inner.lock().await.machine.speaker()
    }

    /// Current turn mode.
    pub async fn mode(&self) -> TurnMode {
        self.inner.lock().await.machine.mode()
    }

    /// Stop the timer. The coordinator is discarded after this.
    pub async fn shutdown(&self) {
        self.inner.lock().await.cancel_timer();
    }

    async fn apply(&self, input: TurnInput) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        let (machine, actions) = inner.machine.clone().on_event(input);
        inner.machine = machine;

        let mut first_error = None;
        for action in actions {
            let result = match action {
                TurnAction::NotifyInterruption => self.delegate.assistant_interrupted().await,
                TurnAction::NotifyUserTurnEnded => self.delegate.user_turn_ended().await,
                TurnAction::StartTimer {
                    timeout,
                    generation,
                } => {
                    inner.cancel_timer();
                    tracing::debug!("Manual turn timeout armed ({:?})", timeout);
                    let coordinator = self.clone();
                    inner.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        coordinator.timeout_elapsed(generation).await;
                    }));
                    Ok(())
                }
                TurnAction::CancelTimer => {
                    inner.cancel_timer();
                    Ok(())
                }
                TurnAction::Emit(event) => {
                    self.bus.publish(event);
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!("Turn delegate failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn timeout_elapsed(self, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tracing::debug!("Manual turn timeout elapsed");
            if let Err(e) = self.apply(TurnInput::TimeoutElapsed { generation }).await {
                self.bus.publish(ConversationEvent::Error {
                    message: e.to_string(),
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::VadConfig;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingDelegate {
        calls: StdMutex<Vec<&'static str>>,
        fail: bool,
    }

    impl RecordingDelegate {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TurnDelegate for RecordingDelegate {
        async fn assistant_interrupted(&self) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push("interrupted");
            if self.fail {
                return Err(ClientError::Cancelled);
            }
            Ok(())
        }

        async fn user_turn_ended(&self) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push("turn_ended");
            Ok(())
        }
    }

    fn coordinator(mode: TurnMode) -> (TurnCoordinator, Arc<RecordingDelegate>, EventBus) {
        let delegate = Arc::new(RecordingDelegate::default());
        let bus = EventBus::new();
        let turns = TurnCoordinator::new(mode, delegate.clone(), bus.clone());
        (turns, delegate, bus)
    }

    fn manual(ms: u64) -> TurnMode {
        TurnMode::Manual {
            timeout: Some(Duration::from_millis(ms)),
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<ConversationEvent>) -> Vec<ConversationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ===========================================
    // Interruption Tests
    // ===========================================

    #[tokio::test]
    async fn barge_in_notifies_delegate_and_observers_once() {
        let (turns, delegate, bus) = coordinator(TurnMode::Automatic(VadConfig::default()));
        let mut events = bus.subscribe();

        turns.assistant_started_speaking().await.unwrap();
        turns.user_started_speaking().await.unwrap();
        turns.user_started_speaking().await.unwrap();

        assert_eq!(delegate.calls(), vec!["interrupted"]);
        let interruptions = drain(&mut events)
            .into_iter()
            .filter(|e| *e == ConversationEvent::AssistantInterrupted)
            .count();
        assert_eq!(interruptions, 1);
        assert_eq!(turns.speaker().await, Speaker::User);
    }

    #[tokio::test]
    async fn manual_mode_has_no_barge_in() {
        let (turns, delegate, _) = coordinator(TurnMode::Manual { timeout: None });
        turns.assistant_started_speaking().await.unwrap();
        turns.user_started_speaking().await.unwrap();
        assert!(delegate.calls().is_empty());
    }

    #[tokio::test]
    async fn delegate_failure_is_returned_after_broadcast() {
        let delegate = Arc::new(RecordingDelegate {
            fail: true,
            ..Default::default()
        });
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let turns = TurnCoordinator::new(TurnMode::default(), delegate.clone(), bus);

        turns.assistant_started_speaking().await.unwrap();
        let result = turns.interrupt_assistant().await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(drain(&mut events).contains(&ConversationEvent::AssistantInterrupted));
        assert_eq!(turns.speaker().await, Speaker::Neither);
    }

    // ===========================================
    // Manual Timeout Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn manual_timeout_ends_turn_once() {
        let (turns, delegate, _) = coordinator(manual(500));

        turns.user_started_speaking().await.unwrap();
        turns.user_stopped_speaking().await.unwrap();

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(delegate.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(delegate.calls(), vec!["turn_ended"]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(delegate.calls(), vec!["turn_ended"]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_speech_cancels_timeout() {
        let (turns, delegate, _) = coordinator(manual(500));

        turns.user_started_speaking().await.unwrap();
        turns.user_stopped_speaking().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        turns.user_started_speaking().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(delegate.calls().is_empty());
        assert_eq!(turns.speaker().await, Speaker::User);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_change_cancels_timeout() {
        let (turns, delegate, _) = coordinator(manual(500));

        turns.user_started_speaking().await.unwrap();
        turns.user_stopped_speaking().await.unwrap();
        turns.update_mode(TurnMode::Disabled).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(delegate.calls().is_empty());
        assert_eq!(turns.mode().await, TurnMode::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_end_beats_timeout() {
        let (turns, delegate, _) = coordinator(manual(500));

        turns.user_started_speaking().await.unwrap();
        turns.user_stopped_speaking().await.unwrap();
        turns.end_user_turn().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(delegate.calls(), vec!["turn_ended"]);
    }
}
