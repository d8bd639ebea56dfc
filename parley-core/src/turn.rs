//! Turn-taking state machine for Parley.
//!
//! Pure: takes a [`TurnInput`] and returns the new state plus a list of
//! [`TurnAction`]s. The async layer runs the actions in order: delegate
//! notifications are awaited, broadcasts are fire-and-forget, and timers are
//! spawned or cancelled.
//!
//! Every transition is a no-op when the machine is already in the target
//! state.

use std::time::Duration;

use crate::events::ConversationEvent;
use crate::mode::{Speaker, TurnMode};

/// Turn-taking inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    /// Speech from the user was detected.
    UserStartedSpeaking,
    /// The user went quiet.
    UserStoppedSpeaking,
    /// Reply audio started playing.
    AssistantStartedSpeaking,
    /// Reply audio finished.
    AssistantFinishedSpeaking,
    /// Close the user's turn.
    EndUserTurn,
    /// Cut the assistant off.
    InterruptAssistant,
    /// A manual-mode timer fired.
    TimeoutElapsed {
        /// Generation the timer was started with.
        generation: u64,
    },
    /// Replace the turn mode.
    UpdateMode(TurnMode),
}

/// Work for the async layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    /// Tell the delegate the assistant was interrupted (awaited).
    NotifyInterruption,
    /// Tell the delegate the user's turn ended (awaited).
    NotifyUserTurnEnded,
    /// Start a timer that feeds back `TimeoutElapsed { generation }`.
    StartTimer {
        /// How long to wait.
        timeout: Duration,
        /// Token the timer must echo back.
        generation: u64,
    },
    /// Cancel the running timer.
    CancelTimer,
    /// Broadcast to observers.
    Emit(ConversationEvent),
}

/// Turn-taking state.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnMachine {
    speaker: Speaker,
    mode: TurnMode,
    /// The user stopped speaking in manual mode and the turn is not closed yet.
    user_turn_open: bool,
    /// Incremented whenever a timer is started or cancelled.
    timer_generation: u64,
    timer_armed: bool,
}

impl TurnMachine {
    /// Create a machine with nobody speaking.
    pub fn new(mode: TurnMode) -> Self {
        Self {
            speaker: Speaker::Neither,
            mode,
            user_turn_open: false,
            timer_generation: 0,
            timer_armed: false,
        }
    }

    /// Who holds the turn.
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    /// Current turn mode.
    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    /// Whether a manual-mode timer is running.
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Process an input and return the new state plus actions to execute.
    pub fn on_event(mut self, input: TurnInput) -> (Self, Vec<TurnAction>) {
        let mut actions = Vec::new();
        match input {
            TurnInput::UserStartedSpeaking => {
                if self.speaker == Speaker::User {
                    return (self, actions);
                }
                self.cancel_timer(&mut actions);
                let from = self.speaker;
                if from == Speaker::Assistant && self.mode.is_automatic() {
                    actions.push(TurnAction::NotifyInterruption);
                    actions.push(TurnAction::Emit(ConversationEvent::AssistantInterrupted));
                }
                self.speaker = Speaker::User;
                self.user_turn_open = false;
                actions.push(TurnAction::Emit(ConversationEvent::SpeakingStarted {
                    speaker: Speaker::User,
                }));
                actions.push(turn_changed(from, Speaker::User));
            }

            TurnInput::UserStoppedSpeaking => {
                if self.speaker != Speaker::User {
                    return (self, actions);
                }
                self.speaker = Speaker::Neither;
                actions.push(TurnAction::Emit(ConversationEvent::SpeakingStopped {
                    speaker: Speaker::User,
                }));
                actions.push(turn_changed(Speaker::User, Speaker::Neither));
                if self.mode.is_manual() {
                    self.user_turn_open = true;
                }
                if let Some(timeout) = self.mode.manual_timeout() {
                    self.timer_generation += 1;
                    self.timer_armed = true;
                    actions.push(TurnAction::StartTimer {
                        timeout,
                        generation: self.timer_generation,
                    });
                }
            }

            TurnInput::AssistantStartedSpeaking => {
                if self.speaker == Speaker::Assistant {
                    return (self, actions);
                }
                self.cancel_timer(&mut actions);
                let from = self.speaker;
                self.speaker = Speaker::Assistant;
                self.user_turn_open = false;
                actions.push(TurnAction::Emit(ConversationEvent::SpeakingStarted {
                    speaker: Speaker::Assistant,
                }));
                actions.push(turn_changed(from, Speaker::Assistant));
            }

            TurnInput::AssistantFinishedSpeaking => {
                if self.speaker != Speaker::Assistant {
                    return (self, actions);
                }
                self.speaker = Speaker::Neither;
                actions.push(TurnAction::Emit(ConversationEvent::SpeakingStopped {
                    speaker: Speaker::Assistant,
                }));
                actions.push(turn_changed(Speaker::Assistant, Speaker::Neither));
            }

            TurnInput::EndUserTurn => {
                self.end_user_turn(&mut actions);
            }

            TurnInput::TimeoutElapsed { generation } => {
                if !self.timer_armed || generation != self.timer_generation {
                    return (self, actions);
                }
                self.timer_armed = false;
                self.end_user_turn(&mut actions);
            }

            TurnInput::InterruptAssistant => {
                if self.speaker != Speaker::Assistant {
                    return (self, actions);
                }
                self.speaker = Speaker::Neither;
                actions.push(TurnAction::NotifyInterruption);
                actions.push(TurnAction::Emit(ConversationEvent::AssistantInterrupted));
                actions.push(turn_changed(Speaker::Assistant, Speaker::Neither));
            }

            TurnInput::UpdateMode(mode) => {
                self.cancel_timer(&mut actions);
                self.user_turn_open = false;
                self.mode = mode;
            }
        }
        (self, actions)
    }

    fn end_user_turn(&mut self, actions: &mut Vec<TurnAction>) {
        let speaking = self.speaker == Speaker::User;
        if !speaking && !self.user_turn_open {
            return;
        }
        self.cancel_timer(actions);
        self.user_turn_open = false;
        actions.push(TurnAction::NotifyUserTurnEnded);
        actions.push(TurnAction::Emit(ConversationEvent::UserTurnEnded));
        if speaking {
            self.speaker = Speaker::Neither;
            actions.push(turn_changed(Speaker::User, Speaker::Neither));
        }
    }

    fn cancel_timer(&mut self, actions: &mut Vec<TurnAction>) {
        if self.timer_armed {
            self.timer_armed = false;
            self.timer_generation += 1;
            actions.push(TurnAction::CancelTimer);
        }
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new(TurnMode::default())
    }
}

fn turn_changed(from: Speaker, to: Speaker) -> TurnAction {
    TurnAction::Emit(ConversationEvent::TurnChanged { from, to })
}
