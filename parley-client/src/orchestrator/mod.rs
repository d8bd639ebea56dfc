//! ConversationOrchestrator - the main interface for Parley.
//!
//! One orchestrator owns one conversation: its id, one sequencer for the
//! conversation's lifetime, and exactly one active mode.
//!
//! # Architecture
//!
//! ```text
//!                       ┌─ audio: DuplexSession ─ inbound pump ─┐
//! Application → Orchestrator                                    ├→ SequencerHandle → subscribers
//!                       └─ text: StreamingSession ─ collector ──┘         ↓
//!                                                                      EventBus
//! ```
//!
//! Mode switches connect the new transport before touching the old one, so
//! a failed switch leaves the previous mode in place.
//!
//! # Example
//!
//! ```ignore
//! let config = ConversationConfig::load(Path::new("parley.toml"))?;
//! let credentials = config.credentials()?;
//! let factory = Arc::new(DefaultTransportFactory::new(config.service.clone()));
//! let chat = ConversationOrchestrator::start(
//!     config, credentials, factory, Arc::new(NoTools), Arc::new(NullAudio),
//! ).await?;
//!
//! chat.send("Hello").await?;
//! chat.switch_mode(ConversationMode::Audio).await?;
//! ```

mod pump;
mod text;

use std::sync::Arc;

use parley_core::{ConversationEvent, ConversationMode, EnqueueRequest, TurnMode};
use parley_types::{
    ClientFrame, ConversationId, InputItem, Message, MessageId, ResponseRequest, Role,
    SessionConfig,
};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::audio::{AudioDevice, OutputRoute};
use crate::bus::EventBus;
use crate::config::{ConversationConfig, Credentials};
use crate::error::ClientError;
use crate::sequencer::{MessageStream, SequencerHandle};
use crate::tools::{run_tool, ToolDispatcher};
use crate::transport::{
    ConnectParams, DisconnectKind, DuplexSession, StreamingSession, TransportError,
    TransportFactory,
};
use crate::turn::TurnCoordinator;

use pump::{AudioDelegate, Pump};
use text::collect_response;

/// Upper bound on request rounds spent resolving tool calls in text mode.
const MAX_TOOL_ROUNDS: usize = 8;

/// What `send` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReceipt {
    /// The message was submitted; the reply arrives through subscriptions.
    Queued(MessageId),
    /// The reply, finalized in history.
    Replied(Message),
    /// The message was submitted and kept in history, but asking the service
    /// for a reply failed. Sending the text again would duplicate it.
    ReplyNotRequested {
        /// The submitted message.
        id: MessageId,
        /// Why the reply request failed.
        reason: String,
    },
}

struct AudioSide {
    transport: Arc<dyn DuplexSession>,
    turns: TurnCoordinator,
    pump: JoinHandle<()>,
}

impl AudioSide {
    async fn close(&self, audio: &dyn AudioDevice) -> DisconnectKind {
        self.pump.abort();
        self.turns.shutdown().await;
        if let Err(e) = audio.stop_playback().await {
            tracing::warn!("Could not stop playback: {}", e);
        }
        if let Err(e) = audio.stop_capture().await {
            tracing::warn!("Could not stop capture: {}", e);
        }
        self.transport.disconnect().await
    }
}

impl Drop for AudioSide {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct TextSide {
    transport: Arc<dyn StreamingSession>,
}

enum ActiveMode {
    Audio(AudioSide),
    Text(TextSide),
}

impl ActiveMode {
    fn mode(&self) -> ConversationMode {
        match self {
            ActiveMode::Audio(_) => ConversationMode::Audio,
            ActiveMode::Text(_) => ConversationMode::Text,
        }
    }

    async fn close(&self, audio: &dyn AudioDevice) -> DisconnectKind {
        match self {
            ActiveMode::Audio(side) => side.close(audio).await,
            ActiveMode::Text(side) => side.transport.disconnect().await,
        }
    }
}

struct State {
    active: ActiveMode,
    turn_mode: TurnMode,
}

/// Everything except the active mode.
struct Context {
    id: ConversationId,
    config: ConversationConfig,
    credentials: Credentials,
    factory: Arc<dyn TransportFactory>,
    tools: Arc<dyn ToolDispatcher>,
    audio: Arc<dyn AudioDevice>,
    sequencer: SequencerHandle,
    bus: EventBus,
}

impl Context {
    async fn connect(
        &self,
        mode: ConversationMode,
        turn_mode: TurnMode,
    ) -> Result<ActiveMode, ClientError> {
        match mode {
            ConversationMode::Audio => Ok(ActiveMode::Audio(self.connect_audio(turn_mode).await?)),
            ConversationMode::Text => Ok(ActiveMode::Text(self.connect_text().await?)),
        }
    }

    async fn connect_audio(&self, turn_mode: TurnMode) -> Result<AudioSide, ClientError> {
        let transport = self.factory.duplex()?;
        let status = transport.connection_status();
        transport
            .connect(&ConnectParams {
                credentials: self.credentials.clone(),
                model: self.config.session.realtime_model.clone(),
                session: self.session_config(&turn_mode),
            })
            .await?;
        tokio::spawn(watch_status(status, self.bus.clone()));

        let Some(inbound) = transport.take_inbound().await else {
            transport.disconnect().await;
            return Err(TransportError::NotConnected.into());
        };
        if let Err(e) = self.audio.start_capture().await {
            transport.disconnect().await;
            return Err(e.into());
        }

        let delegate = Arc::new(AudioDelegate {
            transport: Arc::clone(&transport),
            audio: Arc::clone(&self.audio),
        });
        let turns = TurnCoordinator::new(turn_mode, delegate, self.bus.clone());
        let pump = Pump::new(
            self.sequencer.clone(),
            turns.clone(),
            Arc::clone(&transport),
            Arc::clone(&self.tools),
            Arc::clone(&self.audio),
            self.bus.clone(),
            self.config.session.transcription_model().is_some(),
        );
        let pump = tokio::spawn(pump.run(inbound));

        Ok(AudioSide {
            transport,
            turns,
            pump,
        })
    }

    async fn connect_text(&self) -> Result<TextSide, ClientError> {
        let transport = self.factory.streaming()?;
        let status = transport.connection_status();
        transport
            .connect(&ConnectParams {
                credentials: self.credentials.clone(),
                model: self.config.session.text_model.clone(),
                session: SessionConfig::default(),
            })
            .await?;
        tokio::spawn(watch_status(status, self.bus.clone()));
        Ok(TextSide { transport })
    }

    fn session_config(&self, turn_mode: &TurnMode) -> SessionConfig {
        self.config.session_config(self.tools.definitions(), turn_mode)
    }

    /// Audio mode: submit the text, then let the reply stream in.
    async fn send_audio_text(
        &self,
        side: &AudioSide,
        turn_mode: &TurnMode,
        text: &str,
    ) -> Result<SendReceipt, ClientError> {
        let id = MessageId::generate();
        side.transport
            .send(&ClientFrame::create_message(Some(id.clone()), Role::User, text))
            .await?;
        self.sequencer
            .enqueue(EnqueueRequest::text(Role::User, text).with_id(id.clone()))
            .await?;
        // The remote detector only triggers replies to speech.
        if turn_mode.is_manual() {
            if let Err(e) = side.transport.send(&ClientFrame::ResponseCreate).await {
                tracing::warn!("Message {} kept, but no reply was requested: {}", id, e);
                self.bus.publish(ConversationEvent::Error {
                    message: e.to_string(),
                });
                return Ok(SendReceipt::ReplyNotRequested {
                    id,
                    reason: e.to_string(),
                });
            }
        }
        Ok(SendReceipt::Queued(id))
    }

    /// Text mode: one request over the full history, plus tool rounds.
    async fn send_text(&self, side: &TextSide, text: &str) -> Result<SendReceipt, ClientError> {
        self.sequencer
            .enqueue(EnqueueRequest::text(Role::User, text))
            .await?;

        let mut input: Vec<InputItem> = self
            .sequencer
            .ordered_messages()
            .await
            .iter()
            .filter(|m| m.role != Role::Tool)
            .map(|m| InputItem::message(m.role, m.text_or_empty()))
            .collect();
        let tools = self.tools.definitions();

        for round in 0..MAX_TOOL_ROUNDS {
            let request = ResponseRequest {
                model: self.config.session.text_model.clone(),
                instructions: self.config.session.instructions.clone(),
                input: input.clone(),
                tools: tools.clone(),
                stream: true,
            };
            tracing::debug!("Text request round {} ({} items)", round, input.len());
            let reply = collect_response(Arc::clone(&side.transport), request).await?;

            let calls = reply.payload.function_calls();
            if calls.is_empty() {
                let enqueued = self
                    .sequencer
                    .enqueue(EnqueueRequest::text(Role::Assistant, reply.into_text()))
                    .await?;
                let finalized = enqueued
                    .finalized
                    .into_iter()
                    .find(|m| m.id == enqueued.id);
                return Ok(match finalized {
                    Some(message) => SendReceipt::Replied(message),
                    None => SendReceipt::Queued(enqueued.id),
                });
            }

            for call in calls {
                self.bus.publish(ConversationEvent::ToolCallRequested {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                });
                let outcome = run_tool(self.tools.as_ref(), &call).await;
                input.push(InputItem::from(&call));
                input.push(InputItem::FunctionCallOutput {
                    call_id: call.call_id.clone(),
                    output: outcome.output,
                });
                self.bus.publish(ConversationEvent::ToolCallSubmitted {
                    call_id: call.call_id,
                    is_error: outcome.is_error,
                });
            }
        }

        Err(ClientError::ResponseFailed(format!(
            "no reply after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }
}

/// Publish one session's status transitions, ending with its disconnect.
async fn watch_status(mut status: watch::Receiver<bool>, bus: EventBus) {
    while status.changed().await.is_ok() {
        let connected = *status.borrow_and_update();
        tracing::info!(
            "Transport {}",
            if connected { "connected" } else { "disconnected" }
        );
        bus.publish(ConversationEvent::ConnectionStatusChanged { connected });
        if !connected {
            break;
        }
    }
}

/// Replay history into a fresh duplex session, oldest first.
async fn replay(transport: &dyn DuplexSession, history: &[Message]) -> Result<(), ClientError> {
    tracing::info!("Replaying {} messages", history.len());
    for message in history {
        transport
            .send(&ClientFrame::create_message(
                Some(message.id.clone()),
                message.role,
                message.text_or_empty(),
            ))
            .await?;
    }
    Ok(())
}

/// A running conversation.
pub struct ConversationOrchestrator {
    ctx: Context,
    state: Mutex<State>,
    mode: watch::Sender<ConversationMode>,
}

impl ConversationOrchestrator {
    /// Connect the configured initial mode and return the running conversation.
    pub async fn start(
        config: ConversationConfig,
        credentials: Credentials,
        factory: Arc<dyn TransportFactory>,
        tools: Arc<dyn ToolDispatcher>,
        audio: Arc<dyn AudioDevice>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let bus = EventBus::new();
        let ctx = Context {
            id: ConversationId::new(),
            sequencer: SequencerHandle::new(bus.clone()),
            bus,
            config,
            credentials,
            factory,
            tools,
            audio,
        };

        let initial = ctx.config.session.initial_mode;
        let turn_mode = ctx.config.turn_mode();
        let active = ctx.connect(initial, turn_mode).await?;
        tracing::info!("Conversation {} started in {} mode", ctx.id, initial);

        let (mode, _) = watch::channel(initial);
        Ok(Self {
            ctx,
            state: Mutex::new(State { active, turn_mode }),
            mode,
        })
    }

    /// Conversation id.
    pub fn id(&self) -> ConversationId {
        self.ctx.id
    }

    /// Active mode.
    pub fn mode(&self) -> ConversationMode {
        *self.mode.borrow()
    }

    /// Observe mode changes.
    pub fn mode_changes(&self) -> watch::Receiver<ConversationMode> {
        self.mode.subscribe()
    }

    /// Observable events.
    pub fn events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.ctx.bus.subscribe()
    }

    /// Snapshot of the finalized history.
    pub async fn messages(&self) -> Vec<Message> {
        self.ctx.sequencer.ordered_messages().await
    }

    /// Look up a finalized message.
    pub async fn message(&self, id: &MessageId) -> Option<Message> {
        self.ctx.sequencer.message(id).await
    }

    /// Finalized messages: the backlog, then each new one as it finalizes.
    pub async fn subscribe_messages(&self) -> MessageStream {
        self.ctx.sequencer.subscribe().await
    }

    /// Drop the history and restart numbering. Subscriptions end.
    pub async fn clear_history(&self) {
        self.ctx.sequencer.clear().await;
    }

    /// Send a user text message through the active mode.
    ///
    /// In text mode this waits for the reply. In audio mode it returns once
    /// the message is submitted.
    pub async fn send(&self, text: &str) -> Result<SendReceipt, ClientError> {
        let state = self.state.lock().await;
        match &state.active {
            ActiveMode::Audio(side) => {
                self.ctx
                    .send_audio_text(side, &state.turn_mode, text)
                    .await
            }
            ActiveMode::Text(side) => self.ctx.send_text(side, text).await,
        }
    }

    /// Move the conversation to another mode.
    ///
    /// The new transport is connected first. On any failure the previous
    /// mode stays active and the error is returned.
    pub async fn switch_mode(&self, target: ConversationMode) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        let from = state.active.mode();
        if from == target {
            return Ok(());
        }
        self.ctx.bus.publish(ConversationEvent::ModeSwitching { from, to: target });
        tracing::info!("Switching {} -> {}", from, target);

        let next = self.ctx.connect(target, state.turn_mode).await?;
        if let ActiveMode::Audio(side) = &next {
            let history = self.ctx.sequencer.ordered_messages().await;
            if let Err(e) = replay(side.transport.as_ref(), &history).await {
                tracing::warn!("Replay failed, staying in {} mode: {}", from, e);
                next.close(self.ctx.audio.as_ref()).await;
                return Err(e);
            }
        }

        let previous = std::mem::replace(&mut state.active, next);
        previous.close(self.ctx.audio.as_ref()).await;
        if target == ConversationMode::Text {
            // No transcript can arrive once the duplex session is gone.
            self.ctx.sequencer.flush_pending().await;
        }

        self.mode.send_replace(target);
        self.ctx.bus.publish(ConversationEvent::ModeSwitched { from, to: target });
        tracing::info!("Now in {} mode", target);
        Ok(())
    }

    /// Disconnect the active transport. Later sends fail until a mode switch
    /// reconnects.
    pub async fn shutdown(&self) -> DisconnectKind {
        let state = self.state.lock().await;
        let kind = state.active.close(self.ctx.audio.as_ref()).await;
        tracing::info!("Conversation {} shut down ({:?})", self.ctx.id, kind);
        kind
    }

    async fn audio_side(
        &self,
        operation: &'static str,
    ) -> Result<(Arc<dyn DuplexSession>, TurnCoordinator), ClientError> {
        let state = self.state.lock().await;
        match &state.active {
            ActiveMode::Audio(side) => Ok((Arc::clone(&side.transport), side.turns.clone())),
            ActiveMode::Text(_) => Err(ClientError::State {
                operation,
                mode: ConversationMode::Text,
            }),
        }
    }

    /// Append captured audio to the remote input buffer.
    pub async fn send_audio(&self, chunk: &[u8]) -> Result<(), ClientError> {
        let (transport, _) = self.audio_side("send_audio").await?;
        transport.send_audio(chunk).await?;
        Ok(())
    }

    /// Mute or unmute capture.
    pub async fn set_muted(&self, muted: bool) -> Result<(), ClientError> {
        self.audio_side("set_muted").await?;
        self.ctx.audio.set_muted(muted).await?;
        Ok(())
    }

    /// Choose the playback route.
    pub async fn set_output_route(&self, route: OutputRoute) -> Result<(), ClientError> {
        self.audio_side("set_output_route").await?;
        self.ctx.audio.set_output_route(route).await?;
        Ok(())
    }

    /// Mark the user as speaking (local voice detection).
    pub async fn start_user_turn(&self) -> Result<(), ClientError> {
        let (_, turns) = self.audio_side("start_user_turn").await?;
        turns.user_started_speaking().await
    }

    /// Close the user's turn and ask for a reply.
    pub async fn end_user_turn(&self) -> Result<(), ClientError> {
        let (_, turns) = self.audio_side("end_user_turn").await?;
        turns.end_user_turn().await
    }

    /// Cut the assistant off.
    pub async fn interrupt(&self) -> Result<(), ClientError> {
        let (_, turns) = self.audio_side("interrupt").await?;
        turns.interrupt_assistant().await
    }

    /// Change the turn mode of the live duplex session.
    pub async fn update_turn_mode(&self, turn_mode: TurnMode) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        let ActiveMode::Audio(side) = &state.active else {
            return Err(ClientError::State {
                operation: "update_turn_mode",
                mode: ConversationMode::Text,
            });
        };
        side.transport
            .send(&ClientFrame::SessionUpdate {
                session: self.ctx.session_config(&turn_mode),
            })
            .await?;
        side.turns.update_mode(turn_mode).await?;
        state.turn_mode = turn_mode;
        Ok(())
    }

    /// Turn coordinator of the live duplex session, for a local VAD driver.
    pub async fn turns(&self) -> Result<TurnCoordinator, ClientError> {
        let (_, turns) = self.audio_side("turns").await?;
        Ok(turns)
    }
}
