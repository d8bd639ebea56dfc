//! Audio-mode inbound pump.
//!
//! Drains the duplex session's decoded frames in arrival order and turns each
//! into calls on the turn coordinator, the sequencer, the audio device and
//! the tool dispatcher. Runs as one task per duplex connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use parley_core::{ConversationEvent, EnqueueRequest, SequencerError};
use parley_types::{
    ClientFrame, Decoded, MessageId, ResponseInfo, Role, ServerEvent, ServerItem, ToolCall,
    TranscriptStatus,
};
use tokio::task::JoinHandle;

use crate::audio::AudioDevice;
use crate::bus::EventBus;
use crate::error::ClientError;
use crate::sequencer::SequencerHandle;
use crate::tools::{run_tool, ToolDispatcher};
use crate::transport::{DuplexSession, InboundFrames, TransportError};
use crate::turn::{TurnCoordinator, TurnDelegate};

/// Turn delegate for a duplex session: acts on the remote reply.
pub(super) struct AudioDelegate {
    pub(super) transport: Arc<dyn DuplexSession>,
    pub(super) audio: Arc<dyn AudioDevice>,
}

#[async_trait]
impl TurnDelegate for AudioDelegate {
    async fn assistant_interrupted(&self) -> Result<(), ClientError> {
        tracing::debug!("Cancelling in-flight reply");
        self.audio.stop_playback().await?;
        self.transport.send(&ClientFrame::ResponseCancel).await?;
        Ok(())
    }

    async fn user_turn_ended(&self) -> Result<(), ClientError> {
        tracing::debug!("Committing user audio");
        self.transport
            .send(&ClientFrame::InputAudioBufferCommit)
            .await?;
        self.transport.send(&ClientFrame::ResponseCreate).await?;
        Ok(())
    }
}

/// Per-connection state of the inbound pump.
pub(super) struct Pump {
    sequencer: SequencerHandle,
    turns: TurnCoordinator,
    transport: Arc<dyn DuplexSession>,
    tools: Arc<dyn ToolDispatcher>,
    audio: Arc<dyn AudioDevice>,
    bus: EventBus,
    /// Whether user audio items will receive a transcript.
    transcribe_input: bool,
    /// Accumulated transcript or text deltas per assistant item.
    partials: HashMap<MessageId, String>,
    /// Assistant items announced per response.
    responses: HashMap<String, Vec<MessageId>>,
    /// Response whose audio is currently arriving.
    speaking: Option<String>,
    /// Waits for the device to finish playing, then releases the turn.
    drain: Option<JoinHandle<()>>,
}

impl Drop for Pump {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

impl Pump {
    pub(super) fn new(
        sequencer: SequencerHandle,
        turns: TurnCoordinator,
        transport: Arc<dyn DuplexSession>,
        tools: Arc<dyn ToolDispatcher>,
        audio: Arc<dyn AudioDevice>,
        bus: EventBus,
        transcribe_input: bool,
    ) -> Self {
        Self {
            sequencer,
            turns,
            transport,
            tools,
            audio,
            bus,
            transcribe_input,
            partials: HashMap::new(),
            responses: HashMap::new(),
            speaking: None,
            drain: None,
        }
    }

    pub(super) async fn run(mut self, mut inbound: InboundFrames) {
        while let Some(decoded) = inbound.recv().await {
            match decoded {
                Decoded::Event(event) => self.handle(event).await,
                Decoded::Passthrough { kind, .. } => tracing::trace!("<- {} (unhandled)", kind),
            }
        }
        tracing::debug!("Inbound pump finished");
    }

    async fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { .. } => tracing::debug!("<- session.created"),
            ServerEvent::SessionUpdated { .. } => tracing::debug!("<- session.updated"),

            ServerEvent::SpeechStarted { .. } => {
                let result = self.turns.user_started_speaking().await;
                self.report(result);
            }
            ServerEvent::SpeechStopped { .. } => {
                let result = self.turns.user_stopped_speaking().await;
                self.report(result);
            }
            ServerEvent::AudioCommitted { item_id, .. } => {
                tracing::debug!("<- input audio committed as {}", item_id);
            }

            ServerEvent::ItemCreated { item, .. } => self.item_created(item).await,

            ServerEvent::InputTranscriptionCompleted {
                item_id,
                transcript,
            } => {
                let result = self.sequencer.update_transcript(&item_id, transcript).await;
                transcript_result(&item_id, result);
            }
            ServerEvent::InputTranscriptionFailed { item_id, error } => {
                tracing::warn!(
                    "Transcription failed for {}: {}",
                    item_id,
                    error.map(|e| e.message).unwrap_or_default()
                );
                let result = self.sequencer.update_transcript(&item_id, "").await;
                transcript_result(&item_id, result);
                self.bus
                    .publish(ConversationEvent::TranscriptFailed { id: item_id });
            }

            ServerEvent::ResponseCreated { response } => {
                tracing::debug!("<- response {} created", response.id);
            }
            ServerEvent::OutputItemAdded { response_id, item } => {
                self.output_item_added(response_id, item).await;
            }

            ServerEvent::AudioDelta {
                response_id, delta, ..
            } => self.audio_delta(response_id, &delta).await,
            ServerEvent::AudioDone { .. } => self.assistant_finished(),

            ServerEvent::AudioTranscriptDelta { item_id, delta, .. }
            | ServerEvent::TextDelta { item_id, delta, .. } => {
                self.partials.entry(item_id).or_default().push_str(&delta);
            }
            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript: text,
                ..
            }
            | ServerEvent::TextDone { item_id, text, .. } => {
                self.partials.remove(&item_id);
                let result = self.sequencer.update_transcript(&item_id, text).await;
                transcript_result(&item_id, result);
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => {
                self.call_tool(ToolCall {
                    call_id,
                    name,
                    arguments,
                })
                .await;
            }

            ServerEvent::ResponseDone { response } => self.response_done(response).await,

            ServerEvent::Error { error } => {
                tracing::warn!("Service error: {}", error.message);
                self.bus.publish(ConversationEvent::Error {
                    message: error.message,
                });
            }

            ServerEvent::Unrecognized => {}
        }
    }

    async fn item_created(&mut self, item: ServerItem) {
        if !item.is_message() || item.role != Some(Role::User) {
            return;
        }
        // Our own text sends and replayed history carry ids we already hold.
        if self.sequencer.contains(&item.id).await {
            return;
        }
        if !item.has_audio() {
            tracing::debug!("Ignoring foreign text item {}", item.id);
            return;
        }

        let request = match item.known_text() {
            Some(text) => EnqueueRequest::text(Role::User, text).with_id(item.id.clone()),
            None if self.transcribe_input => EnqueueRequest::slot(item.id.clone(), Role::User),
            None => EnqueueRequest {
                id: Some(item.id.clone()),
                role: Role::User,
                text: None,
                audio: None,
                status: TranscriptStatus::NotApplicable,
            },
        };
        if let Err(e) = self.sequencer.enqueue(request).await {
            tracing::warn!("Could not track user item {}: {}", item.id, e);
        }
    }

    async fn output_item_added(&mut self, response_id: String, item: ServerItem) {
        if !item.is_message() || item.role == Some(Role::User) {
            return;
        }
        if self.sequencer.contains(&item.id).await {
            return;
        }
        let request = match item.known_text() {
            Some(text) => EnqueueRequest::text(Role::Assistant, text).with_id(item.id.clone()),
            None => EnqueueRequest::slot(item.id.clone(), Role::Assistant),
        };
        match self.sequencer.enqueue(request).await {
            Ok(_) => self.responses.entry(response_id).or_default().push(item.id),
            Err(e) => tracing::warn!("Could not track assistant item {}: {}", item.id, e),
        }
    }

    async fn audio_delta(&mut self, response_id: String, delta: &str) {
        if self.speaking.as_deref() != Some(response_id.as_str()) {
            // A new reply keeps the turn that the previous one was releasing.
            if let Some(drain) = self.drain.take() {
                drain.abort();
            }
            self.speaking = Some(response_id);
            let result = self.turns.assistant_started_speaking().await;
            self.report(result);
        }
        match base64::engine::general_purpose::STANDARD.decode(delta) {
            Ok(chunk) => {
                if let Err(e) = self.audio.play(&chunk).await {
                    tracing::warn!("Playback failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("Dropping undecodable audio delta: {}", e),
        }
    }

    /// The reply's audio has all arrived; the turn ends once it has been heard.
    fn assistant_finished(&mut self) {
        if self.speaking.take().is_none() {
            return;
        }
        let audio = Arc::clone(&self.audio);
        let turns = self.turns.clone();
        let bus = self.bus.clone();
        self.drain = Some(tokio::spawn(async move {
            if let Err(e) = audio.playback_drained().await {
                tracing::warn!("Playback did not drain: {}", e);
            }
            if let Err(e) = turns.assistant_finished_speaking().await {
                bus.publish(ConversationEvent::Error {
                    message: e.to_string(),
                });
            }
        }));
    }

    async fn response_done(&mut self, response: ResponseInfo) {
        self.assistant_finished();
        if !response.is_completed() {
            tracing::debug!(
                "Response {} ended with status {}",
                response.id,
                response.status.as_deref().unwrap_or("unknown")
            );
        }

        // Items the response never finished still have to leave the queue.
        let mut ids = self.responses.remove(&response.id).unwrap_or_default();
        for item in &response.output {
            if item.is_message() && !ids.contains(&item.id) {
                ids.push(item.id.clone());
            }
        }
        for id in ids {
            if !self.sequencer.is_pending(&id).await {
                self.partials.remove(&id);
                continue;
            }
            let text = self
                .partials
                .remove(&id)
                .or_else(|| {
                    response
                        .output
                        .iter()
                        .find(|item| item.id == id)
                        .and_then(ServerItem::known_text)
                })
                .unwrap_or_default();
            let result = self.sequencer.update_transcript(&id, text).await;
            transcript_result(&id, result);
        }
    }

    async fn call_tool(&mut self, call: ToolCall) {
        self.bus.publish(ConversationEvent::ToolCallRequested {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
        });
        let outcome = run_tool(self.tools.as_ref(), &call).await;

        let sent = self.submit_tool_output(&call.call_id, &outcome.output).await;
        match sent {
            Ok(()) => {
                self.bus.publish(ConversationEvent::ToolCallSubmitted {
                    call_id: call.call_id,
                    is_error: outcome.is_error,
                });
            }
            Err(e) => {
                tracing::warn!("Could not submit output of {}: {}", call.call_id, e);
                self.bus.publish(ConversationEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    async fn submit_tool_output(&self, call_id: &str, output: &str) -> Result<(), TransportError> {
        self.transport
            .send(&ClientFrame::tool_output(call_id, output))
            .await?;
        self.transport.send(&ClientFrame::ResponseCreate).await
    }

    fn report(&self, result: Result<(), ClientError>) {
        if let Err(e) = result {
            self.bus.publish(ConversationEvent::Error {
                message: e.to_string(),
            });
        }
    }
}

fn transcript_result<T>(id: &MessageId, result: Result<T, SequencerError>) {
    if let Err(e) = result {
        tracing::warn!("Transcript for {} not applied: {}", id, e);
    }
}
