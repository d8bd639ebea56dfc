//! Duplex (realtime) protocol frames.
//!
//! Client frames go out over the persistent socket; server events come back
//! on the same socket. Every frame is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, Decoded, TaggedEvent};
use crate::response::ApiError;
use crate::{FrameError, MessageId, Role, ToolDefinition};

/// Frames sent from client to service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Replace session settings
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// New settings
        session: SessionConfig,
    },
    /// Append base64-encoded audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64 audio bytes
        audio: String,
    },
    /// Commit the input buffer as a user item
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    /// Discard uncommitted input audio
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    /// Add an item to the remote conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item
        item: ConversationItem,
    },
    /// Ask the service to generate a reply
    #[serde(rename = "response.create")]
    ResponseCreate,
    /// Cancel the in-flight reply
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientFrame {
    /// A `conversation.item.create` frame carrying a text message.
    ///
    /// The content-type tag depends on the author: assistant text is `text`,
    /// everything else is `input_text`.
    pub fn create_message(id: Option<MessageId>, role: Role, text: &str) -> Self {
        ClientFrame::ConversationItemCreate {
            item: ConversationItem::Message {
                id,
                role,
                content: vec![ContentPart::for_role(role, text)],
            },
        }
    }

    /// A `conversation.item.create` frame carrying a tool result.
    pub fn tool_output(call_id: &str, output: &str) -> Self {
        ClientFrame::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: output.to_string(),
            },
        }
    }

    /// Wire name of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::SessionUpdate { .. } => "session.update",
            ClientFrame::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientFrame::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientFrame::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientFrame::ConversationItemCreate { .. } => "conversation.item.create",
            ClientFrame::ResponseCreate => "response.create",
            ClientFrame::ResponseCancel => "response.cancel",
        }
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String, FrameError> {
        codec::encode(self)
    }
}

/// An item added to the remote conversation by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// A role-tagged message
    Message {
        /// Client-chosen item id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
        /// Author
        role: Role,
        /// Content parts
        content: Vec<ContentPart>,
    },
    /// Result of a tool call
    FunctionCallOutput {
        /// Call correlation id
        call_id: String,
        /// Tool output
        output: String,
    },
}

/// One content part of a client message item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text authored by the user side
    InputText {
        /// The text
        text: String,
    },
    /// Text authored by the assistant side
    Text {
        /// The text
        text: String,
    },
    /// Base64 audio authored by the user side
    InputAudio {
        /// Base64 audio bytes
        audio: String,
    },
}

impl ContentPart {
    /// Text content tagged for the given author.
    pub fn for_role(role: Role, text: &str) -> Self {
        match role {
            Role::Assistant => ContentPart::Text {
                text: text.to_string(),
            },
            Role::User | Role::System | Role::Tool => ContentPart::InputText {
                text: text.to_string(),
            },
        }
    }
}

/// Session settings sent with `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Output voice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Output modalities (`text`, `audio`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modalities: Vec<String>,
    /// Callable tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Transcription of user audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    /// Server-side voice activity detection; `null` disables it
    #[serde(default)]
    pub turn_detection: Option<TurnDetection>,
}

/// Input transcription settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Transcription model
    pub model: String,
}

/// Server VAD settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    /// Detector kind (`server_vad`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Activation threshold, 0.0 to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Audio kept before detected speech
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    /// Silence that ends a user turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
    /// Whether the service starts a reply when the user stops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_response: Option<bool>,
    /// Whether detected speech cancels an in-flight reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_response: Option<bool>,
}

impl TurnDetection {
    /// Server VAD with the given tuning.
    ///
    /// The service starts replies on its own but leaves cancelling them to
    /// the client, which does so when it detects an interruption.
    pub fn server_vad(threshold: f32, prefix_padding_ms: u32, silence_duration_ms: u32) -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: Some(threshold),
            prefix_padding_ms: Some(prefix_padding_ms),
            silence_duration_ms: Some(silence_duration_ms),
            create_response: Some(true),
            interrupt_response: Some(false),
        }
    }
}

/// An item as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerItem {
    /// Item id
    pub id: MessageId,
    /// `message`, `function_call`, `function_call_output`
    #[serde(rename = "type")]
    pub kind: String,
    /// Author, for message items
    #[serde(default)]
    pub role: Option<Role>,
    /// `in_progress`, `completed`, `incomplete`
    #[serde(default)]
    pub status: Option<String>,
    /// Content parts
    #[serde(default)]
    pub content: Vec<ServerContent>,
}

impl ServerItem {
    /// Whether this is a message item.
    pub fn is_message(&self) -> bool {
        self.kind == "message"
    }

    /// Whether any content part carries audio.
    pub fn has_audio(&self) -> bool {
        self.content
            .iter()
            .any(|c| c.kind == "input_audio" || c.kind == "audio")
    }

    /// Text already known for this item (typed text or a transcript).
    pub fn known_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| c.text.as_deref().or(c.transcript.as_deref()))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

/// A content part as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerContent {
    /// `input_text`, `input_audio`, `text`, `audio`
    #[serde(rename = "type")]
    pub kind: String,
    /// Text content
    #[serde(default)]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default)]
    pub transcript: Option<String>,
}

/// Summary of a response as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    /// Response id
    #[serde(default)]
    pub id: String,
    /// `in_progress`, `completed`, `cancelled`, `failed`, `incomplete`
    #[serde(default)]
    pub status: Option<String>,
    /// Output items
    #[serde(default)]
    pub output: Vec<ServerItem>,
}

impl ResponseInfo {
    /// Whether the response ran to completion.
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

/// Events sent from service to client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session established
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Effective settings
        #[serde(default)]
        session: Value,
    },
    /// Session settings changed
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Effective settings
        #[serde(default)]
        session: Value,
    },
    /// VAD detected the start of user speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Item the speech will become
        #[serde(default)]
        item_id: Option<MessageId>,
        /// Offset into the input stream
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },
    /// VAD detected the end of user speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Item the speech will become
        #[serde(default)]
        item_id: Option<MessageId>,
        /// Offset into the input stream
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },
    /// The input buffer was committed as a user item
    #[serde(rename = "input_audio_buffer.committed")]
    AudioCommitted {
        /// New user item
        item_id: MessageId,
        /// Preceding item
        #[serde(default)]
        previous_item_id: Option<MessageId>,
    },
    /// An item was added to the remote conversation
    #[serde(rename = "conversation.item.created")]
    ItemCreated {
        /// Preceding item
        #[serde(default)]
        previous_item_id: Option<MessageId>,
        /// The item
        item: ServerItem,
    },
    /// Transcript of a user audio item is ready
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        /// User item
        item_id: MessageId,
        /// Transcript
        #[serde(default)]
        transcript: String,
    },
    /// Transcription of a user audio item failed
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptionFailed {
        /// User item
        item_id: MessageId,
        /// Failure details
        #[serde(default)]
        error: Option<ApiError>,
    },
    /// A reply started
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Reply summary
        response: ResponseInfo,
    },
    /// A reply added an output item
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// The item
        item: ServerItem,
    },
    /// Reply audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Output item
        item_id: MessageId,
        /// Base64 audio bytes
        delta: String,
    },
    /// Reply audio finished for an item
    #[serde(rename = "response.audio.done")]
    AudioDone {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Output item
        item_id: MessageId,
    },
    /// Incremental transcript of reply audio
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Output item
        item_id: MessageId,
        /// Transcript fragment
        delta: String,
    },
    /// Final transcript of reply audio
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Output item
        item_id: MessageId,
        /// Full transcript
        #[serde(default)]
        transcript: String,
    },
    /// Incremental reply text (text modality)
    #[serde(rename = "response.text.delta")]
    TextDelta {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Output item
        item_id: MessageId,
        /// Text fragment
        delta: String,
    },
    /// Final reply text (text modality)
    #[serde(rename = "response.text.done")]
    TextDone {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Output item
        item_id: MessageId,
        /// Full text
        #[serde(default)]
        text: String,
    },
    /// The model finished producing tool-call arguments
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Reply id
        #[serde(default)]
        response_id: String,
        /// Call correlation id
        call_id: String,
        /// Function name
        #[serde(default)]
        name: String,
        /// JSON-encoded arguments
        #[serde(default)]
        arguments: String,
    },
    /// A reply ended (completed, cancelled, failed or incomplete)
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Final reply summary
        response: ResponseInfo,
    },
    /// The service reported an error
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },
    #[doc(hidden)]
    #[serde(other)]
    Unrecognized,
}

impl TaggedEvent for ServerEvent {
    fn is_unrecognized(&self) -> bool {
        matches!(self, ServerEvent::Unrecognized)
    }
}

impl ServerEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Decoded<Self>, FrameError> {
        codec::decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ===========================================
    // Client Frame Tests
    // ===========================================

    #[test]
    fn user_message_uses_input_text() {
        let frame = ClientFrame::create_message(None, Role::User, "hello");
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "hello"}]
                }
            })
        );
    }

    #[test]
    fn assistant_message_uses_text() {
        let frame = ClientFrame::create_message(Some("item_7".into()), Role::Assistant, "hi back");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["item"]["id"], "item_7");
        assert_eq!(value["item"]["role"], "assistant");
        assert_eq!(value["item"]["content"][0]["type"], "text");
        assert_eq!(value["item"]["content"][0]["text"], "hi back");
    }

    #[test]
    fn system_message_uses_input_text() {
        let part = ContentPart::for_role(Role::System, "be brief");
        assert!(matches!(part, ContentPart::InputText { .. }));
    }

    #[test]
    fn unit_frames_serialize_as_bare_type() {
        assert_eq!(
            ClientFrame::ResponseCreate.to_json().unwrap(),
            r#"{"type":"response.create"}"#
        );
        assert_eq!(
            ClientFrame::ResponseCancel.to_json().unwrap(),
            r#"{"type":"response.cancel"}"#
        );
        assert_eq!(
            ClientFrame::InputAudioBufferCommit.to_json().unwrap(),
            r#"{"type":"input_audio_buffer.commit"}"#
        );
    }

    #[test]
    fn tool_output_frame_shape() {
        let value = serde_json::to_value(ClientFrame::tool_output("call_1", "{\"ok\":true}")).unwrap();
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "call_1");
    }

    #[test]
    fn session_update_emits_null_turn_detection_when_disabled() {
        let frame = ClientFrame::SessionUpdate {
            session: SessionConfig {
                instructions: Some("be nice".into()),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["session"]["instructions"], "be nice");
        assert!(value["session"]["turn_detection"].is_null());
        assert!(value["session"].get("turn_detection").is_some());
        assert!(value["session"].get("voice").is_none());
    }

    #[test]
    fn session_update_with_server_vad() {
        let session = SessionConfig {
            turn_detection: Some(TurnDetection::server_vad(0.5, 300, 500)),
            ..Default::default()
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["turn_detection"]["type"], "server_vad");
        assert_eq!(value["turn_detection"]["silence_duration_ms"], 500);
    }

    #[test]
    fn frame_kind_matches_wire_tag() {
        let frames = [
            ClientFrame::ResponseCreate,
            ClientFrame::InputAudioBufferClear,
            ClientFrame::tool_output("c", "o"),
        ];
        for frame in frames {
            let value = serde_json::to_value(&frame).unwrap();
            assert_eq!(value["type"], frame.kind());
        }
    }

    // ===========================================
    // Server Event Tests
    // ===========================================

    #[test]
    fn decodes_speech_started() {
        let decoded = ServerEvent::decode(
            r#"{"type":"input_audio_buffer.speech_started","event_id":"e1","audio_start_ms":120,"item_id":"item_u1"}"#,
        )
        .unwrap();
        assert_eq!(
            decoded,
            Decoded::Event(ServerEvent::SpeechStarted {
                item_id: Some("item_u1".into()),
                audio_start_ms: Some(120),
            })
        );
    }

    #[test]
    fn decodes_user_audio_item() {
        let text = json!({
            "type": "conversation.item.created",
            "previous_item_id": null,
            "item": {
                "id": "item_u1",
                "type": "message",
                "role": "user",
                "status": "completed",
                "content": [{"type": "input_audio", "transcript": null}]
            }
        })
        .to_string();
        match ServerEvent::decode(&text).unwrap() {
            Decoded::Event(ServerEvent::ItemCreated { item, .. }) => {
                assert!(item.is_message());
                assert!(item.has_audio());
                assert_eq!(item.role, Some(Role::User));
                assert_eq!(item.known_text(), None);
            }
            other => panic!("Expected ItemCreated, got {:?}", other),
        }
    }

    #[test]
    fn decodes_transcript_done() {
        let decoded = ServerEvent::decode(
            r#"{"type":"response.audio_transcript.done","response_id":"r1","item_id":"item_a1","output_index":0,"content_index":0,"transcript":"hello back"}"#,
        )
        .unwrap()
        .into_event()
        .unwrap();
        assert_eq!(
            decoded,
            ServerEvent::AudioTranscriptDone {
                response_id: "r1".into(),
                item_id: "item_a1".into(),
                transcript: "hello back".into(),
            }
        );
    }

    #[test]
    fn decodes_response_done_status() {
        let text = json!({
            "type": "response.done",
            "response": {"id": "r1", "status": "cancelled", "output": []}
        })
        .to_string();
        match ServerEvent::decode(&text).unwrap() {
            Decoded::Event(ServerEvent::ResponseDone { response }) => {
                assert!(!response.is_completed());
                assert_eq!(response.status.as_deref(), Some("cancelled"));
            }
            other => panic!("Expected ResponseDone, got {:?}", other),
        }
    }

    #[test]
    fn decodes_error_event() {
        let decoded = ServerEvent::decode(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"bad","message":"nope"}}"#,
        )
        .unwrap();
        match decoded {
            Decoded::Event(ServerEvent::Error { error }) => {
                assert_eq!(error.message, "nope");
                assert_eq!(error.code.as_deref(), Some("bad"));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_server_event_passes_through() {
        let decoded =
            ServerEvent::decode(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(
            decoded,
            Decoded::Passthrough { ref kind, .. } if kind == "rate_limits.updated"
        ));
    }

    #[test]
    fn non_json_frame_is_an_error() {
        assert!(ServerEvent::decode("not json").is_err());
    }
}
