//! Streaming request/response protocol (text mode).
//!
//! A text-mode turn is one HTTP request carrying the full history as input
//! items. With `stream: true` the reply arrives as a sequence of typed
//! server-sent events ending in `response.completed` or `response.failed`,
//! whose payload is the same [`ResponsePayload`] a non-streaming request
//! returns.

use serde::{Deserialize, Serialize};

use crate::codec::{self, Decoded, TaggedEvent};
use crate::{FrameError, Role, ToolCall, ToolDefinition};

/// Error object returned by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Error category
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Body of a text-mode request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRequest {
    /// Model identifier
    pub model: String,
    /// System instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Conversation history plus any tool round-trips
    pub input: Vec<InputItem>,
    /// Tools the model may call
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Whether to stream the reply as events
    pub stream: bool,
}

/// One input item of a text-mode request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// A conversation message
    Message {
        /// Author
        role: Role,
        /// Plain text content
        content: String,
    },
    /// A tool call the model made earlier in this turn
    FunctionCall {
        /// Call correlation id
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// The result of a tool call
    FunctionCallOutput {
        /// Call correlation id
        call_id: String,
        /// Tool output
        output: String,
    },
}

impl InputItem {
    /// A plain text message.
    pub fn message(role: Role, content: &str) -> Self {
        InputItem::Message {
            role,
            content: content.to_string(),
        }
    }
}

impl From<&ToolCall> for InputItem {
    fn from(call: &ToolCall) -> Self {
        InputItem::FunctionCall {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// Token accounting for a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated tokens
    #[serde(default)]
    pub output_tokens: u64,
    /// Sum of both
    #[serde(default)]
    pub total_tokens: u64,
}

/// A complete response, streamed or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Response identifier
    #[serde(default)]
    pub id: String,
    /// `completed`, `failed`, `in_progress`, `incomplete`, ...
    #[serde(default)]
    pub status: Option<String>,
    /// Output items in order
    #[serde(default)]
    pub output: Vec<OutputItem>,
    /// Failure details
    #[serde(default)]
    pub error: Option<ApiError>,
    /// Token usage
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ResponsePayload {
    /// Decode a non-streaming response body.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Deserialization)
    }

    /// Concatenated text of every message output item.
    pub fn output_text(&self) -> String {
        let mut text = String::new();
        for item in &self.output {
            if let OutputItem::Message { content, .. } = item {
                for part in content {
                    if let OutputContent::OutputText { text: t } = part {
                        text.push_str(t);
                    }
                }
            }
        }
        text
    }

    /// Tool calls requested by this response, in output order.
    pub fn function_calls(&self) -> Vec<ToolCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } => Some(ToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Error message for a failed response.
    pub fn failure_message(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "response {} ended with status {}",
                    self.id,
                    self.status.as_deref().unwrap_or("unknown")
                )
            })
    }
}

/// One output item of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// Generated message
    Message {
        /// Item id
        #[serde(default)]
        id: Option<String>,
        /// Author (assistant)
        #[serde(default)]
        role: Option<Role>,
        /// Content parts
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    /// Tool call request
    FunctionCall {
        /// Item id
        #[serde(default)]
        id: Option<String>,
        /// Call correlation id
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        #[serde(default)]
        arguments: String,
    },
    /// Output kinds not used by this crate (reasoning, web search, ...)
    #[serde(other)]
    Other,
}

/// One content part of an output message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    /// Generated text
    OutputText {
        /// The text
        text: String,
    },
    /// Model refusal
    Refusal {
        /// Refusal explanation
        refusal: String,
    },
    /// Content kinds not used by this crate
    #[serde(other)]
    Other,
}

/// Server-sent events of a streamed text response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum TextStreamEvent {
    /// The response was accepted
    #[serde(rename = "response.created")]
    Created {
        /// Initial (in-progress) payload
        response: ResponsePayload,
    },
    /// Incremental output text
    #[serde(rename = "response.output_text.delta")]
    TextDelta {
        /// Text fragment
        delta: String,
        /// Output item the fragment belongs to
        #[serde(default)]
        item_id: Option<String>,
    },
    /// Terminal success
    #[serde(rename = "response.completed")]
    Done {
        /// Final payload
        response: ResponsePayload,
    },
    /// Terminal failure
    #[serde(rename = "response.failed")]
    Failed {
        /// Final payload with error details
        response: ResponsePayload,
    },
    /// Stream-level error
    #[serde(rename = "error")]
    Error {
        /// Human-readable message
        #[serde(default)]
        message: String,
        /// Machine-readable code
        #[serde(default)]
        code: Option<String>,
    },
    #[doc(hidden)]
    #[serde(other)]
    Unrecognized,
}

impl TaggedEvent for TextStreamEvent {
    fn is_unrecognized(&self) -> bool {
        matches!(self, TextStreamEvent::Unrecognized)
    }
}

impl TextStreamEvent {
    /// Decode one SSE `data:` payload.
    pub fn decode(text: &str) -> Result<Decoded<Self>, FrameError> {
        codec::decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed_body() -> serde_json::Value {
        json!({
            "id": "resp_1",
            "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": []},
                {
                    "type": "message",
                    "id": "msg_1",
                    "role": "assistant",
                    "content": [
                        {"type": "output_text", "text": "Hello ", "annotations": []},
                        {"type": "output_text", "text": "there", "annotations": []}
                    ]
                },
                {
                    "type": "function_call",
                    "id": "fc_1",
                    "call_id": "call_1",
                    "name": "lookup",
                    "arguments": "{\"q\":1}"
                }
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4, "total_tokens": 14}
        })
    }

    // ===========================================
    // Payload Tests
    // ===========================================

    #[test]
    fn payload_concatenates_output_text() {
        let payload = ResponsePayload::decode(&completed_body().to_string()).unwrap();
        assert_eq!(payload.output_text(), "Hello there");
        assert_eq!(payload.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn payload_tolerates_unmodeled_output_items() {
        let payload = ResponsePayload::decode(&completed_body().to_string()).unwrap();
        assert_eq!(payload.output[0], OutputItem::Other);
    }

    #[test]
    fn payload_lists_function_calls() {
        let payload = ResponsePayload::decode(&completed_body().to_string()).unwrap();
        let calls = payload.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, "{\"q\":1}");
    }

    #[test]
    fn failure_message_prefers_error_text() {
        let payload = ResponsePayload {
            id: "resp_2".into(),
            status: Some("failed".into()),
            error: Some(ApiError {
                message: "rate limited".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(payload.failure_message(), "rate limited");

        let bare = ResponsePayload {
            id: "resp_3".into(),
            status: Some("incomplete".into()),
            ..Default::default()
        };
        assert_eq!(
            bare.failure_message(),
            "response resp_3 ended with status incomplete"
        );
    }

    // ===========================================
    // Stream Event Tests
    // ===========================================

    #[test]
    fn decodes_text_delta() {
        let decoded = TextStreamEvent::decode(
            r#"{"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"delta":"Hel"}"#,
        )
        .unwrap();
        assert_eq!(
            decoded,
            Decoded::Event(TextStreamEvent::TextDelta {
                delta: "Hel".into(),
                item_id: Some("msg_1".into()),
            })
        );
    }

    #[test]
    fn completed_event_shares_payload_decoder() {
        let text = json!({"type": "response.completed", "response": completed_body()}).to_string();
        match TextStreamEvent::decode(&text).unwrap() {
            Decoded::Event(TextStreamEvent::Done { response }) => {
                assert_eq!(response.output_text(), "Hello there");
            }
            other => panic!("Expected Done, got {:?}", other),
        }
    }

    #[test]
    fn unmodeled_event_passes_through() {
        let decoded =
            TextStreamEvent::decode(r#"{"type":"response.output_item.added","output_index":0}"#)
                .unwrap();
        match decoded {
            Decoded::Passthrough { kind, payload } => {
                assert_eq!(kind, "response.output_item.added");
                assert_eq!(payload["output_index"], 0);
            }
            other => panic!("Expected passthrough, got {:?}", other),
        }
    }

    #[test]
    fn malformed_modeled_event_is_an_error() {
        let result = TextStreamEvent::decode(r#"{"type":"response.output_text.delta"}"#);
        assert!(matches!(result, Err(FrameError::Deserialization(_))));
    }

    #[test]
    fn missing_type_is_an_error() {
        let result = TextStreamEvent::decode(r#"{"delta":"x"}"#);
        assert!(matches!(result, Err(FrameError::MissingType)));
    }

    // ===========================================
    // Request Tests
    // ===========================================

    #[test]
    fn request_serializes_history_and_tool_round_trip() {
        let call = ToolCall {
            call_id: "call_1".into(),
            name: "lookup".into(),
            arguments: "{}".into(),
        };
        let request = ResponseRequest {
            model: "gpt-4.1".into(),
            instructions: None,
            input: vec![
                InputItem::message(Role::User, "hi"),
                InputItem::from(&call),
                InputItem::FunctionCallOutput {
                    call_id: "call_1".into(),
                    output: "42".into(),
                },
            ],
            tools: vec![],
            stream: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("instructions").is_none());
        assert!(value.get("tools").is_none());
        assert_eq!(value["input"][0]["type"], "message");
        assert_eq!(value["input"][0]["role"], "user");
        assert_eq!(value["input"][1]["type"], "function_call");
        assert_eq!(value["input"][2]["type"], "function_call_output");
        assert_eq!(value["stream"], true);
    }
}
