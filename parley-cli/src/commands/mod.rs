//! CLI command implementations.

pub mod chat;
pub mod check;
pub mod send;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_client::transport::text_reply;
use parley_client::{
    ConversationConfig, ConversationOrchestrator, Credentials, DefaultTransportFactory,
    MockTransportFactory, NoTools, NullAudio, SendReceipt, TransportFactory,
};
use parley_core::ConversationMode;
use serde_json::json;

/// A running conversation plus, in mock mode, the scripted transports.
pub struct Session {
    /// The conversation.
    pub chat: ConversationOrchestrator,
    mock: Option<MockTransportFactory>,
    replies: AtomicU64,
}

impl Session {
    /// Connect the configured initial mode.
    pub async fn start(config: ConversationConfig, mock: bool) -> Result<Self> {
        let factory: Arc<dyn TransportFactory>;
        let credentials;
        let scripted;
        if mock {
            let mock = MockTransportFactory::new();
            factory = Arc::new(mock.clone());
            credentials = Credentials::new("mock");
            scripted = Some(mock);
        } else {
            factory = Arc::new(DefaultTransportFactory::new(config.service.clone()));
            credentials = config.credentials().context("No API key")?;
            scripted = None;
        }

        let chat = ConversationOrchestrator::start(
            config,
            credentials,
            factory,
            Arc::new(NoTools),
            Arc::new(NullAudio),
        )
        .await
        .context("Failed to start conversation")?;

        Ok(Self {
            chat,
            mock: scripted,
            replies: AtomicU64::new(0),
        })
    }

    /// Send a text message. In mock mode an echo reply is scripted around it.
    pub async fn send(&self, text: &str) -> Result<SendReceipt> {
        let Some(mock) = &self.mock else {
            return Ok(self.chat.send(text).await?);
        };
        let n = self.replies.fetch_add(1, Ordering::Relaxed);
        let reply = format!("You said: {text}");

        match self.chat.mode() {
            ConversationMode::Text => {
                mock.streaming
                    .queue_stream(text_reply(&format!("mock_{n}"), &[reply.as_str()]));
                Ok(self.chat.send(text).await?)
            }
            ConversationMode::Audio => {
                let receipt = self.chat.send(text).await?;
                script_audio_reply(mock, n, &reply);
                Ok(receipt)
            }
        }
    }
}

/// Feed the frames of a spoken reply into the mock duplex session.
fn script_audio_reply(mock: &MockTransportFactory, n: u64, transcript: &str) {
    let response_id = format!("resp_mock_{n}");
    let item_id = format!("item_mock_{n}");
    let frames = [
        json!({"type": "response.created", "response": {"id": response_id, "status": "in_progress"}}),
        json!({"type": "response.output_item.added", "response_id": response_id,
               "item": {"id": item_id, "type": "message", "role": "assistant", "content": []}}),
        json!({"type": "response.audio_transcript.done", "response_id": response_id,
               "item_id": item_id, "transcript": transcript}),
        json!({"type": "response.done", "response": {"id": response_id, "status": "completed"}}),
    ];
    for frame in frames {
        mock.duplex.push_json(&frame.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_types::Role;
    use std::time::Duration;

    fn config(mode: ConversationMode) -> ConversationConfig {
        let mut config = ConversationConfig::default();
        config.session.initial_mode = mode;
        config
    }

    #[tokio::test]
    async fn mock_text_send_echoes() {
        let session = Session::start(config(ConversationMode::Text), true)
            .await
            .unwrap();

        let receipt = session.send("ping").await.unwrap();

        assert!(matches!(
            receipt,
            SendReceipt::Replied(ref m) if m.text_or_empty() == "You said: ping"
        ));
    }

    #[tokio::test]
    async fn mock_audio_send_echoes_through_history() {
        let session = Session::start(config(ConversationMode::Audio), true)
            .await
            .unwrap();
        let mut messages = session.chat.subscribe_messages().await;

        session.send("ping").await.unwrap();

        let user = messages.next().await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), messages.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.text_or_empty(), "You said: ping");
    }
}
