//! Text-mode reply collection.
//!
//! A streamed reply is drained by a spawned job that accumulates text and
//! resolves a oneshot exactly once. The caller awaits the oneshot; dropping
//! the caller aborts the job.

use std::sync::Arc;

use futures::StreamExt;
use parley_types::{Decoded, ResponsePayload, ResponseRequest, TextStreamEvent};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ClientError;
use crate::transport::{StreamingSession, TransportError};

/// A fully received streamed reply.
#[derive(Debug, Clone)]
pub(super) struct StreamedReply {
    /// Text accumulated from deltas.
    pub(super) text: String,
    /// Terminal payload.
    pub(super) payload: ResponsePayload,
}

impl StreamedReply {
    /// Reply text, preferring the streamed deltas over the final payload.
    pub(super) fn into_text(self) -> String {
        if self.text.is_empty() {
            self.payload.output_text()
        } else {
            self.text
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one streamed request to completion.
pub(super) async fn collect_response(
    transport: Arc<dyn StreamingSession>,
    request: ResponseRequest,
) -> Result<StreamedReply, ClientError> {
    let (tx, rx) = oneshot::channel();
    let job = tokio::spawn(async move {
        let _ = tx.send(drain(transport, request).await);
    });
    let _job = AbortOnDrop(job);
    rx.await.map_err(|_| ClientError::Cancelled)?
}

async fn drain(
    transport: Arc<dyn StreamingSession>,
    request: ResponseRequest,
) -> Result<StreamedReply, ClientError> {
    let mut events = transport.stream(request).await?;
    let mut text = String::new();

    while let Some(decoded) = events.next().await {
        let event = match decoded {
            Decoded::Event(event) => event,
            Decoded::Passthrough { kind, .. } => {
                tracing::trace!("<- {} (unhandled)", kind);
                continue;
            }
        };
        match event {
            TextStreamEvent::Created { response } => {
                tracing::debug!("<- response {} created", response.id);
            }
            TextStreamEvent::TextDelta { delta, .. } => text.push_str(&delta),
            TextStreamEvent::Done { response } => {
                return Ok(StreamedReply {
                    text,
                    payload: response,
                });
            }
            TextStreamEvent::Failed { response } => {
                return Err(ClientError::ResponseFailed(response.failure_message()));
            }
            TextStreamEvent::Error { message, code } => {
                let message = match code {
                    Some(code) if message.is_empty() => code,
                    _ => message,
                };
                return Err(ClientError::ResponseFailed(message));
            }
            TextStreamEvent::Unrecognized => {}
        }
    }

    Err(TransportError::ConnectionClosed.into())
}
