//! Streaming HTTP session (text mode).
//!
//! Each request is independent; "connected" only means credentials are
//! loaded and requests are accepted.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parley_core::CloseReason;
use parley_types::{ResponsePayload, ResponseRequest, TextStreamEvent};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::{watch, Mutex};

use super::{
    ConnectParams, DisconnectKind, StreamingSession, TextEventStream, TransportError,
    TransportSession,
};
use crate::config::Credentials;
use crate::sse::parse_sse_events;

/// Stateless request/response session.
pub struct ResponsesSession {
    url: String,
    client: reqwest::Client,
    state: Mutex<SessionState>,
    status: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct SessionState {
    credentials: Option<Credentials>,
    close_reason: Option<CloseReason>,
}

impl ResponsesSession {
    /// Create an unconnected session for the given endpoint.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (status, _) = watch::channel(false);
        Ok(Self {
            url: url.to_string(),
            client,
            state: Mutex::new(SessionState::default()),
            status,
        })
    }

    async fn post(
        &self,
        request: &ResponseRequest,
        accept: &'static str,
    ) -> Result<reqwest::Response, TransportError> {
        let credentials = self
            .state
            .lock()
            .await
            .credentials
            .clone()
            .ok_or(TransportError::NotConnected)?;

        tracing::debug!(
            "POST {} ({} input items, stream={})",
            self.url,
            request.input.len(),
            request.stream
        );
        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, credentials.bearer())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Request rejected with {}", status);
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl TransportSession for ResponsesSession {
    async fn connect(&self, params: &ConnectParams) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.credentials = Some(params.credentials.clone());
        state.close_reason = None;
        self.status.send_if_modified(|up| !std::mem::replace(up, true));
        tracing::info!("Streaming session ready ({})", params.model);
        Ok(())
    }

    async fn disconnect(&self) -> DisconnectKind {
        let mut state = self.state.lock().await;
        if state.credentials.take().is_none() {
            return DisconnectKind::AlreadyClosed;
        }
        state.close_reason = Some(CloseReason::Requested);
        self.status.send_if_modified(|up| std::mem::replace(up, false));
        tracing::info!("Streaming session closed");
        DisconnectKind::Intentional
    }

    fn is_connected(&self) -> bool {
        *self.status.borrow()
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    async fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().await.close_reason.clone()
    }
}

#[async_trait]
impl StreamingSession for ResponsesSession {
    async fn stream(&self, mut request: ResponseRequest) -> Result<TextEventStream, TransportError> {
        request.stream = true;
        let response = self.post(&request, "text/event-stream").await?;
        let events = parse_sse_events(response.bytes_stream()).filter_map(|data| async move {
            match TextStreamEvent::decode(&data) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!("Dropping undecodable stream event: {}", e);
                    None
                }
            }
        });
        Ok(Box::pin(events))
    }

    async fn respond(&self, mut request: ResponseRequest) -> Result<ResponsePayload, TransportError> {
        request.stream = false;
        let response = self.post(&request, "application/json").await?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        ResponsePayload::decode(&body).map_err(|e| TransportError::ReceiveFailed(e.to_string()))
    }
}
