//! Transport abstraction for Parley.
//!
//! Two transport families carry a conversation:
//! - [`DuplexSession`]: a persistent socket carrying JSON frames both ways
//!   (audio mode)
//! - [`StreamingSession`]: stateless requests whose replies stream back as
//!   server-sent events (text mode)
//!
//! Both share the [`TransportSession`] lifecycle contract:
//! - `connect()` establishes the channel (and, for duplex, starts the
//!   receive loop)
//! - `disconnect()` is idempotent and says whether it closed anything
//! - `connection_status()` streams connected/disconnected transitions
//!
//! # Example
//!
//! ```ignore
//! let session = MockDuplexTransport::new();
//! session.connect(&params).await?;
//! session.send(&ClientFrame::ResponseCreate).await?;
//! let mut inbound = session.take_inbound().await.unwrap();
//! ```

mod mock;
mod realtime;
mod responses;

pub use mock::{
    text_payload, text_reply, MockDuplexTransport, MockStreamingTransport, MockTransportFactory,
};
pub use realtime::RealtimeSession;
pub use responses::ResponsesSession;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parley_core::CloseReason;
use parley_types::{
    ClientFrame, Decoded, ResponsePayload, ResponseRequest, ServerEvent, SessionConfig,
    TextStreamEvent,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::{Credentials, ServiceConfig};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// The service answered with a non-success status.
    #[error("http {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// What `disconnect()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// A live session was shut down on request.
    Intentional,
    /// The session was already closed, by an earlier disconnect or a failure.
    AlreadyClosed,
}

/// Everything a session needs to connect.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// API credentials.
    pub credentials: Credentials,
    /// Model identifier.
    pub model: String,
    /// Session settings (duplex only).
    pub session: SessionConfig,
}

/// Decoded inbound duplex frames, in arrival order.
pub type InboundFrames = mpsc::UnboundedReceiver<Decoded<ServerEvent>>;

/// Decoded events of one streamed text response.
pub type TextEventStream = BoxStream<'static, Decoded<TextStreamEvent>>;

/// Lifecycle shared by every transport.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Establish the channel.
    async fn connect(&self, params: &ConnectParams) -> Result<(), TransportError>;

    /// Close the channel. Safe to call any number of times.
    async fn disconnect(&self) -> DisconnectKind;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Connected/disconnected transitions.
    fn connection_status(&self) -> watch::Receiver<bool>;

    /// Why the last connection ended, if it has.
    async fn close_reason(&self) -> Option<CloseReason>;
}

/// A persistent session carrying JSON frames both ways.
#[async_trait]
pub trait DuplexSession: TransportSession {
    /// Send one frame.
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError>;

    /// Append encoded audio to the remote input buffer.
    async fn send_audio(&self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Take the receiver of decoded inbound frames for the current connection.
    ///
    /// Returns `None` if it was already taken or no connection was made.
    async fn take_inbound(&self) -> Option<InboundFrames>;
}

/// Stateless requests with streamed replies.
#[async_trait]
pub trait StreamingSession: TransportSession {
    /// Start a streamed response.
    async fn stream(&self, request: ResponseRequest) -> Result<TextEventStream, TransportError>;

    /// Get a complete response in one reply.
    async fn respond(&self, request: ResponseRequest) -> Result<ResponsePayload, TransportError>;
}

/// Builds transport sessions for the orchestrator.
pub trait TransportFactory: Send + Sync {
    /// A new, unconnected duplex session.
    fn duplex(&self) -> Result<Arc<dyn DuplexSession>, TransportError>;

    /// A new, unconnected streaming session.
    fn streaming(&self) -> Result<Arc<dyn StreamingSession>, TransportError>;
}

/// Factory for the real WebSocket and HTTP sessions.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    service: ServiceConfig,
}

impl DefaultTransportFactory {
    /// Create a factory for the given endpoints.
    pub fn new(service: ServiceConfig) -> Self {
        Self { service }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn duplex(&self) -> Result<Arc<dyn DuplexSession>, TransportError> {
        Ok(Arc::new(RealtimeSession::new(
            &self.service.realtime_url,
            self.service.connect_timeout(),
        )))
    }

    fn streaming(&self) -> Result<Arc<dyn StreamingSession>, TransportError> {
        Ok(Arc::new(ResponsesSession::new(
            &self.service.responses_url,
            self.service.connect_timeout(),
        )?))
    }
}
