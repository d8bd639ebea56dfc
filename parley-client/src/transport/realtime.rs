//! Duplex WebSocket session (audio mode).
//!
//! Connection state is driven by [`LinkState`] from parley-core, so the
//! disconnected transition is reported exactly once however the socket ends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parley_core::{CloseReason, LinkAction, LinkEvent, LinkState};
use parley_types::{ClientFrame, Decoded, ServerEvent};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{
    ConnectParams, DisconnectKind, DuplexSession, InboundFrames, TransportError, TransportSession,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Persistent WebSocket session.
pub struct RealtimeSession {
    url: String,
    connect_timeout: Duration,
    link: Arc<Mutex<Link>>,
    status: Arc<watch::Sender<bool>>,
    inbound: Mutex<Option<InboundFrames>>,
}

#[derive(Default)]
struct Link {
    state: LinkState,
    writer: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    close_reason: Option<CloseReason>,
}

impl Link {
    fn apply(&mut self, event: LinkEvent) -> Vec<LinkAction> {
        let (next, actions) = std::mem::take(&mut self.state).on_event(event);
        self.state = next;
        actions
    }

    /// Run the bookkeeping actions. Socket actions are left to the caller.
    fn record(&mut self, status: &watch::Sender<bool>, action: LinkAction) {
        match action {
            LinkAction::RecordClose(reason) => self.close_reason = Some(reason),
            LinkAction::ReportStatus(up) => {
                status.send_if_modified(|current| {
                    let changed = *current != up;
                    *current = up;
                    changed
                });
            }
            LinkAction::StopReceiveLoop => {
                if let Some(reader) = self.reader.take() {
                    reader.abort();
                }
            }
            LinkAction::CloseSocket => {
                self.writer = None;
            }
            LinkAction::OpenSocket
            | LinkAction::SendSessionUpdate
            | LinkAction::StartReceiveLoop => {}
        }
    }
}

impl RealtimeSession {
    /// Create an unconnected session for the given endpoint.
    pub fn new(url: &str, connect_timeout: Duration) -> Self {
        let (status, _) = watch::channel(false);
        Self {
            url: url.to_string(),
            connect_timeout,
            link: Arc::new(Mutex::new(Link::default())),
            status: Arc::new(status),
            inbound: Mutex::new(None),
        }
    }

    async fn open(&self, params: &ConnectParams) -> Result<WsStream, TransportError> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}model={}", self.url, separator, params.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&params.credentials.bearer())
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid credentials: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(ws)
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if let Ok(mut link) = self.link.try_lock() {
            if let Some(reader) = link.reader.take() {
                reader.abort();
            }
        }
    }
}

async fn write_frame(writer: &mut WsSink, frame: &ClientFrame) -> Result<(), TransportError> {
    let text = frame
        .to_json()
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    writer
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Decode frames until the socket ends, then record the failure once.
async fn receive_loop(
    mut reader: WsSource,
    inbound: mpsc::UnboundedSender<Decoded<ServerEvent>>,
    link: Arc<Mutex<Link>>,
    status: Arc<watch::Sender<bool>>,
) {
    let ended = loop {
        let Some(next) = reader.next().await else {
            break LinkEvent::RemoteClosed {
                reason: "stream ended".to_string(),
            };
        };
        match next {
            Ok(Message::Text(text)) => match ServerEvent::decode(&text) {
                Ok(decoded) => {
                    if inbound.send(decoded).is_err() {
                        tracing::debug!("Inbound receiver dropped, discarding frame");
                    }
                }
                Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
            },
            Ok(Message::Close(frame)) => {
                break LinkEvent::RemoteClosed {
                    reason: frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_else(|| "closed by peer".to_string()),
                };
            }
            Ok(_) => {}
            Err(e) => {
                break LinkEvent::ReadFailed {
                    error: e.to_string(),
                };
            }
        }
    };

    let mut link = link.lock().await;
    let actions = link.apply(ended);
    if actions.is_empty() {
        return;
    }
    link.writer = None;
    for action in actions {
        link.record(&status, action);
    }
    tracing::error!("Realtime session lost: {:?}", link.close_reason);
}

#[async_trait]
impl TransportSession for RealtimeSession {
    async fn connect(&self, params: &ConnectParams) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        let actions = link.apply(LinkEvent::ConnectRequested);
        if !actions.contains(&LinkAction::OpenSocket) {
            return Ok(());
        }

        tracing::info!("Connecting to {} ({})", self.url, params.model);
        let ws = match self.open(params).await {
            Ok(ws) => ws,
            Err(e) => {
                for action in link.apply(LinkEvent::OpenFailed {
                    error: e.to_string(),
                }) {
                    link.record(&self.status, action);
                }
                return Err(e);
            }
        };

        let (mut writer, reader) = ws.split();
        let mut reader = Some(reader);
        link.close_reason = None;
        for action in link.apply(LinkEvent::Opened) {
            match action {
                LinkAction::SendSessionUpdate => {
                    let frame = ClientFrame::SessionUpdate {
                        session: params.session.clone(),
                    };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        tracing::warn!("Session update failed: {}", e);
                        for action in link.apply(LinkEvent::ReadFailed {
                            error: e.to_string(),
                        }) {
                            link.record(&self.status, action);
                        }
                        return Err(e);
                    }
                }
                LinkAction::StartReceiveLoop => {
                    if let Some(reader) = reader.take() {
                        let (tx, rx) = mpsc::unbounded_channel();
                        *self.inbound.lock().await = Some(rx);
                        link.reader = Some(tokio::spawn(receive_loop(
                            reader,
                            tx,
                            Arc::clone(&self.link),
                            Arc::clone(&self.status),
                        )));
                    }
                }
                other => link.record(&self.status, other),
            }
        }
        link.writer = Some(writer);
        tracing::info!("Realtime session connected");
        Ok(())
    }

    async fn disconnect(&self) -> DisconnectKind {
        let mut link = self.link.lock().await;
        let actions = link.apply(LinkEvent::DisconnectRequested);
        if actions.is_empty() {
            return DisconnectKind::AlreadyClosed;
        }
        for action in actions {
            if action == LinkAction::CloseSocket {
                if let Some(mut writer) = link.writer.take() {
                    if let Err(e) = writer.close().await {
                        tracing::debug!("Close handshake failed: {}", e);
                    }
                }
            } else {
                link.record(&self.status, action);
            }
        }
        tracing::info!("Realtime session closed");
        DisconnectKind::Intentional
    }

    fn is_connected(&self) -> bool {
        *self.status.borrow()
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    async fn close_reason(&self) -> Option<CloseReason> {
        self.link.lock().await.close_reason.clone()
    }
}

#[async_trait]
impl DuplexSession for RealtimeSession {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        if !link.state.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let writer = link.writer.as_mut().ok_or(TransportError::NotConnected)?;
        tracing::debug!("-> {}", frame.kind());
        write_frame(writer, frame).await
    }

    async fn send_audio(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let audio = base64::engine::general_purpose::STANDARD.encode(chunk);
        self.send(&ClientFrame::InputAudioBufferAppend { audio })
            .await
    }

    async fn take_inbound(&self) -> Option<InboundFrames> {
        self.inbound.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use parley_types::SessionConfig;

    fn params() -> ConnectParams {
        ConnectParams {
            credentials: Credentials::new("sk-test"),
            model: "rt-model".to_string(),
            session: SessionConfig::default(),
        }
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let session = RealtimeSession::new("ws://127.0.0.1:1", Duration::from_secs(1));
        let result = session.send(&ClientFrame::ResponseCreate).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_already_closed() {
        let session = RealtimeSession::new("ws://127.0.0.1:1", Duration::from_secs(1));
        assert_eq!(session.disconnect().await, DisconnectKind::AlreadyClosed);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn refused_connect_records_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let session = RealtimeSession::new(&format!("ws://127.0.0.1:{port}"), Duration::from_secs(5));
        let status = session.connection_status();
        let result = session.connect(&params()).await;

        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!session.is_connected());
        assert!(!status.has_changed().unwrap());
        assert!(matches!(
            session.close_reason().await,
            Some(CloseReason::Failed(_))
        ));
        assert!(session.take_inbound().await.is_none());
    }
}
