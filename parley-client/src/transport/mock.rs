//! Mock transports for testing.
//!
//! Allow scripting inbound traffic and capturing outbound frames and
//! requests for verification. Clones share state, so a test keeps one handle
//! while the orchestrator owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parley_core::CloseReason;
use parley_types::{
    ClientFrame, Decoded, OutputContent, OutputItem, ResponsePayload, ResponseRequest, Role,
    ServerEvent, TextStreamEvent,
};
use tokio::sync::{mpsc, watch};

use super::{
    ConnectParams, DisconnectKind, DuplexSession, InboundFrames, StreamingSession,
    TextEventStream, TransportError, TransportFactory, TransportSession,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_status(status: &watch::Sender<bool>, up: bool) {
    status.send_if_modified(|current| std::mem::replace(current, up) != up);
}

// ===========================================
// Duplex
// ===========================================

/// Mock duplex transport.
#[derive(Debug, Clone)]
pub struct MockDuplexTransport {
    inner: Arc<Mutex<MockDuplexInner>>,
    status: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockDuplexInner {
    connected: bool,
    connect_count: usize,
    last_params: Option<ConnectParams>,
    sent_frames: Vec<ClientFrame>,
    sent_audio: Vec<Vec<u8>>,
    inbound_tx: Option<mpsc::UnboundedSender<Decoded<ServerEvent>>>,
    inbound_rx: Option<InboundFrames>,
    close_reason: Option<CloseReason>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_send_kind: Option<(String, String)>,
}

impl Default for MockDuplexTransport {
    fn default() -> Self {
        let (status, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(MockDuplexInner::default())),
            status: Arc::new(status),
        }
    }
}

impl MockDuplexTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a server event to the current connection's inbound channel.
    pub fn push_event(&self, event: ServerEvent) {
        self.push(Decoded::Event(event));
    }

    /// Deliver a raw JSON frame, decoded as the real session would.
    ///
    /// Undecodable frames are dropped, like the real receive loop drops them.
    pub fn push_json(&self, json: &str) {
        if let Ok(decoded) = ServerEvent::decode(json) {
            self.push(decoded);
        }
    }

    fn push(&self, decoded: Decoded<ServerEvent>) {
        let inner = lock(&self.inner);
        if let Some(tx) = &inner.inbound_tx {
            let _ = tx.send(decoded);
        }
    }

    /// Simulate the peer dropping the connection.
    pub fn simulate_drop(&self, reason: &str) {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return;
        }
        inner.connected = false;
        inner.inbound_tx = None;
        inner.close_reason = Some(CloseReason::Failed(reason.to_string()));
        set_status(&self.status, false);
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        lock(&self.inner).sent_frames.clone()
    }

    /// Get the wire names of all frames that were sent.
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        lock(&self.inner)
            .sent_frames
            .iter()
            .map(ClientFrame::kind)
            .collect()
    }

    /// Get all audio chunks that were sent.
    pub fn sent_audio(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).sent_audio.clone()
    }

    /// Forget captured frames and audio.
    pub fn clear_sent(&self) {
        let mut inner = lock(&self.inner);
        inner.sent_frames.clear();
        inner.sent_audio.clear();
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        lock(&self.inner).connect_count
    }

    /// Parameters of the last connect attempt.
    pub fn last_params(&self) -> Option<ConnectParams> {
        lock(&self.inner).last_params.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        lock(&self.inner).fail_next_send = Some(error.to_string());
    }

    /// Cause the next send() of a frame with this wire name to fail.
    pub fn fail_next_send_of(&self, kind: &str, error: &str) {
        lock(&self.inner).fail_send_kind = Some((kind.to_string(), error.to_string()));
    }
}

#[async_trait]
impl TransportSession for MockDuplexTransport {
    async fn connect(&self, params: &ConnectParams) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        inner.last_params = Some(params.clone());

        if let Some(error) = inner.fail_next_connect.take() {
            inner.close_reason = Some(CloseReason::Failed(error.clone()));
            return Err(TransportError::ConnectionFailed(error));
        }
        if inner.connected {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.connected = true;
        inner.connect_count += 1;
        inner.inbound_tx = Some(tx);
        inner.inbound_rx = Some(rx);
        inner.close_reason = None;
        inner.sent_frames.push(ClientFrame::SessionUpdate {
            session: params.session.clone(),
        });
        set_status(&self.status, true);
        Ok(())
    }

    async fn disconnect(&self) -> DisconnectKind {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return DisconnectKind::AlreadyClosed;
        }
        inner.connected = false;
        inner.inbound_tx = None;
        inner.close_reason = Some(CloseReason::Requested);
        set_status(&self.status, false);
        DisconnectKind::Intentional
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    async fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.inner).close_reason.clone()
    }
}

#[async_trait]
impl DuplexSession for MockDuplexTransport {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        let kind_matches = inner
            .fail_send_kind
            .as_ref()
            .is_some_and(|(kind, _)| kind == frame.kind());
        if kind_matches {
            if let Some((_, error)) = inner.fail_send_kind.take() {
                return Err(TransportError::SendFailed(error));
            }
        }

        inner.sent_frames.push(frame.clone());
        Ok(())
    }

    async fn send_audio(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.sent_audio.push(chunk.to_vec());
        Ok(())
    }

    async fn take_inbound(&self) -> Option<InboundFrames> {
        lock(&self.inner).inbound_rx.take()
    }
}

// ===========================================
// Streaming
// ===========================================

/// A scripted reply for [`MockStreamingTransport::stream`].
#[derive(Debug, Clone)]
struct ScriptedStream {
    events: Vec<Decoded<TextStreamEvent>>,
    stall: bool,
}

/// Mock streaming transport.
#[derive(Debug, Clone)]
pub struct MockStreamingTransport {
    inner: Arc<Mutex<MockStreamingInner>>,
    status: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockStreamingInner {
    connected: bool,
    connect_count: usize,
    requests: Vec<ResponseRequest>,
    streams: VecDeque<ScriptedStream>,
    payloads: VecDeque<ResponsePayload>,
    close_reason: Option<CloseReason>,
    fail_next_connect: Option<String>,
    fail_next_request: Option<String>,
}

impl Default for MockStreamingTransport {
    fn default() -> Self {
        let (status, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(MockStreamingInner::default())),
            status: Arc::new(status),
        }
    }
}

impl MockStreamingTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the events the next `stream()` call yields.
    pub fn queue_stream(&self, events: Vec<Decoded<TextStreamEvent>>) {
        lock(&self.inner).streams.push_back(ScriptedStream {
            events,
            stall: false,
        });
    }

    /// Queue events followed by a stream that never ends.
    pub fn queue_stalled_stream(&self, events: Vec<Decoded<TextStreamEvent>>) {
        lock(&self.inner).streams.push_back(ScriptedStream {
            events,
            stall: true,
        });
    }

    /// Queue the payload the next `respond()` call returns.
    pub fn queue_payload(&self, payload: ResponsePayload) {
        lock(&self.inner).payloads.push_back(payload);
    }

    /// Get all requests that were made.
    pub fn requests(&self) -> Vec<ResponseRequest> {
        lock(&self.inner).requests.clone()
    }

    /// Get the last request that was made.
    pub fn last_request(&self) -> Option<ResponseRequest> {
        lock(&self.inner).requests.last().cloned()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        lock(&self.inner).connect_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Cause the next stream() or respond() to fail with the given error.
    pub fn fail_next_request(&self, error: &str) {
        lock(&self.inner).fail_next_request = Some(error.to_string());
    }

    fn record(&self, request: ResponseRequest) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.requests.push(request);
        if let Some(error) = inner.fail_next_request.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for MockStreamingTransport {
    async fn connect(&self, _params: &ConnectParams) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        inner.connected = true;
        inner.connect_count += 1;
        inner.close_reason = None;
        set_status(&self.status, true);
        Ok(())
    }

    async fn disconnect(&self) -> DisconnectKind {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return DisconnectKind::AlreadyClosed;
        }
        inner.connected = false;
        inner.close_reason = Some(CloseReason::Requested);
        set_status(&self.status, false);
        DisconnectKind::Intentional
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    async fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.inner).close_reason.clone()
    }
}

#[async_trait]
impl StreamingSession for MockStreamingTransport {
    async fn stream(&self, request: ResponseRequest) -> Result<TextEventStream, TransportError> {
        self.record(request)?;
        let script = lock(&self.inner)
            .streams
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)?;
        let events = stream::iter(script.events);
        if script.stall {
            Ok(Box::pin(events.chain(stream::pending())))
        } else {
            Ok(Box::pin(events))
        }
    }

    async fn respond(&self, request: ResponseRequest) -> Result<ResponsePayload, TransportError> {
        self.record(request)?;
        lock(&self.inner)
            .payloads
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }
}

/// A completed payload whose output is one assistant message.
pub fn text_payload(id: &str, text: &str) -> ResponsePayload {
    ResponsePayload {
        id: id.to_string(),
        status: Some("completed".to_string()),
        output: vec![OutputItem::Message {
            id: Some(format!("msg_{id}")),
            role: Some(Role::Assistant),
            content: vec![OutputContent::OutputText {
                text: text.to_string(),
            }],
        }],
        error: None,
        usage: None,
    }
}

/// Events of a successful streamed reply delivering `chunks` as deltas.
pub fn text_reply(id: &str, chunks: &[&str]) -> Vec<Decoded<TextStreamEvent>> {
    let mut events = vec![Decoded::Event(TextStreamEvent::Created {
        response: ResponsePayload {
            id: id.to_string(),
            status: Some("in_progress".to_string()),
            ..Default::default()
        },
    })];
    for chunk in chunks {
        events.push(Decoded::Event(TextStreamEvent::TextDelta {
            delta: chunk.to_string(),
            item_id: Some(format!("msg_{id}")),
        }));
    }
    events.push(Decoded::Event(TextStreamEvent::Done {
        response: text_payload(id, &chunks.concat()),
    }));
    events
}

// ===========================================
// Factory
// ===========================================

/// Factory handing out shared mock sessions.
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    /// Duplex session returned by every `duplex()` call.
    pub duplex: MockDuplexTransport,
    /// Streaming session returned by every `streaming()` call.
    pub streaming: MockStreamingTransport,
}

impl MockTransportFactory {
    /// Create a factory with fresh mocks.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportFactory for MockTransportFactory {
    fn duplex(&self) -> Result<Arc<dyn DuplexSession>, TransportError> {
        Ok(Arc::new(self.duplex.clone()))
    }

    fn streaming(&self) -> Result<Arc<dyn StreamingSession>, TransportError> {
        Ok(Arc::new(self.streaming.clone()))
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
            model: "m".to_string(),
            session: SessionConfig::default(),
        }
    }

    // ===========================================
    // MockDuplexTransport Tests
    // ===========================================

    #[tokio::test]
    async fn duplex_connect_sends_session_update() {
        let transport = MockDuplexTransport::new();
        assert!(!transport.is_connected());

        transport.connect(&params()).await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.sent_kinds(), vec!["session.update"]);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn duplex_send_without_connect_fails() {
        let transport = MockDuplexTransport::new();
        let result = transport.send(&ClientFrame::ResponseCreate).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn duplex_pushed_events_arrive_in_order() {
        let transport = MockDuplexTransport::new();
        transport.connect(&params()).await.unwrap();
        let mut inbound = transport.take_inbound().await.unwrap();
        assert!(transport.take_inbound().await.is_none());

        transport.push_json(r#"{"type":"input_audio_buffer.speech_started"}"#);
        transport.push_json("garbage");
        transport.push_json(r#"{"type":"rate_limits.updated"}"#);

        assert!(matches!(
            inbound.recv().await,
            Some(Decoded::Event(ServerEvent::SpeechStarted { .. }))
        ));
        assert!(matches!(
            inbound.recv().await,
            Some(Decoded::Passthrough { .. })
        ));
    }

    #[tokio::test]
    async fn duplex_forced_send_failure_by_kind() {
        let transport = MockDuplexTransport::new();
        transport.connect(&params()).await.unwrap();
        transport.fail_next_send_of("response.create", "boom");

        transport.send(&ClientFrame::ResponseCancel).await.unwrap();
        let result = transport.send(&ClientFrame::ResponseCreate).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        transport.send(&ClientFrame::ResponseCreate).await.unwrap();
    }

    #[tokio::test]
    async fn duplex_drop_reports_once() {
        let transport = MockDuplexTransport::new();
        let mut status = transport.connection_status();
        transport.connect(&params()).await.unwrap();
        assert!(*status.borrow_and_update());

        transport.simulate_drop("reset");
        transport.simulate_drop("reset again");
        assert!(status.has_changed().unwrap());
        assert!(!*status.borrow_and_update());
        assert!(!status.has_changed().unwrap());

        assert_eq!(transport.disconnect().await, DisconnectKind::AlreadyClosed);
        assert_eq!(
            transport.close_reason().await,
            Some(CloseReason::Failed("reset".to_string()))
        );
    }

    #[tokio::test]
    async fn duplex_clone_shares_state() {
        let t1 = MockDuplexTransport::new();
        let t2 = t1.clone();
        t1.connect(&params()).await.unwrap();
        assert!(t2.is_connected());
        t2.send(&ClientFrame::ResponseCreate).await.unwrap();
        assert_eq!(t1.sent_frames().len(), 2);
    }

    // ===========================================
    // MockStreamingTransport Tests
    // ===========================================

    #[tokio::test]
    async fn streaming_replays_script() {
        let transport = MockStreamingTransport::new();
        transport.connect(&params()).await.unwrap();
        transport.queue_stream(text_reply("r1", &["Hel", "lo"]));

        let request = ResponseRequest {
            model: "m".to_string(),
            instructions: None,
            input: vec![],
            tools: vec![],
            stream: true,
        };
        let events: Vec<_> = transport.stream(request).await.unwrap().collect().await;

        assert_eq!(events.len(), 4);
        assert!(matches!(
            events.last(),
            Some(Decoded::Event(TextStreamEvent::Done { response })) if response.output_text() == "Hello"
        ));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn streaming_requires_connect() {
        let transport = MockStreamingTransport::new();
        let request = ResponseRequest {
            model: "m".to_string(),
            instructions: None,
            input: vec![],
            tools: vec![],
            stream: false,
        };
        assert!(matches!(
            transport.respond(request).await,
            Err(TransportError::NotConnected)
        ));
    }
}
