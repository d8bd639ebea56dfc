//! ResponsesSession against a mock HTTP server.

use std::time::Duration;

use futures::StreamExt;
use parley_client::config::Credentials;
use parley_client::transport::{
    ConnectParams, ResponsesSession, StreamingSession, TransportError, TransportSession,
};
use parley_types::{Decoded, InputItem, ResponseRequest, Role, SessionConfig, TextStreamEvent};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_BODY: &str = "event: response.created\n\
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\",\"status\":\"in_progress\"}}\n\
\n\
: keep-alive\n\
\n\
event: response.output_text.delta\n\
data: {\"type\":\"response.output_text.delta\",\"item_id\":\"msg_1\",\"delta\":\"Hel\"}\n\
\n\
data: {\"type\":\"response.output_text.delta\",\"item_id\":\"msg_1\",\"delta\":\"lo\"}\r\n\
\r\n\
data: {\"type\":\"response.in_progress\",\"response\":{}}\n\
\n\
data: {broken\n\
\n\
data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"status\":\"completed\",\"output\":[{\"type\":\"message\",\"id\":\"msg_1\",\"role\":\"assistant\",\"content\":[{\"type\":\"output_text\",\"text\":\"Hello\"}]}]}}\n\
\n\
data: [DONE]\n";

fn request() -> ResponseRequest {
    ResponseRequest {
        model: "text-model".to_string(),
        instructions: Some("Be brief.".to_string()),
        input: vec![InputItem::message(Role::User, "Hi")],
        tools: vec![],
        stream: true,
    }
}

async fn connected(server: &MockServer) -> ResponsesSession {
    let session = ResponsesSession::new(
        &format!("{}/v1/responses", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    session
        .connect(&ConnectParams {
            credentials: Credentials::new("sk-test"),
            model: "text-model".to_string(),
            session: SessionConfig::default(),
        })
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn stream_decodes_events_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(serde_json::json!({
            "model": "text-model",
            "stream": true,
            "input": [{"type": "message", "role": "user", "content": "Hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let session = connected(&server).await;
    let events: Vec<_> = session.stream(request()).await.unwrap().collect().await;

    assert_eq!(events.len(), 5);
    assert!(matches!(
        &events[0],
        Decoded::Event(TextStreamEvent::Created { response }) if response.id == "resp_1"
    ));
    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Decoded::Event(TextStreamEvent::TextDelta { delta, .. }) => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo"]);
    assert!(matches!(
        &events[3],
        Decoded::Passthrough { kind, .. } if kind == "response.in_progress"
    ));
    let Decoded::Event(TextStreamEvent::Done { response }) = &events[4] else {
        panic!("expected response.completed, got {:?}", events[4]);
    };
    assert_eq!(response.output_text(), "Hello");
}

#[tokio::test]
async fn respond_returns_the_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "resp_2",
            "status": "completed",
            "output": [{"type": "message", "id": "msg_2", "role": "assistant",
                        "content": [{"type": "output_text", "text": "Hi there"}]}],
            "usage": {"input_tokens": 3, "output_tokens": 2, "total_tokens": 5}
        })))
        .mount(&server)
        .await;

    let session = connected(&server).await;
    let payload = session.respond(request()).await.unwrap();

    assert_eq!(payload.id, "resp_2");
    assert_eq!(payload.output_text(), "Hi there");
    assert_eq!(payload.usage.unwrap().total_tokens, 5);
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let session = connected(&server).await;
    let err = match session.stream(request()).await {
        Ok(_) => panic!("expected an HTTP error"),
        Err(e) => e,
    };

    match err {
        TransportError::Http { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("expected an HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnected_session_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = connected(&server).await;
    session.disconnect().await;

    assert!(matches!(
        session.respond(request()).await,
        Err(TransportError::NotConnected)
    ));
}
