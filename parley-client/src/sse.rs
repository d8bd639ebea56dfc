//! # SSE Parser
//!
//! Server-Sent Events parser for streamed text responses:
//! - Line buffering from chunked bodies
//! - `data:` lines of one event joined with `\n` until the blank line
//! - `[DONE]` marker filtering
//! - Processing of a final event with no trailing blank line

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// Parse SSE events from a byte stream and yield their data payloads.
///
/// Buffers incoming bytes and splits on newlines. The `data:` lines of an
/// event are joined until the blank line that ends it. Comments and other
/// fields are skipped, as are empty payloads and `[DONE]`. A read error ends
/// the stream and drops the unfinished event.
pub fn parse_sse_events<S, E>(byte_stream: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (
            byte_stream,
            BytesMut::with_capacity(8192),
            None::<String>,
            false,
        ),
        |(mut stream, mut buffer, mut event, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };

                    if line.is_empty() {
                        if let Some(data) = event.take().and_then(finish_event) {
                            return Some((data, (stream, buffer, event, false)));
                        }
                    } else if let Some(data) = data_field(line) {
                        append_data(&mut event, data);
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                    }
                    Some(Err(e)) => {
                        tracing::warn!("SSE stream read error: {e}");
                        return None;
                    }
                    None => {
                        if let Ok(line) = std::str::from_utf8(&buffer) {
                            let line = line.trim_end_matches('\r');
                            if let Some(data) = data_field(line) {
                                append_data(&mut event, data);
                            }
                        }
                        buffer.clear();
                        let data = event.take().and_then(finish_event)?;
                        return Some((data, (stream, buffer, None, true)));
                    }
                }
            }
        },
    )
}

/// Payload of a `data:` line, without the single optional leading space.
fn data_field(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

fn append_data(event: &mut Option<String>, data: &str) {
    match event {
        Some(joined) => {
            joined.push('\n');
            joined.push_str(data);
        }
        None => *event = Some(data.to_string()),
    }
}

/// The payload of a completed event, unless it carries nothing.
fn finish_event(data: String) -> Option<String> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, String>> + Send + Unpin + 'static {
        let items: Vec<Result<Bytes, String>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(items)
    }

    async fn collect(parts: &[&str]) -> Vec<String> {
        parse_sse_events(chunks(parts)).collect().await
    }

    // ── field helpers ────────────────────────────────────────────────────

    #[test]
    fn data_field_strips_one_space() {
        assert_eq!(data_field("data: {\"type\":\"x\"}"), Some("{\"type\":\"x\"}"));
        assert_eq!(data_field("data:{\"type\":\"x\"}"), Some("{\"type\":\"x\"}"));
        assert_eq!(data_field("data:  indented"), Some(" indented"));
    }

    #[test]
    fn other_fields_are_not_data() {
        assert_eq!(data_field(": keep-alive"), None);
        assert_eq!(data_field("event: response.created"), None);
        assert_eq!(data_field("id: 7"), None);
    }

    #[test]
    fn empty_and_done_events_are_dropped() {
        assert_eq!(finish_event(String::new()), None);
        assert_eq!(finish_event("[DONE]".into()), None);
        assert_eq!(finish_event("{}".into()), Some("{}".into()));
    }

    // ── parse_sse_events ─────────────────────────────────────────────────

    #[tokio::test]
    async fn yields_each_event() {
        let out = collect(&[
            "event: a\ndata: {\"n\":1}\n\n",
            ": keep-alive\n\n",
            "event: b\ndata: {\"n\":2}\n\n",
        ])
        .await;
        assert_eq!(out, vec!["{\"n\":1}", "{\"n\":2}"]);
    }

    #[tokio::test]
    async fn multi_line_data_is_one_payload() {
        let out = collect(&["data: {\"type\":\"x\",\n", "data: \"n\":1}\n\n"]).await;
        assert_eq!(out, vec!["{\"type\":\"x\",\n\"n\":1}"]);
        let value: serde_json::Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[tokio::test]
    async fn joins_lines_split_across_chunks() {
        let out = collect(&["da", "ta: {\"n\"", ":1}\r", "\n\r\n"]).await;
        assert_eq!(out, vec!["{\"n\":1}"]);
    }

    #[tokio::test]
    async fn keeps_unterminated_last_event() {
        let out = collect(&["data: {\"n\":1}\n\n", "data: {\"n\":2}"]).await;
        assert_eq!(out, vec!["{\"n\":1}", "{\"n\":2}"]);
    }

    #[tokio::test]
    async fn done_marker_is_skipped() {
        let out = collect(&["data: {\"n\":1}\n\n", "data: [DONE]\n"]).await;
        assert_eq!(out, vec!["{\"n\":1}"]);
    }

    #[tokio::test]
    async fn read_error_ends_stream() {
        let items: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: {\"n\":1}\n\n")),
            Err("reset".to_string()),
            Ok(Bytes::from_static(b"data: {\"n\":2}\n\n")),
        ];
        let out: Vec<String> = parse_sse_events(stream::iter(items)).collect().await;
        assert_eq!(out, vec!["{\"n\":1}"]);
    }
}
