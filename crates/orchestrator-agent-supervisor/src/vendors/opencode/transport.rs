use std::collections::{HashMap, VecDeque};
use std::fmt::Display;

use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::errors::ServerError;
use crate::event::RawEvent;
use crate::model::SessionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental server-sent events decoder; chunks may split frames anywhere.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Decodes one frame's payload. Frames without data (keep-alives) yield `None`.
pub(crate) fn decode_frame(frame: &SseFrame) -> Result<Option<RawEvent>, ServerError> {
    if frame.data.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&frame.data)
        .map(Some)
        .map_err(|e| ServerError::protocol(format!("invalid event frame: {e}")))
}

/// Reads the `/session/status` body: a map of session id to status object.
///
/// Entries with a status type this crate does not know are kept as
/// `Running`; the session still exists and is not idle.
pub(crate) fn parse_status_map(
    value: serde_json::Value,
) -> Result<HashMap<String, SessionStatus>, ServerError> {
    let serde_json::Value::Object(entries) = value else {
        return Err(ServerError::protocol("session status response is not an object"));
    };
    Ok(entries
        .into_iter()
        .map(|(session_id, raw)| {
            let status = serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
                debug!(
                    session_id = %session_id,
                    status = %raw,
                    error = %e,
                    "unknown session status; treating as running"
                );
                SessionStatus::Running
            });
            (session_id, status)
        })
        .collect())
}

/// Turns a raw byte stream into decoded feed events.
///
/// Malformed frames are skipped. A read error ends the stream with a
/// transport error so the consumer reconnects.
pub(crate) fn event_stream<S, E>(
    bytes_stream: S,
) -> impl futures::Stream<Item = Result<RawEvent, ServerError>> + Send + 'static
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    struct State<S> {
        bytes_stream: S,
        decoder: SseDecoder,
        pending: VecDeque<RawEvent>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            match decode_frame(&frame) {
                                Ok(Some(event)) => state.pending.push_back(event),
                                Ok(None) => {}
                                Err(err) => warn!(error = %err, "skipping malformed event frame"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ServerError::transport(format!("event feed read failed: {e}")));
                    }
                    None => state.done = true,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"data: {\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"se";
        let part2 = b"s_1\"}}\r\n\r\n: keep-alive\n\n";
        assert!(decoder.push_chunk(part1).is_empty());
        let frames = decoder.push_chunk(part2);
        assert_eq!(frames.len(), 1);
        let event = decode_frame(&frames[0]).expect("decode").expect("event");
        assert_eq!(event.event_type, "session.idle");
        assert_eq!(event.properties["sessionID"], "ses_1");
    }

    #[test]
    fn frames_without_data_are_not_events() {
        let frame = SseFrame {
            event: Some("ping".into()),
            data: String::new(),
        };
        assert_eq!(decode_frame(&frame).expect("decode"), None);
        let bad = SseFrame {
            event: None,
            data: "{not json".into(),
        };
        assert!(matches!(decode_frame(&bad), Err(ServerError::Protocol { .. })));
    }

    #[test]
    fn status_map_reads_known_and_unknown_types() {
        let statuses = parse_status_map(serde_json::json!({
            "ses_1": {"type": "idle"},
            "ses_2": {"type": "busy"},
            "ses_3": {"type": "retry", "attempt": 1, "message": "rate limited", "next": 5},
            "ses_4": {"type": "compacting"}
        }))
        .expect("status map");
        assert_eq!(statuses["ses_1"], SessionStatus::Idle);
        assert_eq!(statuses["ses_2"], SessionStatus::Running);
        assert_eq!(
            statuses["ses_3"],
            SessionStatus::Retry {
                message: "rate limited".into()
            }
        );
        assert_eq!(statuses["ses_4"], SessionStatus::Running);
        assert!(parse_status_map(serde_json::json!([])).is_err());
    }

    #[tokio::test]
    async fn byte_stream_yields_events_and_surfaces_read_errors() {
        let chunks: Vec<Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"type\":\"server.connected\",\"properties\":{}}\n\ndata: {oops}\n\n",
            )),
            Ok(bytes::Bytes::from_static(
                b"data: {\"type\":\"file.edited\",\"properties\":{\"file\":\"a.rs\"}}\n\n",
            )),
            Err("connection reset".to_string()),
        ];
        let events: Vec<_> = event_stream(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().map(|e| e.event_type.as_str()), Ok("server.connected"));
        assert_eq!(events[1].as_ref().map(|e| e.event_type.as_str()), Ok("file.edited"));
        assert!(matches!(
            &events[2],
            Err(ServerError::Transport { message }) if message.contains("connection reset")
        ));
    }
}
