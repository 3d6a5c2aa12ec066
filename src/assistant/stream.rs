use std::pin::Pin;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::assistant::error::AssistantError;
use crate::assistant::types::{ErrorEvent, MessageDeltaEvent, RunObject, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AssistantError>> + Send>>;

pub const EVENT_MESSAGE_DELTA: &str = "thread.message.delta";
pub const EVENT_REQUIRES_ACTION: &str = "thread.run.requires_action";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_DONE: &str = "done";

/// One `event:`/`data:` block of a server-sent event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn is_done(&self) -> bool {
        self.event.as_deref() == Some(EVENT_DONE) || self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE parser; bytes may be split anywhere, frames are emitted
/// once their terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut start = 0usize;
        for i in 0..self.buf.len() {
            if self.buf[i] == b'\n' {
                let line = String::from_utf8_lossy(&self.buf[start..i])
                    .trim_end_matches('\r')
                    .to_string();
                start = i + 1;
                if let Some(frame) = self.push_line(&line) {
                    frames.push(frame);
                }
            }
        }
        // retain tail
        if start > 0 {
            self.buf.drain(0..start);
        }
        frames
    }

    /// Flush a trailing frame when the stream closes without a final blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf)
                .trim_end_matches('\r')
                .to_string();
            self.buf.clear();
            if let Some(frame) = self.push_line(&line) {
                return Some(frame);
            }
        }
        self.take_frame()
    }

    fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.take_frame();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {} // id, retry
        }
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

/// Map one SSE frame onto zero or more stream events.
pub fn decode_frame(frame: &SseFrame) -> Result<Vec<StreamEvent>, AssistantError> {
    let name = frame.event.as_deref().unwrap_or("message");
    match name {
        EVENT_MESSAGE_DELTA => {
            let payload: MessageDeltaEvent =
                serde_json::from_str(&frame.data).map_err(|e| malformed(name, e))?;
            Ok(payload
                .delta
                .content
                .into_iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text.and_then(|text| text.value))
                .filter(|value| !value.is_empty())
                .map(StreamEvent::TextDelta)
                .collect())
        }
        EVENT_REQUIRES_ACTION => {
            let run: RunObject =
                serde_json::from_str(&frame.data).map_err(|e| malformed(name, e))?;
            Ok(vec![StreamEvent::from(run)])
        }
        EVENT_ERROR => {
            let message = serde_json::from_str::<ErrorEvent>(&frame.data)
                .ok()
                .and_then(|e| e.message.or(e.code))
                .unwrap_or_else(|| frame.data.clone());
            Err(AssistantError::StreamFailed(message))
        }
        other => Ok(vec![StreamEvent::Other(other.to_string())]),
    }
}

fn malformed(event: &str, err: serde_json::Error) -> AssistantError {
    AssistantError::MalformedEvent {
        event: event.to_string(),
        message: err.to_string(),
    }
}

/// Decode a batch of frames. The flag is true once the terminal `done`
/// frame (or an error) has been seen; later frames are dropped.
fn decode_frames(frames: Vec<SseFrame>) -> (Vec<Result<StreamEvent, AssistantError>>, bool) {
    let mut items = Vec::new();
    for frame in frames {
        if frame.is_done() {
            return (items, true);
        }
        debug!(event = ?frame.event, "assistant stream frame");
        match decode_frame(&frame) {
            Ok(events) => items.extend(events.into_iter().map(Ok)),
            Err(e) => {
                items.push(Err(e));
                return (items, true);
            }
        }
    }
    (items, false)
}

/// Parse a complete SSE payload in one shot.
#[cfg(test)]
pub fn parse_events(input: &str) -> Result<Vec<StreamEvent>, AssistantError> {
    let mut parser = SseParser::default();
    let mut frames = parser.feed(input.as_bytes());
    frames.extend(parser.finish());
    let (items, _) = decode_frames(frames);
    items.into_iter().collect()
}

/// Turn a streaming HTTP response body into a stream of decoded events.
pub fn event_stream(response: reqwest::Response) -> EventStream {
    let mut bytes = response.bytes_stream();
    let stream = async_stream::stream! {
        let mut parser = SseParser::default();
        loop {
            let (items, finished) = match bytes.next().await {
                Some(Ok(chunk)) => decode_frames(parser.feed(&chunk)),
                Some(Err(e)) => {
                    warn!(err=%e, "error reading assistant event stream");
                    (vec![Err(AssistantError::Request(e))], true)
                }
                None => {
                    let (items, _) = decode_frames(parser.finish().into_iter().collect());
                    (items, true)
                }
            };
            for item in items {
                yield item;
            }
            if finished {
                break;
            }
        }
    };
    Box::pin(stream)
}
