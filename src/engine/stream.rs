//! Event-framed streaming bodies.
//!
//! The proxy forwards provider output as newline-delimited frames:
//!
//! ```text
//! event: request_info
//! data: {"method": "POST", "url": "..."}
//!
//! data: {"token": "He"}
//!
//! data: {"token": "llo"}
//!
//! event: done
//! data: {}
//! ```
//!
//! [`FrameDecoder`] reassembles lines across arbitrary chunk boundaries and
//! turns them into [`StreamEvent`]s. The engine side accumulates tokens in
//! arrival order and only commits the text to the slot when the stream ends.

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Engine, Run, RunError, Settled};
use crate::definition::RunResult;
use crate::events::Event;
use crate::metrics::MetricsCollector;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text fragment to append.
    Token(String),
    /// Server-flagged error. Marks the run as interrupted but doesn't
    /// abort the read.
    Error(String),
    /// Graceful completion.
    Done,
    /// Description of the upstream request the proxy sent.
    RequestInfo(Value),
}

/// Incremental line-framing decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Name from the most recent `event:` line, until the frame ends.
    event: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..pos], &mut events);
        }
        events
    }

    /// Decode whatever is left once the body has ended. A trailing line
    /// without a newline is still a complete line at end of stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut events);
        }
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(line.as_ref());

        if line.is_empty() {
            self.event = None;
            return;
        }

        if let Some(name) = field(line, "event") {
            if name == "done" {
                events.push(StreamEvent::Done);
            }
            self.event = Some(name.to_string());
            return;
        }

        let Some(data) = field(line, "data") else {
            return;
        };
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            debug!(line = %line, "discarding malformed data frame");
            return;
        };

        match self.event.as_deref() {
            Some("request_info") => events.push(StreamEvent::RequestInfo(value)),
            Some("error") => {
                let message = match value.get("error") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => value.to_string(),
                };
                events.push(StreamEvent::Error(message));
            }
            _ => {
                if let Some(token) = value.get("token").and_then(Value::as_str)
                    && !token.is_empty()
                {
                    events.push(StreamEvent::Token(token.to_string()));
                }
                match value.get("error") {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => events.push(StreamEvent::Error(s.clone())),
                    Some(other) => events.push(StreamEvent::Error(other.to_string())),
                }
            }
        }
    }
}

/// Value of a `name: value` line, if the line is that field.
fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

impl Engine {
    pub(crate) async fn run_stream(&self, run: &Run<'_>, metrics: &mut MetricsCollector) -> Settled {
        metrics.start_stream();
        let opened = tokio::select! {
            biased;
            _ = run.token.cancelled() => return Settled::Cancelled,
            body = self.backend.stream(run.sent) => body,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(e) => return Settled::Failed(RunError::Transport(format!("{e:#}"))),
        };

        let mut decoder = FrameDecoder::new();
        let mut state = StreamState::default();

        while !state.done {
            // Returning from here drops `body`, which releases the reader.
            let chunk = tokio::select! {
                biased;
                _ = run.token.cancelled() => return Settled::Cancelled,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => self.apply(run, decoder.feed(&bytes), metrics, &mut state),
                Some(Err(e)) => return Settled::Failed(RunError::Transport(format!("{e:#}"))),
                None => break,
            }
        }
        if !state.done {
            self.apply(run, decoder.finish(), metrics, &mut state);
            if !state.done {
                warn!(slot = %run.slot, "stream ended without a done event");
            }
        }
        drop(body);

        info!(slot = %run.slot, chars = state.text.chars().count(), "stream complete");
        // Text that made it out before an error frame is still the slot's
        // latest response.
        match state.server_error {
            Some(message) if state.text.is_empty() => {
                Settled::Failed(RunError::Application(message))
            }
            Some(message) => Settled::Interrupted {
                result: RunResult::streamed(state.text),
                upstream: state.upstream,
                error: RunError::Application(message),
            },
            None => Settled::Rendered {
                result: RunResult::streamed(state.text),
                upstream: state.upstream,
            },
        }
    }

    /// Apply decoded events in order. Anything after `Done` is ignored.
    fn apply(
        &self,
        run: &Run<'_>,
        events: Vec<StreamEvent>,
        metrics: &mut MetricsCollector,
        state: &mut StreamState,
    ) {
        for event in events {
            if state.done {
                return;
            }
            match event {
                StreamEvent::Token(token) => {
                    metrics.record_token(&token);
                    state.text.push_str(&token);
                    self.events.emit(Event::Token {
                        slot: run.slot,
                        text: token,
                    });
                }
                StreamEvent::Error(message) => {
                    warn!(slot = %run.slot, error = %message, "stream error");
                    self.events.emit(Event::StreamError {
                        slot: run.slot,
                        message: message.clone(),
                    });
                    state.server_error.get_or_insert(message);
                }
                StreamEvent::RequestInfo(info) => state.upstream = Some(info),
                StreamEvent::Done => state.done = true,
            }
        }
    }
}

/// What a running stream has accumulated so far.
#[derive(Default)]
struct StreamState {
    text: String,
    upstream: Option<Value>,
    /// First server-flagged error, if any.
    server_error: Option<String>,
    done: bool,
}
