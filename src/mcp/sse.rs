//! Server-Sent Events framing
//!
//! Reassembles an event stream from arbitrarily chunked bytes. Events are
//! separated by a blank line; `\n`, `\r\n` and `\r` line endings are all
//! accepted and normalized to `\n` on the way in. The payload of an event is
//! carried on its `data: ` line(s). Payloads that parse as JSON are yielded as
//! [`StreamEvent::Json`], anything else as [`StreamEvent::Text`].
//!
//! The framer holds two carry-over buffers between chunks: undecoded bytes of
//! a UTF-8 sequence split across a chunk boundary, and decoded text of an
//! event whose terminating blank line has not arrived yet.

use serde_json::Value;

/// Field prefix carrying the event payload
const DATA_FIELD: &str = "data:";

/// Event boundary, after line-ending normalization
const EVENT_SEPARATOR: &str = "\n\n";

/// A single decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Payload parsed as JSON
    Json(Value),

    /// Payload that was not valid JSON, passed through verbatim
    Text(String),
}

impl StreamEvent {
    /// Convert into a JSON value; raw text becomes a JSON string
    pub fn into_value(self) -> Value {
        match self {
            StreamEvent::Json(value) => value,
            StreamEvent::Text(text) => Value::String(text),
        }
    }
}

/// Incremental event-stream parser
#[derive(Debug, Default)]
pub struct SseFramer {
    /// Decoded text not yet terminated by a blank line
    buffer: String,

    /// Trailing bytes of an incomplete UTF-8 sequence
    partial_utf8: Vec<u8>,

    /// A `\r` ended the last chunk
    pending_cr: bool,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every event it completes, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.decode(chunk);

        let mut events = Vec::new();
        while let Some(event_end) = self.buffer.find(EVENT_SEPARATOR) {
            let block: String = self
                .buffer
                .drain(..event_end + EVENT_SEPARATOR.len())
                .collect();

            if let Some(event) = parse_event_block(&block[..event_end]) {
                events.push(event);
            }
        }
        events
    }

    /// Text received after the last complete event
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Whether any undelivered input is buffered
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.partial_utf8.is_empty() || self.pending_cr
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.partial_utf8.extend_from_slice(chunk);

        loop {
            let outcome = std::str::from_utf8(&self.partial_utf8)
                .map(|_| ())
                .map_err(|e| (e.valid_up_to(), e.error_len()));

            match outcome {
                Ok(()) => {
                    let text = String::from_utf8_lossy(&self.partial_utf8).into_owned();
                    self.append(&text);
                    self.partial_utf8.clear();
                    return;
                }
                Err((valid, None)) => {
                    // Incomplete sequence at the end: keep it for the next chunk
                    let text = String::from_utf8_lossy(&self.partial_utf8[..valid]).into_owned();
                    self.append(&text);
                    self.partial_utf8.drain(..valid);
                    return;
                }
                Err((valid, Some(invalid_len))) => {
                    let mut text =
                        String::from_utf8_lossy(&self.partial_utf8[..valid]).into_owned();
                    text.push(char::REPLACEMENT_CHARACTER);
                    self.append(&text);
                    self.partial_utf8.drain(..valid + invalid_len);
                }
            }
        }
    }

    /// Append decoded text, turning `\r\n` and lone `\r` into `\n`
    ///
    /// A trailing `\r` is held until the next character shows whether it
    /// starts a CRLF pair.
    fn append(&mut self, text: &str) {
        for c in text.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                self.buffer.push('\n');
                if c == '\n' {
                    continue;
                }
            }
            if c == '\r' {
                self.pending_cr = true;
            } else {
                self.buffer.push(c);
            }
        }
    }
}

/// Extract the payload of one event block
///
/// Returns `None` for blocks without a data field (comments, bare `event:`
/// or `id:` lines). Multiple data lines are joined with `\n`.
pub fn parse_event_block(block: &str) -> Option<StreamEvent> {
    let mut data: Option<String> = None;

    for line in block.lines() {
        let Some(value) = line.strip_prefix(DATA_FIELD) else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    let data = data?;
    match serde_json::from_str::<Value>(&data) {
        Ok(value) => Some(StreamEvent::Json(value)),
        Err(_) => Some(StreamEvent::Text(data)),
    }
}
