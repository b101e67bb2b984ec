/// Event-stream (`text/event-stream`) decoder and frame encoders.
///
/// The decoder pulls one event at a time from a byte stream and decodes the
/// event's lines straight into the caller's target type, so vendor payloads
/// never pass through an intermediate string map unless they need to.
use std::fmt::Display;
use std::marker::PhantomData;

use bytes::Bytes;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{ByteReader, ChunkDecoder, DecodeError, FailureLatch};

const DONE_FRAME: &str = "data: [DONE]\n\n";

// ---------------------------------------------------------------------------
// EventStreamDecoder
// ---------------------------------------------------------------------------

/// Decodes a server-sent-events body into values of type `T`.
///
/// Lines are trimmed; `:` comments are dropped; a blank line closes the
/// event. An unterminated final event is still decoded if it has content.
pub struct EventStreamDecoder<S, T> {
    reader: ByteReader<S>,
    finished: bool,
    latch: FailureLatch,
    _target: PhantomData<fn() -> T>,
}

impl<S, E, T> EventStreamDecoder<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
    T: DeserializeOwned,
{
    #[must_use]
    pub fn new(body: S) -> Self {
        Self {
            reader: ByteReader::new(body),
            finished: false,
            latch: FailureLatch::default(),
            _target: PhantomData,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.reader = self.reader.with_cancellation(token);
        self
    }

    /// Decode the next event.
    ///
    /// # Errors
    ///
    /// [`DecodeError::EmptyEvent`] for a blank event (retry the call);
    /// [`DecodeError::Malformed`], [`DecodeError::Transport`] and
    /// [`DecodeError::Cancelled`] are terminal and repeated on later calls.
    pub async fn next_event(&mut self) -> Result<Option<T>, DecodeError> {
        self.latch.check()?;
        let result = self.read_event().await;
        self.latch.record(result)
    }

    async fn read_event(&mut self) -> Result<Option<T>, DecodeError> {
        if self.finished {
            return Ok(None);
        }

        let mut lines: Vec<String> = Vec::new();
        loop {
            let Some(raw) = self.reader.next_line().await? else {
                self.finished = true;
                break;
            };
            let line = std::str::from_utf8(&raw)
                .map_err(|err| DecodeError::Malformed(format!("event line is not UTF-8: {err}")))?
                .trim();
            if line.is_empty() {
                break;
            }
            if line.starts_with(':') {
                continue;
            }
            lines.push(line.to_owned());
        }

        if lines.is_empty() {
            return if self.finished {
                Ok(None)
            } else {
                Err(DecodeError::EmptyEvent)
            };
        }

        decode_event_lines(&lines).map(Some)
    }
}

impl<S, E, T> ChunkDecoder for EventStreamDecoder<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
    T: DeserializeOwned + Send,
{
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>, DecodeError> {
        self.next_event().await
    }

    fn close(&mut self) {
        self.reader.close();
        self.finished = true;
    }
}

// ---------------------------------------------------------------------------
// Event payload decoding
// ---------------------------------------------------------------------------

/// Decode the lines of one event, trying the whole event as a JSON document
/// first and falling back to `field: value` merging.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] when neither form yields a `T`.
pub fn decode_event_lines<T: DeserializeOwned>(lines: &[String]) -> Result<T, DecodeError> {
    if let Some(value) = decode_event_direct(lines) {
        return Ok(value);
    }
    decode_event_fields(lines)
}

/// Parse the newline-joined lines as one JSON document.
#[must_use]
pub fn decode_event_direct<T: DeserializeOwned>(lines: &[String]) -> Option<T> {
    serde_json::from_str(&lines.join("\n")).ok()
}

/// Interpret each line as `field:value`, merge repeated fields with `\n`,
/// lift values that parse as JSON objects, and decode the resulting object.
///
/// One leading space after the colon is dropped, as in the SSE convention.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for a line without a colon or when the
/// synthesized object does not fit `T`.
pub fn decode_event_fields<T: DeserializeOwned>(lines: &[String]) -> Result<T, DecodeError> {
    let mut merged: Vec<(&str, String)> = Vec::with_capacity(lines.len());
    for line in lines {
        let Some((field, value)) = line.split_once(':') else {
            return Err(DecodeError::Malformed(format!(
                "event line has no field separator: {line}"
            )));
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match merged.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => merged.push((field, value.to_owned())),
        }
    }

    let mut object = Map::with_capacity(merged.len());
    for (field, value) in merged {
        let value = match serde_json::from_str::<Map<String, Value>>(&value) {
            Ok(inner) => Value::Object(inner),
            Err(_) => Value::String(value),
        };
        object.insert(field.to_owned(), value);
    }

    serde_json::from_value(Value::Object(object))
        .map_err(|err| DecodeError::Malformed(format!("event does not match target: {err}")))
}

/// Target shape for vendors that send `event:`/`data:` pairs.
///
/// Both fields are plain `Option`s so the derived impl needs nothing of `T`
/// beyond `Deserialize`; a field-level `default` would add a `T: Default`
/// bound.
#[derive(Debug, Clone, Deserialize)]
pub struct SseEnvelope<T> {
    pub event: Option<String>,
    pub data: Option<SsePayload<T>>,
}

/// A `data` field is either a JSON object of the expected shape or a bare
/// string such as the `[DONE]` sentinel.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SsePayload<T> {
    Json(T),
    Text(String),
}

impl<T> SsePayload<T> {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, SsePayload::Text(text) if text.trim() == "[DONE]")
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format an unnamed frame (`data: ...`).
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Format a named frame (`event: ...` + `data: ...`).
#[must_use]
pub fn named_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

#[must_use]
pub fn done_frame() -> String {
    DONE_FRAME.to_owned()
}
