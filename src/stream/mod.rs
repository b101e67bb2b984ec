pub mod accumulator;
pub mod json_array;
pub mod reasoning;
pub mod sse;

pub use accumulator::{AccumulateError, AddOutcome, CandidateUpdate, ChunkUpdate, DeltaAccumulator};
pub use json_array::JsonArrayDecoder;
pub use reasoning::{ExtractedText, ReasoningExtractor, ReasoningMarker};
pub use sse::{EventStreamDecoder, SseEnvelope, SsePayload};

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tokio_util::sync::CancellationToken;

/// Failure while pulling a value out of a streamed body.
///
/// End-of-stream is not an error: decoders report it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A blank record with no content; call `next()` again.
    #[error("empty event")]
    EmptyEvent,
    #[error("malformed stream data: {0}")]
    Malformed(String),
    #[error("stream transport failed: {0}")]
    Transport(String),
    #[error("stream cancelled")]
    Cancelled,
}

impl DecodeError {
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::EmptyEvent)
    }
}

/// A lazy, finite, non-restartable sequence of decoded chunks.
///
/// `next()` yields `Ok(Some(chunk))`, then `Ok(None)` forever once the
/// stream is exhausted. A terminal error is sticky: every later call returns
/// the same error.
pub trait ChunkDecoder {
    type Item;

    fn next(&mut self) -> impl Future<Output = Result<Option<Self::Item>, DecodeError>> + Send;

    /// Drop the underlying body, closing the upstream connection. Later
    /// calls to `next()` report end-of-stream.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Terminal error latch shared by decoders
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct FailureLatch(Option<DecodeError>);

impl FailureLatch {
    pub(crate) fn check(&self) -> Result<(), DecodeError> {
        match &self.0 {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn record<T>(&mut self, result: Result<T, DecodeError>) -> Result<T, DecodeError> {
        if let Err(err) = &result {
            if !err.is_recoverable() {
                self.0 = Some(err.clone());
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// ByteReader: cancellable pull buffer over a response body
// ---------------------------------------------------------------------------

/// Buffers a byte stream one network chunk at a time.
///
/// Only what the caller has not consumed yet is retained. The optional
/// cancellation token is raced against every chunk read.
pub struct ByteReader<S> {
    body: Option<Pin<Box<S>>>,
    buffer: BytesMut,
    scanned: usize,
    eof: bool,
    cancel: Option<CancellationToken>,
}

impl<S, E> ByteReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
{
    #[must_use]
    pub fn new(body: S) -> Self {
        Self {
            body: Some(Box::pin(body)),
            buffer: BytesMut::new(),
            scanned: 0,
            eof: false,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn consume(&mut self, count: usize) {
        let _ = self.buffer.split_to(count.min(self.buffer.len()));
        self.scanned = 0;
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn close(&mut self) {
        self.body = None;
        self.buffer.clear();
        self.scanned = 0;
        self.eof = true;
    }

    /// Pull one more chunk into the buffer. Returns `false` once the body is
    /// exhausted.
    pub async fn fill(&mut self) -> Result<bool, DecodeError> {
        if self.eof {
            return Ok(false);
        }
        let Self { body, cancel, .. } = self;
        let Some(body) = body.as_mut() else {
            self.eof = true;
            return Ok(false);
        };

        let item = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(DecodeError::Cancelled),
                    item = body.next() => item,
                }
            }
            None => body.next().await,
        };

        match item {
            Some(Ok(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(err)) => Err(DecodeError::Transport(err.to_string())),
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Next `\n`-terminated line without its terminator. A trailing line
    /// with no terminator is returned at end of body if it is non-empty.
    pub async fn next_line(&mut self) -> Result<Option<BytesMut>, DecodeError> {
        loop {
            if let Some(pos) = memchr(b'\n', &self.buffer[self.scanned..]) {
                let mut line = self.buffer.split_to(self.scanned + pos + 1);
                line.truncate(line.len() - 1);
                self.scanned = 0;
                return Ok(Some(line));
            }
            self.scanned = self.buffer.len();

            if !self.fill().await? {
                self.scanned = 0;
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.buffer.split()));
            }
        }
    }
}
