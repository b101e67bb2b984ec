//! Per-request decode/accumulate loop.
//!
//! One pipeline owns one decoder, one adapter and one [`DeltaAccumulator`].
//! It pulls a single chunk at a time, so the upstream connection is only
//! read as fast as the callbacks consume.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::canonical::CanonicalCompletion;
use crate::stream::accumulator::{AccumulateError, CandidateIncrement, ChunkUpdate};
use crate::stream::{ChunkDecoder, DecodeError, DeltaAccumulator};

/// Error returned by a caller-registered callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
    #[error("callback aborted the stream: {0}")]
    Callback(#[from] CallbackError),
    /// The backend reported an error inside the stream.
    #[error("upstream stream error: {0}")]
    Upstream(String),
    #[error("stream ended before the response was finished")]
    Unfinished,
    #[error("upstream returned no candidates")]
    EmptyResponse,
}

/// Receives completions produced by the pipeline.
#[async_trait]
pub trait CompletionCallback: Send + Sync {
    async fn call(&self, completion: CanonicalCompletion) -> Result<(), CallbackError>;
}

#[async_trait]
impl CompletionCallback for mpsc::Sender<CanonicalCompletion> {
    async fn call(&self, completion: CanonicalCompletion) -> Result<(), CallbackError> {
        self.send(completion)
            .await
            .map_err(|_| CallbackError("completion receiver dropped".to_string()))
    }
}

/// Adapts a plain closure into a [`CompletionCallback`].
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F> CompletionCallback for FnCallback<F>
where
    F: Fn(CanonicalCompletion) -> Result<(), CallbackError> + Send + Sync,
{
    async fn call(&self, completion: CanonicalCompletion) -> Result<(), CallbackError> {
        (self.0)(completion)
    }
}

/// The two callback channels a pipeline can report to.
#[derive(Clone, Default)]
pub struct StreamCallbacks {
    /// Invoked with each increment, in arrival order.
    pub on_delta: Option<Arc<dyn CompletionCallback>>,
    /// Invoked after each increment with the whole aggregate so far.
    pub on_snapshot: Option<Arc<dyn CompletionCallback>>,
}

impl StreamCallbacks {
    #[must_use]
    pub fn on_delta(mut self, callback: impl CompletionCallback + 'static) -> Self {
        self.on_delta = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_snapshot(mut self, callback: impl CompletionCallback + 'static) -> Self {
        self.on_snapshot = Some(Arc::new(callback));
        self
    }

    /// Whether the backend should be asked to stream.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.on_delta.is_some() || self.on_snapshot.is_some()
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_delta", &self.on_delta.is_some())
            .field("on_snapshot", &self.on_snapshot.is_some())
            .finish()
    }
}

/// What an adapter made of one decoded chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkAction {
    Update(ChunkUpdate),
    /// Keep-alive or bookkeeping event with nothing to fold.
    Skip,
    /// The backend's explicit end-of-response marker.
    Done,
    /// The backend sent its own final aggregate.
    Final(CanonicalCompletion),
}

/// Translates one backend's stream chunks into canonical updates.
pub trait StreamAdapter: Send {
    type Chunk;

    /// # Errors
    ///
    /// Returns [`PipelineError::Upstream`] when the chunk is an error report.
    fn translate(&mut self, chunk: Self::Chunk) -> Result<ChunkAction, PipelineError>;

    /// Whether reaching end-of-body without `Done`/`Final` is an error.
    fn requires_terminator(&self) -> bool {
        false
    }
}

/// Drive `decoder` to completion, folding every chunk into `accumulator`.
///
/// Returns the final aggregate. Any callback error closes the decoder and is
/// returned unchanged; recoverable empty events are skipped.
///
/// Callback order per update: the update is validated and folded first, then
/// `on_delta` receives the increments in arrival order, then `on_snapshot`
/// the new aggregate. The delta carries the visible/reasoning split, which
/// only exists once the per-candidate extractor has seen the text, so it
/// cannot run ahead of the fold. An update the accumulator rejects reaches
/// neither callback.
///
/// # Errors
///
/// Decode, accumulate, callback and upstream failures, as [`PipelineError`].
pub async fn run_pipeline<D, A>(
    decoder: &mut D,
    adapter: &mut A,
    mut accumulator: DeltaAccumulator,
    callbacks: &StreamCallbacks,
) -> Result<CanonicalCompletion, PipelineError>
where
    D: ChunkDecoder + Send,
    A: StreamAdapter<Chunk = D::Item>,
{
    loop {
        let chunk = match decoder.next().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                if adapter.requires_terminator() {
                    return Err(PipelineError::Unfinished);
                }
                break;
            }
            Err(err) if err.is_recoverable() => continue,
            Err(err) => return Err(err.into()),
        };

        let action = match adapter.translate(chunk) {
            Ok(action) => action,
            Err(err) => {
                decoder.close();
                return Err(err);
            }
        };

        match action {
            ChunkAction::Skip => {}
            ChunkAction::Done => {
                decoder.close();
                break;
            }
            ChunkAction::Final(completion) => {
                decoder.close();
                return Ok(completion);
            }
            ChunkAction::Update(update) => {
                let outcome = match accumulator.add(update) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        decoder.close();
                        return Err(err.into());
                    }
                };
                if let Err(err) =
                    emit(&accumulator, &outcome.increments, outcome.changed, callbacks).await
                {
                    decoder.close();
                    return Err(err.into());
                }
            }
        }
    }

    let tail = accumulator.finish();
    emit(&accumulator, &tail, !tail.is_empty(), callbacks).await?;

    if !accumulator.has_candidate(0) {
        return Err(PipelineError::EmptyResponse);
    }
    let completion = accumulator.completion();
    tracing::debug!(
        model = %completion.model,
        total_tokens = completion.usage.total_tokens,
        "stream finished"
    );
    Ok(completion)
}

async fn emit(
    accumulator: &DeltaAccumulator,
    increments: &[CandidateIncrement],
    changed: bool,
    callbacks: &StreamCallbacks,
) -> Result<(), CallbackError> {
    if let Some(on_delta) = &callbacks.on_delta {
        for increment in increments
            .iter()
            .filter(|increment| increment.index == 0 && !increment.parts.is_empty())
        {
            on_delta.call(accumulator.delta_completion(increment)).await?;
        }
    }
    if changed {
        if let Some(on_snapshot) = &callbacks.on_snapshot {
            on_snapshot.call(accumulator.snapshot()).await?;
        }
    }
    Ok(())
}
