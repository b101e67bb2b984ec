use crate::pipeline::{ChunkAction, PipelineError, StreamAdapter};
use crate::protocol::canonical::{CanonicalPart, CanonicalUsage};
use crate::stream::accumulator::{CandidateUpdate, ChunkUpdate, ToolCallFragment};
use crate::stream::{SseEnvelope, SsePayload};

use super::{to_canonical_completion, ChatCompletion, ChatResponse};

/// Stream adapter for another gateway's `chat/stream` endpoint.
///
/// Frames with `delta: true` are folded; the `delta: false` frame is the
/// sender's own aggregate and ends the stream. A body that ends before it is
/// unfinished.
#[derive(Debug, Default)]
pub struct LlmapiStreamAdapter {
    next_call: u32,
}

impl LlmapiStreamAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn delta_update(&mut self, completion: ChatCompletion) -> Result<ChunkUpdate, PipelineError> {
        let usage: Option<CanonicalUsage> = completion.usage.map(Into::into);
        let canonical = to_canonical_completion(completion)
            .map_err(|err| PipelineError::Upstream(err.to_string()))?;

        let mut candidate = CandidateUpdate::new(0);
        for part in canonical.message.parts {
            match part {
                // Deltas carry whole tool calls; give each its own slot.
                CanonicalPart::ToolCall(call) => {
                    candidate.tool_call_fragments.push(ToolCallFragment {
                        index: self.next_call,
                        id: Some(call.id),
                        name: Some(call.name),
                        arguments: call.arguments,
                    });
                    self.next_call += 1;
                }
                other => candidate.parts.push(other),
            }
        }

        Ok(ChunkUpdate {
            response_id: Some(canonical.message.id).filter(|id| !id.is_empty()),
            model: Some(canonical.model).filter(|model| !model.is_empty()),
            usage: usage.filter(|usage| !usage.is_empty()),
            created: None,
            metadata: None,
            candidates: vec![candidate],
        })
    }
}

impl StreamAdapter for LlmapiStreamAdapter {
    type Chunk = SseEnvelope<ChatResponse>;

    fn translate(&mut self, chunk: Self::Chunk) -> Result<ChunkAction, PipelineError> {
        let response = match chunk.data {
            Some(SsePayload::Json(response)) => response,
            Some(SsePayload::Text(text)) => {
                tracing::debug!(payload = %text, "skipping non-JSON stream payload");
                return Ok(ChunkAction::Skip);
            }
            None => return Ok(ChunkAction::Skip),
        };
        if let Some(error) = response.error {
            return Err(PipelineError::Upstream(error.message));
        }
        let Some(completion) = response.chat_completion else {
            return Ok(ChunkAction::Skip);
        };
        if completion.delta {
            return Ok(ChunkAction::Update(self.delta_update(completion)?));
        }
        let mut completion = to_canonical_completion(completion)
            .map_err(|err| PipelineError::Upstream(err.to_string()))?;
        completion.delta = false;
        Ok(ChunkAction::Final(completion))
    }

    fn requires_terminator(&self) -> bool {
        true
    }
}
