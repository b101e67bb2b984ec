use crate::error::GatewayError;
use crate::pipeline::{ChunkAction, PipelineError, StreamAdapter};
use crate::protocol::canonical::{
    new_message_id, CanonicalCompletion, CanonicalMessage, CanonicalPart, CanonicalRole,
    CanonicalToolCall, CanonicalUsage,
};
use crate::stream::accumulator::{CandidateUpdate, ChunkUpdate, ToolCallFragment};
use crate::stream::reasoning::{extract_reasoning_from_full_text, ReasoningMarker};
use crate::stream::{SseEnvelope, SsePayload};

use super::decoder::content_text;
use super::{OpenAiChatResponse, OpenAiStreamChunk, OpenAiUsage};

impl From<OpenAiUsage> for CanonicalUsage {
    fn from(usage: OpenAiUsage) -> Self {
        CanonicalUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Decode a non-streaming `OpenAI` Chat response.
///
/// Reasoning comes from `reasoning_content` when present; otherwise the
/// content is checked for an inline marker spanning the whole answer.
///
/// # Errors
///
/// Returns [`GatewayError::Translation`] when the response has no choices.
pub fn decode_openai_chat_response(
    response: OpenAiChatResponse,
    markers: &[ReasoningMarker],
) -> Result<CanonicalCompletion, GatewayError> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(GatewayError::Translation(
            "upstream response has no choices".to_string(),
        ));
    };
    let wire = choice.message;

    let mut message = CanonicalMessage {
        id: if response.id.is_empty() {
            new_message_id()
        } else {
            response.id
        },
        role: CanonicalRole::Assistant,
        parts: smallvec::SmallVec::new(),
    };

    let content = wire.content.as_ref().map(content_text).unwrap_or_default();
    match wire.reasoning_content.filter(|r| !r.is_empty()) {
        Some(reasoning) => {
            message.parts.push(CanonicalPart::reasoning(reasoning));
            if !content.is_empty() {
                message.parts.push(CanonicalPart::text(content));
            }
        }
        None => {
            let split = extract_reasoning_from_full_text(&content, markers);
            if !split.reasoning.is_empty() {
                message.parts.push(CanonicalPart::reasoning(split.reasoning));
            }
            if !split.visible.is_empty() {
                message.parts.push(CanonicalPart::text(split.visible));
            }
        }
    }

    if let Some(refusal) = wire.refusal {
        message.parts.push(CanonicalPart::Refusal { text: refusal });
    }
    if let Some(audio) = wire.audio {
        message.parts.push(CanonicalPart::Audio {
            id: Some(audio.id),
            data: audio.data.unwrap_or_default(),
            format: "wav".to_string(),
            transcript: audio.transcript,
            delta: false,
        });
    }
    for call in wire.tool_calls.unwrap_or_default() {
        message.parts.push(CanonicalPart::ToolCall(CanonicalToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        }));
    }

    Ok(CanonicalCompletion {
        delta: false,
        model: response.model,
        message,
        usage: response.usage.map(CanonicalUsage::from).unwrap_or_default(),
    })
}

/// Translate one streamed chunk into an accumulator update.
#[must_use]
pub fn chunk_update(chunk: OpenAiStreamChunk) -> ChunkUpdate {
    let candidates = chunk
        .choices
        .into_iter()
        .map(|choice| {
            let delta = choice.delta;
            let mut candidate = CandidateUpdate::new(choice.index);
            candidate.finish_reason = choice.finish_reason;
            // Presence of the field, even empty, marks this backend as
            // reporting reasoning separately.
            if let Some(reasoning) = delta.reasoning_content {
                candidate.parts.push(CanonicalPart::reasoning(reasoning));
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                candidate.parts.push(CanonicalPart::text(content));
            }
            if let Some(refusal) = delta.refusal.filter(|r| !r.is_empty()) {
                candidate.parts.push(CanonicalPart::Refusal { text: refusal });
            }
            candidate.tool_call_fragments = delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| {
                    let function = call.function.unwrap_or_default();
                    ToolCallFragment {
                        index: call.index,
                        id: call.id,
                        name: function.name,
                        arguments: function.arguments.unwrap_or_default(),
                    }
                })
                .collect();
            candidate
        })
        .collect();

    ChunkUpdate {
        response_id: Some(chunk.id).filter(|id| !id.is_empty()),
        model: Some(chunk.model).filter(|model| !model.is_empty()),
        usage: chunk.usage.map(CanonicalUsage::from),
        created: (chunk.created > 0).then_some(chunk.created),
        metadata: None,
        candidates,
    }
}

/// Stream adapter for `OpenAI`-compatible chat-completion event streams.
#[derive(Debug, Default)]
pub struct OpenAiStreamAdapter;

impl StreamAdapter for OpenAiStreamAdapter {
    type Chunk = SseEnvelope<OpenAiStreamChunk>;

    fn translate(&mut self, chunk: Self::Chunk) -> Result<ChunkAction, PipelineError> {
        match chunk.data {
            None => Ok(ChunkAction::Skip),
            Some(payload) if payload.is_done() => Ok(ChunkAction::Done),
            Some(SsePayload::Text(text)) => {
                tracing::debug!(payload = %text, "skipping non-JSON stream payload");
                Ok(ChunkAction::Skip)
            }
            Some(SsePayload::Json(chunk)) => {
                if let Some(error) = chunk.error {
                    let message = error
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .map_or_else(|| error.to_string(), str::to_string);
                    return Err(PipelineError::Upstream(message));
                }
                Ok(ChunkAction::Update(chunk_update(chunk)))
            }
        }
    }
}
