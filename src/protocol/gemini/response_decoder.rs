use smallvec::SmallVec;

use crate::error::GatewayError;
use crate::pipeline::{ChunkAction, PipelineError, StreamAdapter};
use crate::protocol::canonical::{
    new_message_id, CanonicalCompletion, CanonicalMessage, CanonicalPart, CanonicalRole,
    CanonicalToolCall, CanonicalUsage,
};
use crate::stream::accumulator::{CandidateUpdate, ChunkUpdate, ToolCallFragment};

use super::{GeminiCandidate, GeminiPart, GeminiResponse, GeminiUsageMetadata};

impl From<GeminiUsageMetadata> for CanonicalUsage {
    fn from(usage: GeminiUsageMetadata) -> Self {
        CanonicalUsage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }
    }
}

/// Content parts of one Gemini part, in order. Function calls are returned
/// separately because streams report them as fragments.
fn decode_part(part: GeminiPart, out: &mut Vec<CanonicalPart>) -> Option<CanonicalToolCall> {
    let signature = part.thought_signature.filter(|sig| !sig.is_empty());
    if part.thought {
        if part.text.is_some() || signature.is_some() {
            out.push(CanonicalPart::Reasoning {
                text: part.text.unwrap_or_default(),
                signature,
            });
        }
    } else {
        // An answer part may carry the signature of the thinking before it.
        if signature.is_some() {
            out.push(CanonicalPart::Reasoning {
                text: String::new(),
                signature,
            });
        }
        if let Some(text) = part.text.filter(|text| !text.is_empty()) {
            out.push(CanonicalPart::text(text));
        }
    }

    if let Some(blob) = part.inline_data {
        if let Some(format) = blob.mime_type.strip_prefix("audio/") {
            out.push(CanonicalPart::Audio {
                id: None,
                data: blob.data,
                format: format.to_string(),
                transcript: None,
                delta: false,
            });
        } else {
            tracing::debug!(mime = %blob.mime_type, "ignoring inline data in Gemini response");
        }
    }

    part.function_call.map(|call| CanonicalToolCall {
        id: call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: call.name,
        arguments: call.args.to_string(),
    })
}

/// Per-candidate data that has no canonical part: safety ratings, citations
/// and grounding.
fn candidate_metadata(candidate: &GeminiCandidate) -> Option<serde_json::Value> {
    let mut metadata = serde_json::Map::new();
    for (key, value) in [
        ("safetyRatings", &candidate.safety_ratings),
        ("citationMetadata", &candidate.citation_metadata),
        ("groundingMetadata", &candidate.grounding_metadata),
    ] {
        if let Some(value) = value {
            metadata.insert(key.to_string(), value.clone());
        }
    }
    (!metadata.is_empty()).then_some(serde_json::Value::Object(metadata))
}

fn error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| error.to_string(), str::to_string)
}

/// Decode a non-streaming Gemini response (candidate 0).
///
/// # Errors
///
/// Returns [`GatewayError::Translation`] when there is no candidate with
/// content, or the upstream error message when one was returned in-band.
pub fn decode_gemini_response(response: GeminiResponse) -> Result<CanonicalCompletion, GatewayError> {
    if let Some(error) = &response.error {
        return Err(GatewayError::Translation(error_message(error)));
    }
    let Some(content) = response
        .candidates
        .into_iter()
        .find(|candidate| candidate.index == 0)
        .and_then(|candidate| candidate.content)
    else {
        return Err(GatewayError::Translation(
            "upstream response has no candidate content".to_string(),
        ));
    };

    let mut parts = Vec::with_capacity(content.parts.len());
    let mut calls = Vec::new();
    for part in content.parts {
        if let Some(call) = decode_part(part, &mut parts) {
            calls.push(call);
        }
    }
    let mut message = CanonicalMessage {
        id: response
            .response_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_message_id),
        role: CanonicalRole::Assistant,
        parts: SmallVec::new(),
    };
    merge_text_parts(parts, &mut message);
    message
        .parts
        .extend(calls.into_iter().map(CanonicalPart::ToolCall));

    Ok(CanonicalCompletion {
        delta: false,
        model: response.model_version.unwrap_or_default(),
        message,
        usage: response.usage_metadata.map(Into::into).unwrap_or_default(),
    })
}

/// Collapse same-kind text parts; a signature-only reasoning part lends its
/// signature to the reasoning part it belongs to.
fn merge_text_parts(parts: Vec<CanonicalPart>, message: &mut CanonicalMessage) {
    for part in parts {
        let position = part.text_kind().and_then(|kind| {
            message
                .parts
                .iter()
                .position(|existing| existing.text_kind() == Some(kind))
        });
        let Some(position) = position else {
            message.parts.push(part);
            continue;
        };
        match (&mut message.parts[position], part) {
            (
                CanonicalPart::Reasoning { text, signature },
                CanonicalPart::Reasoning {
                    text: more,
                    signature: new_signature,
                },
            ) => {
                text.push_str(&more);
                if new_signature.is_some() {
                    *signature = new_signature;
                }
            }
            (CanonicalPart::Text { text, .. }, CanonicalPart::Text { text: more, .. }) => {
                text.push_str(&more);
            }
            (CanonicalPart::Refusal { text }, CanonicalPart::Refusal { text: more }) => {
                text.push_str(&more);
            }
            _ => {}
        }
    }
}

/// Stream adapter for Gemini `streamGenerateContent` JSON arrays.
///
/// Gemini sends each function call whole, without a call index; calls are
/// numbered per candidate here so the accumulator keeps them apart.
#[derive(Debug, Default)]
pub struct GeminiStreamAdapter {
    next_call: Vec<u32>,
}

impl GeminiStreamAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn call_index(&mut self, candidate: u32) -> u32 {
        let slot = candidate as usize;
        if self.next_call.len() <= slot {
            self.next_call.resize(slot + 1, 0);
        }
        let index = self.next_call[slot];
        self.next_call[slot] += 1;
        index
    }
}

impl StreamAdapter for GeminiStreamAdapter {
    type Chunk = GeminiResponse;

    fn translate(&mut self, chunk: Self::Chunk) -> Result<ChunkAction, PipelineError> {
        if let Some(error) = &chunk.error {
            return Err(PipelineError::Upstream(error_message(error)));
        }

        let mut candidates = Vec::with_capacity(chunk.candidates.len());
        for candidate in chunk.candidates {
            let mut update = CandidateUpdate::new(candidate.index);
            update.metadata = candidate_metadata(&candidate);
            update.finish_reason = candidate.finish_reason;
            update.token_count = candidate.token_count;
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = decode_part(part, &mut update.parts) {
                    let index = self.call_index(candidate.index);
                    update.tool_call_fragments.push(ToolCallFragment {
                        index,
                        id: Some(call.id),
                        name: Some(call.name),
                        arguments: call.arguments,
                    });
                }
            }
            candidates.push(update);
        }

        Ok(ChunkAction::Update(ChunkUpdate {
            response_id: chunk.response_id.filter(|id| !id.is_empty()),
            model: chunk.model_version.filter(|model| !model.is_empty()),
            usage: chunk.usage_metadata.map(Into::into),
            created: None,
            metadata: chunk.prompt_feedback,
            candidates,
        }))
    }
}
