use rustc_hash::FxHashMap;

use crate::error::GatewayError;
use crate::pipeline::{ChunkAction, PipelineError, StreamAdapter};
use crate::protocol::canonical::{
    new_message_id, CanonicalCompletion, CanonicalMessage, CanonicalPart, CanonicalRole,
    CanonicalToolCall, CanonicalUsage,
};
use crate::stream::accumulator::{CandidateUpdate, ChunkUpdate, ToolCallFragment};
use crate::stream::{SseEnvelope, SsePayload};

use super::{AnthropicBlock, AnthropicDelta, AnthropicResponse, AnthropicStreamEvent, AnthropicUsage};

impl From<AnthropicUsage> for CanonicalUsage {
    fn from(usage: AnthropicUsage) -> Self {
        CanonicalUsage::new(usage.input_tokens, usage.output_tokens)
    }
}

/// Decode a non-streaming Anthropic Messages response.
///
/// # Errors
///
/// Returns [`GatewayError::Translation`] when the response carries no content.
pub fn decode_anthropic_response(
    response: AnthropicResponse,
) -> Result<CanonicalCompletion, GatewayError> {
    if response.content.is_empty() && response.stop_reason.is_none() {
        return Err(GatewayError::Translation(
            "upstream response has no content".to_string(),
        ));
    }

    let mut message = CanonicalMessage {
        id: if response.id.is_empty() {
            new_message_id()
        } else {
            response.id
        },
        role: CanonicalRole::Assistant,
        parts: smallvec::SmallVec::new(),
    };
    for block in response.content {
        match block {
            AnthropicBlock::Text { text } => message.parts.push(CanonicalPart::text(text)),
            AnthropicBlock::Thinking {
                thinking,
                signature,
            } => message.parts.push(CanonicalPart::Reasoning {
                text: thinking,
                signature,
            }),
            AnthropicBlock::ToolUse { id, name, input } => {
                message.parts.push(CanonicalPart::ToolCall(CanonicalToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }));
            }
            other => tracing::debug!(block = ?other, "ignoring Anthropic response block"),
        }
    }

    Ok(CanonicalCompletion {
        delta: false,
        model: response.model,
        message,
        usage: response.usage.into(),
    })
}

/// Stream adapter for Anthropic Messages event streams.
///
/// Anthropic reports input tokens in `message_start` and output tokens in
/// `message_delta`, so both are kept here and re-sent as one usage value.
#[derive(Debug, Default)]
pub struct AnthropicStreamAdapter {
    usage: AnthropicUsage,
    /// Block index -> whether the tool block has received argument bytes.
    tool_blocks: FxHashMap<u32, bool>,
}

impl AnthropicStreamAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn translate_event(&mut self, event: AnthropicStreamEvent) -> Result<ChunkAction, PipelineError> {
        let mut update = ChunkUpdate::default();
        let mut candidate = CandidateUpdate::new(0);

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.usage.input_tokens = message.usage.input_tokens;
                self.usage.output_tokens = message.usage.output_tokens;
                update.response_id = Some(message.id).filter(|id| !id.is_empty());
                update.model = Some(message.model).filter(|model| !model.is_empty());
                update.usage = Some(self.usage.into());
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicBlock::ToolUse { id, name, .. } => {
                    self.tool_blocks.insert(index, false);
                    candidate.tool_call_fragments.push(ToolCallFragment {
                        index,
                        id: Some(id),
                        name: Some(name),
                        arguments: String::new(),
                    });
                }
                AnthropicBlock::Thinking {
                    thinking,
                    signature,
                } => candidate.parts.push(CanonicalPart::Reasoning {
                    text: thinking,
                    signature,
                }),
                AnthropicBlock::Text { text } if !text.is_empty() => {
                    candidate.parts.push(CanonicalPart::text(text));
                }
                _ => return Ok(ChunkAction::Skip),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } => {
                    candidate.parts.push(CanonicalPart::text(text));
                }
                AnthropicDelta::ThinkingDelta { thinking } => {
                    candidate.parts.push(CanonicalPart::reasoning(thinking));
                }
                AnthropicDelta::SignatureDelta { signature } => {
                    candidate.parts.push(CanonicalPart::Reasoning {
                        text: String::new(),
                        signature: Some(signature),
                    });
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if partial_json.is_empty() {
                        return Ok(ChunkAction::Skip);
                    }
                    self.tool_blocks.insert(index, true);
                    candidate.tool_call_fragments.push(ToolCallFragment {
                        index,
                        arguments: partial_json,
                        ..ToolCallFragment::default()
                    });
                }
                AnthropicDelta::Unsupported => return Ok(ChunkAction::Skip),
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                // A tool called without arguments never sends input_json.
                match self.tool_blocks.remove(&index) {
                    Some(false) => candidate.tool_call_fragments.push(ToolCallFragment {
                        index,
                        arguments: "{}".to_string(),
                        ..ToolCallFragment::default()
                    }),
                    _ => return Ok(ChunkAction::Skip),
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                }
                update.usage = Some(self.usage.into());
                candidate.finish_reason = delta.stop_reason;
            }
            AnthropicStreamEvent::MessageStop => return Ok(ChunkAction::Done),
            AnthropicStreamEvent::Ping => return Ok(ChunkAction::Skip),
            AnthropicStreamEvent::Unknown => {
                tracing::debug!("skipping unknown Anthropic stream event");
                return Ok(ChunkAction::Skip);
            }
            AnthropicStreamEvent::Error { error } => {
                return Err(PipelineError::Upstream(format!(
                    "{}: {}",
                    error.type_, error.message
                )));
            }
        }

        update.candidates.push(candidate);
        Ok(ChunkAction::Update(update))
    }
}

impl StreamAdapter for AnthropicStreamAdapter {
    type Chunk = SseEnvelope<AnthropicStreamEvent>;

    fn translate(&mut self, chunk: Self::Chunk) -> Result<ChunkAction, PipelineError> {
        match chunk.data {
            Some(SsePayload::Json(event)) => self.translate_event(event),
            Some(SsePayload::Text(text)) => {
                tracing::debug!(event = ?chunk.event, payload = %text, "skipping non-JSON stream payload");
                Ok(ChunkAction::Skip)
            }
            None => Ok(ChunkAction::Skip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventStreamDecoder;
    use serde_json::json;

    fn envelope(event: &str, data: serde_json::Value) -> SseEnvelope<AnthropicStreamEvent> {
        serde_json::from_value(json!({"event": event, "data": data})).unwrap()
    }

    fn update(action: ChunkAction) -> ChunkUpdate {
        match action {
            ChunkAction::Update(update) => update,
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_blocks() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "thinking", "thinking": "plan", "signature": "sig"},
                {"type": "text", "text": "answer"},
                {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {"x": 1}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 7}
        }))
        .unwrap();
        let completion = decode_anthropic_response(response).unwrap();
        assert_eq!(completion.message.id, "msg_1");
        assert_eq!(completion.message.reasoning_text(), "plan");
        assert_eq!(completion.message.text(), "answer");
        assert_eq!(completion.message.tool_calls()[0].arguments, "{\"x\":1}");
        assert_eq!(completion.usage.total_tokens, 12);
    }

    #[test]
    fn test_usage_is_combined_across_events() {
        let mut adapter = AnthropicStreamAdapter::new();
        let start = update(
            adapter
                .translate(envelope(
                    "message_start",
                    json!({"type": "message_start", "message": {"id": "msg_1", "model": "claude", "content": [], "usage": {"input_tokens": 9, "output_tokens": 1}}}),
                ))
                .unwrap(),
        );
        assert_eq!(start.response_id.as_deref(), Some("msg_1"));
        assert_eq!(start.usage, Some(CanonicalUsage::new(9, 1)));

        let delta = update(
            adapter
                .translate(envelope(
                    "message_delta",
                    json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 20}}),
                ))
                .unwrap(),
        );
        assert_eq!(delta.usage, Some(CanonicalUsage::new(9, 20)));
        assert_eq!(delta.candidates[0].finish_reason.as_deref(), Some("end_turn"));

        let stop = adapter
            .translate(envelope("message_stop", json!({"type": "message_stop"})))
            .unwrap();
        assert_eq!(stop, ChunkAction::Done);
    }

    #[test]
    fn test_tool_without_arguments_gets_empty_object() {
        let mut adapter = AnthropicStreamAdapter::new();
        let start = update(
            adapter
                .translate(envelope(
                    "content_block_start",
                    json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "now", "input": {}}}),
                ))
                .unwrap(),
        );
        assert_eq!(start.candidates[0].tool_call_fragments[0].id.as_deref(), Some("toolu_1"));

        let stop = update(
            adapter
                .translate(envelope(
                    "content_block_stop",
                    json!({"type": "content_block_stop", "index": 1}),
                ))
                .unwrap(),
        );
        assert_eq!(stop.candidates[0].tool_call_fragments[0].arguments, "{}");
    }

    #[test]
    fn test_signature_delta_carries_signature_only() {
        let mut adapter = AnthropicStreamAdapter::new();
        let sig = update(
            adapter
                .translate(envelope(
                    "content_block_delta",
                    json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "abc"}}),
                ))
                .unwrap(),
        );
        assert_eq!(
            sig.candidates[0].parts,
            vec![CanonicalPart::Reasoning {
                text: String::new(),
                signature: Some("abc".into())
            }]
        );
    }

    #[test]
    fn test_ping_skipped_and_error_surfaced() {
        let mut adapter = AnthropicStreamAdapter::new();
        assert_eq!(
            adapter
                .translate(envelope("ping", json!({"type": "ping"})))
                .unwrap(),
            ChunkAction::Skip
        );
        let err = adapter
            .translate(envelope(
                "error",
                json!({"type": "error", "error": {"type": "overloaded_error", "message": "busy"}}),
            ))
            .unwrap_err();
        assert_eq!(err, PipelineError::Upstream("overloaded_error: busy".into()));
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_skipped_mid_stream() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude\",\"content\":[],\"usage\":{\"input_tokens\":1,\"output_tokens\":0}}}\n\n",
            "event: future_event\n",
            "data: {\"type\":\"future_event\",\"payload\":{\"x\":1}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
        );
        let stream = futures_util::stream::iter(vec![Ok::<_, std::convert::Infallible>(
            bytes::Bytes::from_static(body.as_bytes()),
        )]);
        let mut decoder = EventStreamDecoder::<_, SseEnvelope<AnthropicStreamEvent>>::new(stream);
        let mut adapter = AnthropicStreamAdapter::new();

        let start = decoder.next_event().await.unwrap().unwrap();
        assert!(matches!(adapter.translate(start).unwrap(), ChunkAction::Update(_)));

        let unknown = decoder.next_event().await.unwrap().unwrap();
        assert!(matches!(unknown.data, Some(SsePayload::Json(AnthropicStreamEvent::Unknown))));
        assert_eq!(adapter.translate(unknown).unwrap(), ChunkAction::Skip);

        let text = update(adapter.translate(decoder.next_event().await.unwrap().unwrap()).unwrap());
        assert_eq!(text.candidates[0].parts, vec![CanonicalPart::text("hi")]);
        assert!(decoder.next_event().await.unwrap().is_none());
    }
}
