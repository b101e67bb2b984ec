use crate::protocol::canonical::{CanonicalCompletion, CanonicalPart, CanonicalUsage};
use crate::stream::sse::named_frame;

use super::encoder::parse_arguments;
use super::response_encoder::{new_anthropic_message_id, stop_reason};
use super::{
    AnthropicBlock, AnthropicDelta, AnthropicErrorBody, AnthropicMessageDeltaBody,
    AnthropicResponse, AnthropicStreamEvent, AnthropicUsage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Thinking,
    Text,
}

/// Encodes canonical deltas as Anthropic named stream events.
///
/// Content blocks are opened and closed as the delta kind changes between
/// reasoning and text. Tool calls are emitted as complete `tool_use` blocks
/// when the stream finishes.
#[derive(Debug)]
pub struct AnthropicStreamEncoder {
    id: String,
    model: String,
    started: bool,
    open: Option<BlockKind>,
    next_index: u32,
}

impl AnthropicStreamEncoder {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            id: new_anthropic_message_id(),
            model: model.to_string(),
            started: false,
            open: None,
            next_index: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Frames for one delta; empty when it carries nothing to forward.
    pub fn encode_delta(&mut self, completion: &CanonicalCompletion) -> String {
        let mut out = String::new();
        for part in &completion.message.parts {
            match part {
                CanonicalPart::Reasoning { text, signature } => {
                    if !text.is_empty() {
                        self.ensure_block(BlockKind::Thinking, completion.usage, &mut out);
                        self.push_delta(
                            AnthropicDelta::ThinkingDelta {
                                thinking: text.clone(),
                            },
                            &mut out,
                        );
                    }
                    if let Some(signature) = signature.as_ref().filter(|s| !s.is_empty()) {
                        self.ensure_block(BlockKind::Thinking, completion.usage, &mut out);
                        self.push_delta(
                            AnthropicDelta::SignatureDelta {
                                signature: signature.clone(),
                            },
                            &mut out,
                        );
                    }
                }
                CanonicalPart::Text { text, .. } | CanonicalPart::Refusal { text }
                    if !text.is_empty() =>
                {
                    self.ensure_block(BlockKind::Text, completion.usage, &mut out);
                    self.push_delta(AnthropicDelta::TextDelta { text: text.clone() }, &mut out);
                }
                _ => {}
            }
        }
        out
    }

    /// Closing events: the open block's stop, one `tool_use` block per call,
    /// `message_delta` with the stop reason and usage, then `message_stop`.
    pub fn encode_finish(&mut self, completion: &CanonicalCompletion) -> String {
        let mut out = String::new();
        self.start(completion.usage, &mut out);
        self.close_block(&mut out);

        for call in completion.message.tool_calls() {
            let index = self.next_index;
            self.next_index += 1;
            push_event(
                &AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                },
                &mut out,
            );
            let input = parse_arguments(&call.arguments);
            push_event(
                &AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                },
                &mut out,
            );
            push_event(&AnthropicStreamEvent::ContentBlockStop { index }, &mut out);
        }

        push_event(
            &AnthropicStreamEvent::MessageDelta {
                delta: AnthropicMessageDeltaBody {
                    stop_reason: Some(stop_reason(completion).to_string()),
                    stop_sequence: None,
                },
                usage: Some(completion.usage.into()),
            },
            &mut out,
        );
        push_event(&AnthropicStreamEvent::MessageStop, &mut out);
        out
    }

    fn start(&mut self, usage: CanonicalUsage, out: &mut String) {
        if self.started {
            return;
        }
        self.started = true;
        let message = AnthropicResponse {
            id: self.id.clone(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: self.model.clone(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: 0,
            },
        };
        push_event(&AnthropicStreamEvent::MessageStart { message }, out);
    }

    fn ensure_block(&mut self, kind: BlockKind, usage: CanonicalUsage, out: &mut String) {
        self.start(usage, out);
        if self.open == Some(kind) {
            return;
        }
        self.close_block(out);
        let content_block = match kind {
            BlockKind::Thinking => AnthropicBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            BlockKind::Text => AnthropicBlock::Text {
                text: String::new(),
            },
        };
        push_event(
            &AnthropicStreamEvent::ContentBlockStart {
                index: self.next_index,
                content_block,
            },
            out,
        );
        self.open = Some(kind);
    }

    fn close_block(&mut self, out: &mut String) {
        if self.open.take().is_some() {
            push_event(
                &AnthropicStreamEvent::ContentBlockStop {
                    index: self.next_index,
                },
                out,
            );
            self.next_index += 1;
        }
    }

    fn push_delta(&self, delta: AnthropicDelta, out: &mut String) {
        push_event(
            &AnthropicStreamEvent::ContentBlockDelta {
                index: self.next_index,
                delta,
            },
            out,
        );
    }
}

fn push_event(event: &AnthropicStreamEvent, out: &mut String) {
    // Serializing plain owned structs cannot fail.
    let json = serde_json::to_string(event).unwrap_or_default();
    out.push_str(&named_frame(event.event_name(), &json));
}

/// A mid-stream `error` event.
#[must_use]
pub fn error_frame(type_: &str, message: &str) -> String {
    let mut out = String::new();
    push_event(
        &AnthropicStreamEvent::Error {
            error: AnthropicErrorBody {
                type_: type_.to_string(),
                message: message.to_string(),
            },
        },
        &mut out,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, CanonicalToolCall};

    fn delta(parts: Vec<CanonicalPart>) -> CanonicalCompletion {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.parts.extend(parts);
        CanonicalCompletion {
            delta: true,
            model: "m".into(),
            message,
            usage: CanonicalUsage::new(3, 0),
        }
    }

    fn events(out: &str) -> Vec<(String, serde_json::Value)> {
        out.split("\n\n")
            .filter(|frame| !frame.is_empty())
            .map(|frame| {
                let mut lines = frame.lines();
                let name = lines.next().unwrap().strip_prefix("event: ").unwrap();
                let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
                (name.to_string(), serde_json::from_str(data).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_blocks_switch_with_delta_kind() {
        let mut encoder = AnthropicStreamEncoder::new("claude");
        let mut out = encoder.encode_delta(&delta(vec![CanonicalPart::reasoning("r")]));
        out.push_str(&encoder.encode_delta(&delta(vec![CanonicalPart::text("a")])));
        out.push_str(&encoder.encode_delta(&delta(vec![CanonicalPart::text("b")])));

        let names: Vec<String> = events(&out).into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
            ]
        );
        let parsed = events(&out);
        assert_eq!(parsed[0].1["message"]["usage"]["input_tokens"], 3);
        assert_eq!(parsed[1].1["content_block"]["type"], "thinking");
        assert_eq!(parsed[4].1["index"], 1);
        assert_eq!(parsed[6].1["delta"]["text"], "b");
    }

    #[test]
    fn test_finish_emits_tool_use_and_stop() {
        let mut encoder = AnthropicStreamEncoder::new("claude");
        let _ = encoder.encode_delta(&delta(vec![CanonicalPart::text("calling")]));
        let mut last = delta(vec![CanonicalPart::ToolCall(CanonicalToolCall {
            id: "toolu_1".into(),
            name: "f".into(),
            arguments: "{\"q\":1}".into(),
        })]);
        last.usage = CanonicalUsage::new(3, 8);

        let parsed = events(&encoder.encode_finish(&last));
        let names: Vec<&str> = parsed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            [
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(parsed[1].1["index"], 1);
        assert_eq!(parsed[2].1["delta"]["partial_json"], "{\"q\":1}");
        assert_eq!(parsed[4].1["delta"]["stop_reason"], "tool_use");
        assert_eq!(parsed[4].1["usage"]["output_tokens"], 8);
    }

    #[test]
    fn test_finish_without_deltas_still_starts_message() {
        let mut encoder = AnthropicStreamEncoder::new("claude");
        let parsed = events(&encoder.encode_finish(&delta(vec![])));
        assert_eq!(parsed[0].0, "message_start");
        assert_eq!(parsed.last().unwrap().0, "message_stop");
    }

    #[test]
    fn test_error_frame_shape() {
        let parsed = events(&error_frame("api_error", "boom"));
        assert_eq!(parsed[0].0, "error");
        assert_eq!(parsed[0].1["error"]["message"], "boom");
    }
}
