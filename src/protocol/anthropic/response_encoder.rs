use crate::protocol::canonical::{CanonicalCompletion, CanonicalPart, CanonicalUsage};

use super::encoder::parse_arguments;
use super::{AnthropicBlock, AnthropicResponse, AnthropicUsage};

impl From<CanonicalUsage> for AnthropicUsage {
    fn from(usage: CanonicalUsage) -> Self {
        AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[must_use]
pub fn stop_reason(completion: &CanonicalCompletion) -> &'static str {
    if completion.has_tool_calls() {
        "tool_use"
    } else {
        "end_turn"
    }
}

/// Message id in Anthropic's `msg_` form.
#[must_use]
pub fn new_anthropic_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// Encode a final completion as an Anthropic `message` object.
#[must_use]
pub fn encode_anthropic_response(completion: &CanonicalCompletion, model: &str) -> AnthropicResponse {
    let mut content = Vec::with_capacity(completion.message.parts.len());
    for part in &completion.message.parts {
        match part {
            CanonicalPart::Reasoning { text, signature } if !text.is_empty() => {
                content.push(AnthropicBlock::Thinking {
                    thinking: text.clone(),
                    signature: Some(signature.clone().unwrap_or_default()),
                });
            }
            CanonicalPart::Text { text, .. } | CanonicalPart::Refusal { text }
                if !text.is_empty() =>
            {
                content.push(AnthropicBlock::Text { text: text.clone() });
            }
            CanonicalPart::ToolCall(call) => content.push(AnthropicBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: parse_arguments(&call.arguments),
            }),
            _ => {}
        }
    }

    AnthropicResponse {
        id: new_anthropic_message_id(),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason(completion).to_string()),
        stop_sequence: None,
        usage: completion.usage.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, CanonicalToolCall};

    #[test]
    fn test_blocks_in_part_order() {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.parts.push(CanonicalPart::reasoning("why"));
        message.parts.push(CanonicalPart::text("what"));
        message.parts.push(CanonicalPart::ToolCall(CanonicalToolCall {
            id: "toolu_1".into(),
            name: "f".into(),
            arguments: "{\"a\":2}".into(),
        }));
        let completion = CanonicalCompletion {
            delta: false,
            model: "upstream".into(),
            message,
            usage: CanonicalUsage::new(4, 6),
        };

        let json = serde_json::to_value(encode_anthropic_response(&completion, "claude")).unwrap();
        assert!(json["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(json["type"], "message");
        assert_eq!(json["model"], "claude");
        assert_eq!(json["content"][0]["type"], "thinking");
        assert_eq!(json["content"][1]["text"], "what");
        assert_eq!(json["content"][2]["input"]["a"], 2);
        assert_eq!(json["stop_reason"], "tool_use");
        assert_eq!(json["usage"]["input_tokens"], 4);
        assert_eq!(json["usage"]["output_tokens"], 6);
    }

    #[test]
    fn test_plain_answer_ends_turn() {
        let completion = CanonicalCompletion {
            delta: false,
            model: "m".into(),
            message: CanonicalMessage::with_text(CanonicalRole::Assistant, "ok"),
            usage: CanonicalUsage::default(),
        };
        assert_eq!(stop_reason(&completion), "end_turn");
    }
}
