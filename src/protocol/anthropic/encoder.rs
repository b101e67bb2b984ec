use crate::protocol::canonical::{CanonicalMessage, CanonicalPart, CanonicalRole, ChatOptions};

use super::decoder::{document_source, image_source};
use super::{
    AnthropicBlock, AnthropicContent, AnthropicMessage, AnthropicRequest, AnthropicSystem,
    AnthropicTool, AnthropicToolResultContent,
};

/// `max_tokens` is mandatory for Anthropic; used when neither the client nor
/// the model config set one.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Encode a canonical conversation into an Anthropic Messages request.
///
/// System turns are hoisted into `system`; consecutive turns with the same
/// role are merged because the API requires alternating roles.
#[must_use]
pub fn encode_anthropic_request(
    messages: &[CanonicalMessage],
    options: &ChatOptions,
    stream: bool,
) -> AnthropicRequest {
    let mut system: Vec<String> = options.instructions.iter().cloned().collect();
    let mut wire: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role == CanonicalRole::System {
            let text = message.text();
            if !text.is_empty() {
                system.push(text);
            }
            continue;
        }

        let role = match message.role {
            CanonicalRole::Assistant => "assistant",
            _ => "user",
        };
        let blocks: Vec<AnthropicBlock> = message.parts.iter().filter_map(encode_part).collect();
        if blocks.is_empty() {
            continue;
        }

        match wire.last_mut() {
            Some(AnthropicMessage {
                role: last_role,
                content: AnthropicContent::Blocks(existing),
            }) if last_role == role => existing.extend(blocks),
            _ => wire.push(AnthropicMessage {
                role: role.to_string(),
                content: AnthropicContent::Blocks(blocks),
            }),
        }
    }

    let tools = (!options.tools.is_empty()).then(|| {
        options
            .tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    });

    AnthropicRequest {
        model: options.model.clone(),
        max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.is_empty()).then(|| AnthropicSystem::Text(system.join("\n\n"))),
        messages: wire,
        tools,
        stream: stream.then_some(true),
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: options.top_k,
        stop_sequences: (!options.stop_sequences.is_empty())
            .then(|| options.stop_sequences.clone()),
    }
}

fn encode_part(part: &CanonicalPart) -> Option<AnthropicBlock> {
    match part {
        CanonicalPart::Text { text, .. } | CanonicalPart::Refusal { text } => {
            (!text.is_empty()).then(|| AnthropicBlock::Text { text: text.clone() })
        }
        // Thinking blocks are only accepted back with their signature.
        CanonicalPart::Reasoning {
            text,
            signature: Some(signature),
        } => Some(AnthropicBlock::Thinking {
            thinking: text.clone(),
            signature: Some(signature.clone()),
        }),
        CanonicalPart::ImageUrl { url, .. } => Some(AnthropicBlock::Image {
            source: image_source(url),
        }),
        CanonicalPart::File {
            mime_type, data, ..
        } if mime_type == "application/pdf" => Some(AnthropicBlock::Document {
            source: document_source(mime_type, data),
        }),
        CanonicalPart::ToolCall(call) => Some(AnthropicBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: parse_arguments(&call.arguments),
        }),
        CanonicalPart::ToolResult { id, result, .. } => Some(AnthropicBlock::ToolResult {
            tool_use_id: id.clone(),
            content: Some(AnthropicToolResultContent::Text(result.clone())),
            is_error: None,
        }),
        other => {
            tracing::debug!(part = ?other, "dropping content Anthropic cannot represent");
            None
        }
    }
}

/// Tool arguments as a JSON object; empty or invalid input becomes `{}`.
pub(crate) fn parse_arguments(arguments: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(serde_json::Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::CanonicalToolCall;
    use serde_json::json;

    #[test]
    fn test_system_hoisted_and_roles_merged() {
        let mut tool_turn = CanonicalMessage::new(CanonicalRole::Tool);
        tool_turn.parts.push(CanonicalPart::ToolResult {
            id: "toolu_1".into(),
            name: "f".into(),
            result: "42".into(),
        });
        let mut assistant = CanonicalMessage::new(CanonicalRole::Assistant);
        assistant
            .parts
            .push(CanonicalPart::ToolCall(CanonicalToolCall {
                id: "toolu_1".into(),
                name: "f".into(),
                arguments: String::new(),
            }));
        let messages = vec![
            CanonicalMessage::with_text(CanonicalRole::System, "rules"),
            CanonicalMessage::with_text(CanonicalRole::User, "q"),
            assistant,
            tool_turn,
            CanonicalMessage::with_text(CanonicalRole::User, "and?"),
        ];
        let options = ChatOptions {
            model: "claude-x".into(),
            instructions: Some("base".into()),
            ..ChatOptions::default()
        };

        let wire = encode_anthropic_request(&messages, &options, true);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["system"], "base\n\nrules");
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(json["stream"], true);
        let turns = json["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["content"][0]["input"], json!({}));
        assert_eq!(turns[2]["role"], "user");
        assert_eq!(turns[2]["content"][0]["type"], "tool_result");
        assert_eq!(turns[2]["content"][1]["text"], "and?");
    }

    #[test]
    fn test_unsigned_reasoning_and_audio_are_dropped() {
        let mut assistant = CanonicalMessage::new(CanonicalRole::Assistant);
        assistant.parts.push(CanonicalPart::reasoning("inline"));
        assistant.parts.push(CanonicalPart::Audio {
            id: None,
            data: "AAAA".into(),
            format: "wav".into(),
            transcript: None,
            delta: false,
        });
        assistant.parts.push(CanonicalPart::text("visible"));
        let wire = encode_anthropic_request(&[assistant], &ChatOptions::default(), false);
        let json = serde_json::to_value(&wire).unwrap();
        let blocks = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["text"], "visible");
    }

    #[test]
    fn test_remote_image_uses_url_source() {
        let mut user = CanonicalMessage::new(CanonicalRole::User);
        user.parts.push(CanonicalPart::ImageUrl {
            url: "https://x/a.png".into(),
            detail: None,
            format: None,
        });
        let wire = encode_anthropic_request(&[user], &ChatOptions::default(), false);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["source"]["type"], "url");
    }
}
