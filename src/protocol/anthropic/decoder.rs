use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRequest, CanonicalRole, CanonicalTool,
    CanonicalToolCall, ChatOptions,
};
use crate::protocol::media::{decode_base64, encode_base64, parse_data_url};

use super::{
    AnthropicBlock, AnthropicContent, AnthropicRequest, AnthropicSource, AnthropicSystem,
    AnthropicToolResultContent,
};

/// Decode an Anthropic Messages request into the canonical form.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the model or the message
/// list is missing.
pub fn decode_anthropic_request(
    request: AnthropicRequest,
) -> Result<CanonicalRequest, GatewayError> {
    if request.model.is_empty() {
        return Err(GatewayError::InvalidRequest("model is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let instructions = request.system.map(system_text).filter(|s| !s.is_empty());
    let messages = request
        .messages
        .into_iter()
        .map(|message| {
            let role = match message.role.as_str() {
                "assistant" => CanonicalRole::Assistant,
                _ => CanonicalRole::User,
            };
            let mut canonical = CanonicalMessage::new(role);
            match message.content {
                AnthropicContent::Text(text) => canonical.parts.push(CanonicalPart::text(text)),
                AnthropicContent::Blocks(blocks) => {
                    canonical
                        .parts
                        .extend(blocks.into_iter().filter_map(decode_block));
                }
            }
            canonical
        })
        .collect();

    let tools = request
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| CanonicalTool {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        })
        .collect();

    Ok(CanonicalRequest {
        model: request.model.clone(),
        stream: request.stream.unwrap_or(false),
        messages,
        options: ChatOptions {
            model: request.model,
            instructions,
            tools,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
            stop_sequences: request.stop_sequences.unwrap_or_default(),
            audio_voice: None,
        },
    })
}

fn system_text(system: AnthropicSystem) -> String {
    match system {
        AnthropicSystem::Text(text) => text,
        AnthropicSystem::Blocks(blocks) => blocks_text(&blocks, "\n"),
    }
}

fn blocks_text(blocks: &[AnthropicBlock], separator: &str) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            AnthropicBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn decode_block(block: AnthropicBlock) -> Option<CanonicalPart> {
    match block {
        AnthropicBlock::Text { text } => Some(CanonicalPart::text(text)),
        AnthropicBlock::Thinking {
            thinking,
            signature,
        } => Some(CanonicalPart::Reasoning {
            text: thinking,
            signature,
        }),
        AnthropicBlock::Image { source } => Some(match source {
            AnthropicSource::Base64 { media_type, data } => CanonicalPart::ImageUrl {
                url: format!("data:{media_type};base64,{data}"),
                detail: None,
                format: Some(media_type),
            },
            AnthropicSource::Url { url } => CanonicalPart::ImageUrl {
                url,
                detail: None,
                format: None,
            },
        }),
        AnthropicBlock::Document {
            source: AnthropicSource::Base64 { media_type, data },
        } => Some(CanonicalPart::File {
            mime_type: media_type,
            name: String::new(),
            data: decode_base64(&data)?,
        }),
        AnthropicBlock::ToolUse { id, name, input } => {
            Some(CanonicalPart::ToolCall(CanonicalToolCall {
                id,
                name,
                arguments: input.to_string(),
            }))
        }
        AnthropicBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => Some(CanonicalPart::ToolResult {
            id: tool_use_id,
            name: String::new(),
            result: match content {
                Some(AnthropicToolResultContent::Text(text)) => text,
                Some(AnthropicToolResultContent::Blocks(blocks)) => blocks_text(&blocks, ""),
                None => String::new(),
            },
        }),
        other => {
            tracing::debug!(block = ?other, "dropping unsupported Anthropic content block");
            None
        }
    }
}

/// Image source for a canonical image URL.
pub(crate) fn image_source(url: &str) -> AnthropicSource {
    match parse_data_url(url) {
        Some(data_url) => AnthropicSource::Base64 {
            media_type: data_url.mime_type.to_string(),
            data: data_url.payload.to_string(),
        },
        None => AnthropicSource::Url {
            url: url.to_string(),
        },
    }
}

/// Document source for inline file bytes.
pub(crate) fn document_source(mime_type: &str, data: &[u8]) -> AnthropicSource {
    AnthropicSource::Base64 {
        media_type: mime_type.to_string(),
        data: encode_base64(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(body: serde_json::Value) -> CanonicalRequest {
        decode_anthropic_request(serde_json::from_value(body).unwrap()).unwrap()
    }

    #[test]
    fn test_system_blocks_become_instructions() {
        let req = decode(json!({
            "model": "claude",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "one"}, {"type": "text", "text": "two"}],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert_eq!(req.options.instructions.as_deref(), Some("one\ntwo"));
        assert_eq!(req.options.max_tokens, Some(1024));
        assert_eq!(req.messages[0].text(), "hi");
    }

    #[test]
    fn test_blocks_map_to_parts() {
        let req = decode(json!({
            "model": "claude",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                    {"type": "text", "text": "describe"}
                ]},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                    {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {"a": 1}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "done"}]},
                    {"type": "server_tool_use", "id": "x"}
                ]}
            ]
        }));
        assert!(matches!(
            &req.messages[0].parts[0],
            CanonicalPart::ImageUrl { url, .. } if url == "data:image/png;base64,AAAA"
        ));
        assert_eq!(
            req.messages[1].parts[0],
            CanonicalPart::Reasoning {
                text: "hmm".into(),
                signature: Some("sig".into())
            }
        );
        assert_eq!(req.messages[1].tool_calls()[0].arguments, "{\"a\":1}");
        assert_eq!(req.messages[2].parts.len(), 1);
        assert!(matches!(
            &req.messages[2].parts[0],
            CanonicalPart::ToolResult { result, .. } if result == "done"
        ));
    }

    #[test]
    fn test_empty_messages_rejected() {
        let request: AnthropicRequest =
            serde_json::from_value(json!({"model": "claude", "max_tokens": 1, "messages": []}))
                .unwrap();
        assert!(decode_anthropic_request(request).is_err());
    }
}
