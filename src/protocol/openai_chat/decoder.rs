use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRequest, CanonicalRole, CanonicalTool,
    CanonicalToolCall, ChatOptions,
};
use crate::protocol::media::parse_data_url;

use super::{role_from_openai, OpenAiChatRequest, OpenAiContent, OpenAiContentPart, OpenAiMessage, OpenAiStop, OpenAiTool};

/// Decode an `OpenAI` Chat Completions request into the canonical form.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the model or the message
/// list is missing.
pub fn decode_openai_chat_request(
    request: OpenAiChatRequest,
) -> Result<CanonicalRequest, GatewayError> {
    if request.model.is_empty() {
        return Err(GatewayError::InvalidRequest("model is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let messages = request.messages.into_iter().map(decode_message).collect();
    let options = ChatOptions {
        model: request.model.clone(),
        instructions: None,
        tools: decode_tools(request.tools.unwrap_or_default()),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        max_tokens: request.max_tokens.or(request.max_completion_tokens),
        stop_sequences: match request.stop {
            Some(OpenAiStop::Single(stop)) => vec![stop],
            Some(OpenAiStop::Multi(stops)) => stops,
            None => Vec::new(),
        },
        audio_voice: request.audio.map(|audio| audio.voice),
    };

    Ok(CanonicalRequest {
        model: request.model,
        stream: request.stream.unwrap_or(false),
        messages,
        options,
    })
}

fn decode_message(message: OpenAiMessage) -> CanonicalMessage {
    let role = role_from_openai(&message.role);
    let mut canonical = CanonicalMessage::new(role);

    if let Some(reasoning) = message.reasoning_content.filter(|r| !r.is_empty()) {
        canonical.parts.push(CanonicalPart::reasoning(reasoning));
    }

    if role == CanonicalRole::Tool {
        let result = match message.content {
            Some(content) => content_text(&content),
            None => String::new(),
        };
        canonical.parts.push(CanonicalPart::ToolResult {
            id: message.tool_call_id.unwrap_or_default(),
            name: message.name.unwrap_or_default(),
            result,
        });
        return canonical;
    }

    match message.content {
        Some(OpenAiContent::Text(text)) if !text.is_empty() => {
            canonical.parts.push(CanonicalPart::text(text));
        }
        Some(OpenAiContent::Parts(parts)) => {
            canonical.parts.extend(parts.into_iter().filter_map(decode_content_part));
        }
        _ => {}
    }

    if let Some(refusal) = message.refusal {
        canonical.parts.push(CanonicalPart::Refusal { text: refusal });
    }

    for call in message.tool_calls.unwrap_or_default() {
        canonical.parts.push(CanonicalPart::ToolCall(CanonicalToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        }));
    }

    canonical
}

fn decode_content_part(part: OpenAiContentPart) -> Option<CanonicalPart> {
    match part {
        OpenAiContentPart::Text { text } => Some(CanonicalPart::text(text)),
        OpenAiContentPart::ImageUrl { image_url } => Some(CanonicalPart::ImageUrl {
            url: image_url.url,
            detail: image_url.detail,
            format: None,
        }),
        OpenAiContentPart::InputAudio { input_audio } => Some(CanonicalPart::Audio {
            id: None,
            data: input_audio.data,
            format: input_audio.format,
            transcript: None,
            delta: false,
        }),
        OpenAiContentPart::File { file } => {
            let url = file.file_data?;
            let Some(data_url) = parse_data_url(&url) else {
                tracing::debug!("dropping file part without inline data");
                return None;
            };
            Some(CanonicalPart::File {
                mime_type: data_url.mime_type.to_string(),
                name: file.filename.unwrap_or_default(),
                data: data_url.decode()?,
            })
        }
        OpenAiContentPart::Unsupported => {
            tracing::debug!("dropping unsupported content part");
            None
        }
    }
}

/// Plain text of a content field, joining text parts.
pub(crate) fn content_text(content: &OpenAiContent) -> String {
    match content {
        OpenAiContent::Text(text) => text.clone(),
        OpenAiContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                OpenAiContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect(),
    }
}

fn decode_tools(tools: Vec<OpenAiTool>) -> Vec<CanonicalTool> {
    tools
        .into_iter()
        .filter(|tool| tool.type_ == "function")
        .map(|tool| {
            let parameters = match tool.function.parameters {
                Some(Value::String(encoded)) => serde_json::from_str(&encoded).ok(),
                Some(value @ Value::Object(_)) => Some(value),
                _ => None,
            };
            CanonicalTool {
                name: tool.function.name,
                description: tool.function.description,
                parameters: parameters
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(body: Value) -> CanonicalRequest {
        let request: OpenAiChatRequest = serde_json::from_value(body).unwrap();
        decode_openai_chat_request(request).unwrap()
    }

    #[test]
    fn test_decode_basic_request() {
        let req = decode(json!({
            "model": "gpt",
            "stream": true,
            "temperature": 0.3,
            "stop": "END",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        }));
        assert_eq!(req.model, "gpt");
        assert!(req.stream);
        assert_eq!(req.options.temperature, Some(0.3));
        assert_eq!(req.options.stop_sequences, vec!["END"]);
        assert_eq!(req.messages[0].role, CanonicalRole::System);
        assert_eq!(req.messages[1].text(), "hi");
    }

    #[test]
    fn test_decode_parts_and_tool_turns() {
        let req = decode(json!({
            "model": "gpt",
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image_url", "image_url": {"url": "https://x/a.png", "detail": "low"}},
                    {"type": "video", "video": {}}
                ]},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"a\":1}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "42"}
            ]
        }));
        assert_eq!(req.messages[0].parts.len(), 2);
        assert!(matches!(
            &req.messages[0].parts[1],
            CanonicalPart::ImageUrl { detail: Some(d), .. } if d == "low"
        ));
        assert_eq!(req.messages[1].tool_calls()[0].arguments, "{\"a\":1}");
        assert_eq!(
            req.messages[2].parts[0],
            CanonicalPart::ToolResult {
                id: "call_1".into(),
                name: String::new(),
                result: "42".into()
            }
        );
    }

    #[test]
    fn test_tool_parameters_may_be_a_string() {
        let req = decode(json!({
            "model": "gpt",
            "messages": [{"role": "user", "content": "x"}],
            "tools": [{"type": "function", "function": {
                "name": "lookup",
                "parameters": "{\"type\":\"object\",\"properties\":{\"q\":{\"type\":\"string\"}}}"
            }}]
        }));
        assert_eq!(req.options.tools[0].parameters["properties"]["q"]["type"], "string");
    }

    #[test]
    fn test_missing_model_is_rejected() {
        let request: OpenAiChatRequest =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": "x"}]}))
                .unwrap();
        assert!(matches!(
            decode_openai_chat_request(request),
            Err(GatewayError::InvalidRequest(_))
        ));
    }
}
