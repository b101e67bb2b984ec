//! Internal RPC schema spoken between gateway instances.
//!
//! Requests are `{"chatParams": {...}}`; answers are
//! `{"chatCompletion": {...}}`, streamed as SSE `data:` frames where every
//! frame but the last carries `delta: true`.

pub mod response_decoder;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalCompletion, CanonicalMessage, CanonicalPart, CanonicalRequest, CanonicalRole,
    CanonicalTool, CanonicalToolCall, CanonicalUsage, ChatOptions,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub chat_params: Option<ChatParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParams {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatTool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub contents: Vec<ChatContent>,
}

/// One content item; exactly one field is set on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatContent {
    Text(ContentText),
    Reasoning(ContentReasoning),
    Refusal(ContentText),
    ImageUrl(ContentImageUrl),
    File(ContentFile),
    Audio(ContentAudio),
    ToolCall(ContentToolCall),
    ToolResult(ContentToolResult),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentReasoning {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thought_signature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFile {
    pub mime_type: String,
    #[serde(default)]
    pub name: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentAudio {
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transcript: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentToolResult {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub result: String,
}

/// Tool definition; `params` is the JSON schema serialized as a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatTool {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_completion: Option<ChatCompletion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ChatError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCompletion {
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<ChatUsage> for CanonicalUsage {
    fn from(usage: ChatUsage) -> Self {
        CanonicalUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<CanonicalUsage> for ChatUsage {
    fn from(usage: CanonicalUsage) -> Self {
        ChatUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

fn role_from_wire(role: &str) -> Result<CanonicalRole, GatewayError> {
    match role {
        "system" => Ok(CanonicalRole::System),
        "user" => Ok(CanonicalRole::User),
        "assistant" => Ok(CanonicalRole::Assistant),
        "tool" => Ok(CanonicalRole::Tool),
        other => Err(GatewayError::InvalidRequest(format!("unknown role {other:?}"))),
    }
}

fn role_to_wire(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System => "system",
        CanonicalRole::User => "user",
        CanonicalRole::Assistant => "assistant",
        CanonicalRole::Tool => "tool",
    }
}

/// Wire message to canonical.
///
/// # Errors
///
/// Unknown roles and undecodable file payloads are invalid requests.
pub fn to_canonical_message(message: ChatMessage) -> Result<CanonicalMessage, GatewayError> {
    let mut canonical = CanonicalMessage::new(role_from_wire(&message.role)?);
    if !message.id.is_empty() {
        canonical.id = message.id;
    }
    for content in message.contents {
        let part = match content {
            ChatContent::Text(text) => CanonicalPart::text(text.text),
            ChatContent::Reasoning(reasoning) => CanonicalPart::Reasoning {
                text: reasoning.text,
                signature: Some(reasoning.thought_signature).filter(|s| !s.is_empty()),
            },
            ChatContent::Refusal(refusal) => CanonicalPart::Refusal { text: refusal.text },
            ChatContent::ImageUrl(image) => CanonicalPart::ImageUrl {
                url: image.url,
                detail: Some(image.detail).filter(|d| !d.is_empty()),
                format: None,
            },
            ChatContent::File(file) => CanonicalPart::File {
                data: crate::protocol::media::decode_base64(&file.data).ok_or_else(|| {
                    GatewayError::InvalidRequest(format!("file {:?} is not base64", file.name))
                })?,
                mime_type: file.mime_type,
                name: file.name,
            },
            ChatContent::Audio(audio) => CanonicalPart::Audio {
                id: None,
                data: audio.data,
                format: audio.format,
                transcript: Some(audio.transcript).filter(|t| !t.is_empty()),
                delta: audio.delta,
            },
            ChatContent::ToolCall(call) => CanonicalPart::ToolCall(CanonicalToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            }),
            ChatContent::ToolResult(result) => CanonicalPart::ToolResult {
                id: result.id,
                name: result.name,
                result: result.result,
            },
        };
        canonical.parts.push(part);
    }
    Ok(canonical)
}

/// Canonical message to wire.
#[must_use]
pub fn from_canonical_message(message: &CanonicalMessage) -> ChatMessage {
    let contents = message
        .parts
        .iter()
        .map(|part| match part {
            CanonicalPart::Text { text, .. } => ChatContent::Text(ContentText { text: text.clone() }),
            CanonicalPart::Reasoning { text, signature } => {
                ChatContent::Reasoning(ContentReasoning {
                    text: text.clone(),
                    thought_signature: signature.clone().unwrap_or_default(),
                })
            }
            CanonicalPart::Refusal { text } => {
                ChatContent::Refusal(ContentText { text: text.clone() })
            }
            CanonicalPart::ImageUrl { url, detail, .. } => ChatContent::ImageUrl(ContentImageUrl {
                url: url.clone(),
                detail: detail.clone().unwrap_or_default(),
            }),
            CanonicalPart::File {
                mime_type,
                name,
                data,
            } => ChatContent::File(ContentFile {
                mime_type: mime_type.clone(),
                name: name.clone(),
                data: crate::protocol::media::encode_base64(data),
            }),
            CanonicalPart::Audio {
                data,
                format,
                transcript,
                delta,
                ..
            } => ChatContent::Audio(ContentAudio {
                delta: *delta,
                data: data.clone(),
                format: format.clone(),
                transcript: transcript.clone().unwrap_or_default(),
            }),
            CanonicalPart::ToolCall(call) => ChatContent::ToolCall(ContentToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            }),
            CanonicalPart::ToolResult { id, name, result } => {
                ChatContent::ToolResult(ContentToolResult {
                    id: id.clone(),
                    name: name.clone(),
                    result: result.clone(),
                })
            }
        })
        .collect();

    ChatMessage {
        id: message.id.clone(),
        role: role_to_wire(message.role).to_string(),
        contents,
    }
}

/// Decode `chatParams` into a canonical request.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the params are missing, a
/// role is unknown, or a tool schema is not valid JSON.
pub fn decode_chat_request(request: ChatRequest) -> Result<CanonicalRequest, GatewayError> {
    let Some(params) = request.chat_params else {
        return Err(GatewayError::InvalidRequest(
            "chatParams is required".to_string(),
        ));
    };
    if params.model.is_empty() {
        return Err(GatewayError::InvalidRequest("model is required".to_string()));
    }

    let messages = params
        .messages
        .into_iter()
        .map(to_canonical_message)
        .collect::<Result<Vec<_>, _>>()?;

    let tools = params
        .tools
        .into_iter()
        .map(|tool| {
            let parameters = if tool.params.trim().is_empty() {
                serde_json::json!({"type": "object", "properties": {}})
            } else {
                serde_json::from_str(&tool.params).map_err(|err| {
                    GatewayError::InvalidRequest(format!(
                        "tool {} params are not JSON: {err}",
                        tool.name
                    ))
                })?
            };
            Ok(CanonicalTool {
                name: tool.name,
                description: Some(tool.desc).filter(|d| !d.is_empty()),
                parameters,
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    Ok(CanonicalRequest {
        model: params.model.clone(),
        stream: false,
        messages,
        options: ChatOptions {
            model: params.model,
            instructions: Some(params.instructions).filter(|i| !i.is_empty()),
            tools,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: None,
            max_tokens: params.max_tokens,
            stop_sequences: Vec::new(),
            audio_voice: Some(params.voice).filter(|v| !v.is_empty()),
        },
    })
}

/// Encode a canonical conversation as `chatParams` for another gateway.
#[must_use]
pub fn encode_chat_request(messages: &[CanonicalMessage], options: &ChatOptions) -> ChatRequest {
    ChatRequest {
        chat_params: Some(ChatParams {
            model: options.model.clone(),
            instructions: options.instructions.clone().unwrap_or_default(),
            messages: messages.iter().map(from_canonical_message).collect(),
            tools: options
                .tools
                .iter()
                .map(|tool| ChatTool {
                    name: tool.name.clone(),
                    desc: tool.description.clone().unwrap_or_default(),
                    params: tool.parameters.to_string(),
                })
                .collect(),
            voice: options.audio_voice.clone().unwrap_or_default(),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
        }),
    }
}

/// Wire completion to canonical.
///
/// # Errors
///
/// Returns [`GatewayError::Translation`] when the completion has no message
/// or carries an unknown role.
pub fn to_canonical_completion(
    completion: ChatCompletion,
) -> Result<CanonicalCompletion, GatewayError> {
    let Some(message) = completion.message else {
        return Err(GatewayError::Translation(
            "completion has no message".to_string(),
        ));
    };
    let message = to_canonical_message(message)
        .map_err(|err| GatewayError::Translation(err.to_string()))?;
    Ok(CanonicalCompletion {
        delta: completion.delta,
        model: completion.model,
        message,
        usage: completion.usage.map(Into::into).unwrap_or_default(),
    })
}

/// Canonical completion to wire.
#[must_use]
pub fn from_canonical_completion(completion: &CanonicalCompletion) -> ChatCompletion {
    ChatCompletion {
        delta: completion.delta,
        model: completion.model.clone(),
        message: Some(from_canonical_message(&completion.message)),
        usage: Some(completion.usage.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_is_externally_tagged() {
        let message = ChatMessage {
            id: "m1".into(),
            role: "assistant".into(),
            contents: vec![
                ChatContent::Reasoning(ContentReasoning {
                    text: "r".into(),
                    thought_signature: "sig".into(),
                }),
                ChatContent::ToolCall(ContentToolCall {
                    id: "c".into(),
                    name: "f".into(),
                    arguments: "{}".into(),
                }),
            ],
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["contents"][0]["reasoning"]["thoughtSignature"], "sig");
        assert_eq!(json["contents"][1]["toolCall"]["name"], "f");
    }

    #[test]
    fn test_decode_request() {
        let request: ChatRequest = serde_json::from_value(json!({
            "chatParams": {
                "model": "gpt",
                "instructions": "be terse",
                "voice": "women",
                "messages": [
                    {"role": "user", "contents": [{"text": {"text": "hi"}}]}
                ],
                "tools": [{"name": "f", "desc": "d", "params": "{\"type\":\"object\"}"}]
            }
        }))
        .unwrap();
        let decoded = decode_chat_request(request).unwrap();
        assert_eq!(decoded.model, "gpt");
        assert_eq!(decoded.options.instructions.as_deref(), Some("be terse"));
        assert_eq!(decoded.options.audio_voice.as_deref(), Some("women"));
        assert_eq!(decoded.options.tools[0].parameters["type"], "object");
        assert_eq!(decoded.messages[0].text(), "hi");
    }

    #[test]
    fn test_unknown_role_and_missing_params_rejected() {
        assert!(decode_chat_request(ChatRequest::default()).is_err());
        let request: ChatRequest = serde_json::from_value(json!({
            "chatParams": {"model": "m", "messages": [{"role": "narrator", "contents": []}]}
        }))
        .unwrap();
        assert!(matches!(
            decode_chat_request(request),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_completion_conversion_keeps_parts() {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.parts.push(CanonicalPart::File {
            mime_type: "text/plain".into(),
            name: "a.txt".into(),
            data: b"abc".to_vec(),
        });
        message.parts.push(CanonicalPart::text("done"));
        let completion = CanonicalCompletion {
            delta: false,
            model: "m".into(),
            message,
            usage: CanonicalUsage::new(1, 2),
        };
        let back = to_canonical_completion(from_canonical_completion(&completion)).unwrap();
        assert_eq!(back, completion);
    }
}
