use crate::protocol::canonical::{
    vendor_voice, CanonicalMessage, CanonicalPart, CanonicalRole, ChatOptions,
};
use crate::protocol::media::to_data_url;

use super::{
    function_type, role_to_openai, OpenAiAudioOptions, OpenAiChatRequest, OpenAiContent,
    OpenAiContentPart, OpenAiFile, OpenAiImageUrl, OpenAiInputAudio, OpenAiMessage, OpenAiStop,
    OpenAiStreamOptions, OpenAiTool, OpenAiToolCall, OpenAiToolCallFunction, OpenAiToolFunction,
};

/// Encode a canonical conversation into an `OpenAI` Chat Completions request.
#[must_use]
pub fn encode_openai_chat_request(
    messages: &[CanonicalMessage],
    options: &ChatOptions,
    stream: bool,
) -> OpenAiChatRequest {
    let mut wire: Vec<OpenAiMessage> =
        Vec::with_capacity(messages.len() + usize::from(options.instructions.is_some()));

    if let Some(instructions) = &options.instructions {
        wire.push(OpenAiMessage {
            role: "system".to_string(),
            content: Some(OpenAiContent::Text(instructions.clone())),
            ..OpenAiMessage::default()
        });
    }
    for message in messages {
        encode_message(message, &mut wire);
    }

    let tools = if options.tools.is_empty() {
        None
    } else {
        Some(
            options
                .tools
                .iter()
                .map(|tool| OpenAiTool {
                    type_: function_type(),
                    function: OpenAiToolFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(tool.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    let stop = match options.stop_sequences.as_slice() {
        [] => None,
        [single] => Some(OpenAiStop::Single(single.clone())),
        many => Some(OpenAiStop::Multi(many.to_vec())),
    };

    OpenAiChatRequest {
        model: options.model.clone(),
        messages: wire,
        tools,
        stream: stream.then_some(true),
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: options.temperature,
        top_p: options.top_p,
        max_tokens: options.max_tokens,
        max_completion_tokens: None,
        stop,
        audio: options.audio_voice.as_ref().map(|voice| OpenAiAudioOptions {
            voice: vendor_voice(voice, "alloy", "ash").to_string(),
            format: "wav".to_string(),
        }),
        modalities: options
            .audio_voice
            .as_ref()
            .map(|_| vec!["text".to_string(), "audio".to_string()]),
    }
}

fn encode_message(message: &CanonicalMessage, out: &mut Vec<OpenAiMessage>) {
    let mut text = String::new();
    let mut media: Vec<OpenAiContentPart> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
    let mut refusal: Option<String> = None;
    let mut results: Vec<OpenAiMessage> = Vec::new();

    for part in &message.parts {
        match part {
            CanonicalPart::Text { text: chunk, .. } => text.push_str(chunk),
            CanonicalPart::Refusal { text } => refusal = Some(text.clone()),
            CanonicalPart::ImageUrl { url, detail, .. } => {
                media.push(OpenAiContentPart::ImageUrl {
                    image_url: OpenAiImageUrl {
                        url: url.clone(),
                        detail: detail.clone(),
                    },
                });
            }
            CanonicalPart::Audio { data, format, .. } => {
                media.push(OpenAiContentPart::InputAudio {
                    input_audio: OpenAiInputAudio {
                        data: data.clone(),
                        format: format.clone(),
                    },
                });
            }
            CanonicalPart::File {
                mime_type,
                name,
                data,
            } => media.push(OpenAiContentPart::File {
                file: OpenAiFile {
                    filename: (!name.is_empty()).then(|| name.clone()),
                    file_data: Some(to_data_url(mime_type, data)),
                },
            }),
            CanonicalPart::ToolCall(call) => tool_calls.push(OpenAiToolCall {
                id: call.id.clone(),
                type_: function_type(),
                function: OpenAiToolCallFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            }),
            CanonicalPart::ToolResult { id, name, result } => results.push(OpenAiMessage {
                role: "tool".to_string(),
                content: Some(OpenAiContent::Text(result.clone())),
                name: (!name.is_empty()).then(|| name.clone()),
                tool_call_id: Some(id.clone()),
                ..OpenAiMessage::default()
            }),
            CanonicalPart::Reasoning { .. } => {
                tracing::debug!("dropping reasoning part from OpenAI request history");
            }
        }
    }

    let content = if media.is_empty() {
        (!text.is_empty()).then_some(OpenAiContent::Text(text))
    } else {
        let mut parts = Vec::with_capacity(media.len() + 1);
        if !text.is_empty() {
            parts.push(OpenAiContentPart::Text { text });
        }
        parts.extend(media);
        Some(OpenAiContent::Parts(parts))
    };

    // Tool results must directly follow the assistant turn that requested them.
    let has_results = !results.is_empty();
    out.extend(results);

    let has_body = content.is_some() || !tool_calls.is_empty() || refusal.is_some();
    if has_body || (!has_results && message.role != CanonicalRole::Tool) {
        out.push(OpenAiMessage {
            role: role_to_openai(message.role).to_string(),
            content,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            refusal,
            ..OpenAiMessage::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalTool, CanonicalToolCall};

    #[test]
    fn test_instructions_and_stream_options() {
        let options = ChatOptions {
            model: "gpt-4o-mini".into(),
            instructions: Some("be brief".into()),
            stop_sequences: vec!["a".into(), "b".into()],
            ..ChatOptions::default()
        };
        let messages = vec![CanonicalMessage::with_text(CanonicalRole::User, "hi")];
        let wire = encode_openai_chat_request(&messages, &options, true);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["stop"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_tool_round_trip_history() {
        let mut assistant = CanonicalMessage::new(CanonicalRole::Assistant);
        assistant.parts.push(CanonicalPart::reasoning("hidden"));
        assistant
            .parts
            .push(CanonicalPart::ToolCall(CanonicalToolCall {
                id: "call_1".into(),
                name: "f".into(),
                arguments: "{}".into(),
            }));
        let mut tool = CanonicalMessage::new(CanonicalRole::Tool);
        tool.parts.push(CanonicalPart::ToolResult {
            id: "call_1".into(),
            name: "f".into(),
            result: "ok".into(),
        });
        let options = ChatOptions {
            tools: vec![CanonicalTool {
                name: "f".into(),
                description: None,
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..ChatOptions::default()
        };

        let wire = encode_openai_chat_request(&[assistant, tool], &options, false);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert!(json["messages"][0].get("content").is_none());
        assert_eq!(json["messages"][0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(json["messages"][1]["role"], "tool");
        assert_eq!(json["messages"][1]["tool_call_id"], "call_1");
        assert_eq!(json["tools"][0]["function"]["name"], "f");
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn test_media_switches_to_part_list() {
        let mut user = CanonicalMessage::with_text(CanonicalRole::User, "what is this");
        user.parts.push(CanonicalPart::File {
            mime_type: "application/pdf".into(),
            name: "a.pdf".into(),
            data: b"%PDF".to_vec(),
        });
        let wire = encode_openai_chat_request(&[user], &ChatOptions::default(), false);
        let json = serde_json::to_value(&wire).unwrap();
        let parts = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "file");
        assert_eq!(parts[1]["file"]["file_data"], "data:application/pdf;base64,JVBERg==");
    }
}
