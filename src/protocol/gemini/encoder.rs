use crate::error::GatewayError;
use crate::protocol::canonical::{
    vendor_voice, CanonicalMessage, CanonicalPart, CanonicalRole, ChatOptions,
};
use crate::protocol::media::{encode_base64, parse_data_url};

use super::{
    GeminiBlob, GeminiContent, GeminiFileData, GeminiFunctionCall, GeminiFunctionDeclaration,
    GeminiFunctionResponse, GeminiGenerationConfig, GeminiPart, GeminiPrebuiltVoice,
    GeminiRequest, GeminiSpeechConfig, GeminiThinkingConfig, GeminiTool, GeminiVoiceConfig,
};

/// Thinking budget requested on every call.
pub const THINKING_BUDGET: u32 = 8192;

/// Sent with replayed function calls that lost their signature; Gemini
/// rejects function-call history without one.
const PLACEHOLDER_SIGNATURE: &str = "context_engineering_is_the_way_to_go";

/// Encode a canonical conversation into a Gemini `generateContent` request.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when replayed tool-call arguments
/// are not a JSON object.
pub fn encode_gemini_request(
    messages: &[CanonicalMessage],
    options: &ChatOptions,
) -> Result<GeminiRequest, GatewayError> {
    let mut system: Vec<GeminiPart> = options
        .instructions
        .iter()
        .map(GeminiPart::text)
        .collect();
    let mut contents = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role == CanonicalRole::System {
            let text = message.text();
            if !text.is_empty() {
                system.push(GeminiPart::text(text));
            }
            continue;
        }
        let parts = encode_parts(message)?;
        if parts.is_empty() {
            continue;
        }
        let role = match message.role {
            CanonicalRole::Assistant => "model",
            _ => "user",
        };
        contents.push(GeminiContent {
            role: Some(role.to_string()),
            parts,
        });
    }

    let tools = (!options.tools.is_empty()).then(|| {
        vec![GeminiTool {
            function_declarations: options
                .tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters_json_schema: Some(tool.parameters.clone()),
                })
                .collect(),
        }]
    });

    let mut response_modalities = vec!["TEXT".to_string()];
    let speech_config = options.audio_voice.as_deref().map(|voice| {
        response_modalities.push("AUDIO".to_string());
        GeminiSpeechConfig {
            voice_config: GeminiVoiceConfig {
                prebuilt_voice_config: GeminiPrebuiltVoice {
                    voice_name: vendor_voice(voice, "Zephyr", "Gacrux").to_string(),
                },
            },
        }
    });

    Ok(GeminiRequest {
        contents,
        tools,
        system_instruction: (!system.is_empty()).then(|| GeminiContent {
            role: None,
            parts: system,
        }),
        generation_config: Some(GeminiGenerationConfig {
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            max_output_tokens: options.max_tokens,
            stop_sequences: (!options.stop_sequences.is_empty())
                .then(|| options.stop_sequences.clone()),
            response_modalities,
            thinking_config: Some(GeminiThinkingConfig {
                include_thoughts: true,
                thinking_budget: Some(THINKING_BUDGET),
            }),
            speech_config,
        }),
    })
}

fn encode_parts(message: &CanonicalMessage) -> Result<Vec<GeminiPart>, GatewayError> {
    let mut parts = Vec::with_capacity(message.parts.len());
    // A reasoning signature qualifies the parts that follow it.
    let mut signature: Option<String> = None;

    for part in &message.parts {
        match part {
            CanonicalPart::Reasoning {
                signature: Some(sig),
                ..
            } if !sig.is_empty() => signature = Some(sig.clone()),
            CanonicalPart::Reasoning { .. } | CanonicalPart::Refusal { .. } => {}
            CanonicalPart::Text { text, .. } => parts.push(GeminiPart {
                text: Some(text.clone()),
                thought_signature: signature.clone(),
                ..GeminiPart::default()
            }),
            CanonicalPart::ImageUrl { url, format, .. } => {
                parts.push(match parse_data_url(url) {
                    Some(data_url) => GeminiPart {
                        inline_data: Some(GeminiBlob {
                            mime_type: data_url.mime_type.to_string(),
                            data: data_url.payload.to_string(),
                        }),
                        ..GeminiPart::default()
                    },
                    None => GeminiPart {
                        file_data: Some(GeminiFileData {
                            mime_type: format.clone(),
                            file_uri: url.clone(),
                        }),
                        ..GeminiPart::default()
                    },
                });
            }
            CanonicalPart::File {
                mime_type, data, ..
            } => parts.push(GeminiPart {
                inline_data: Some(GeminiBlob {
                    mime_type: mime_type.clone(),
                    data: encode_base64(data),
                }),
                ..GeminiPart::default()
            }),
            CanonicalPart::Audio {
                data,
                format,
                delta: false,
                ..
            } => parts.push(GeminiPart {
                inline_data: Some(GeminiBlob {
                    mime_type: format!("audio/{format}"),
                    data: data.clone(),
                }),
                ..GeminiPart::default()
            }),
            CanonicalPart::Audio { .. } => {}
            CanonicalPart::ToolCall(call) => {
                let args = if call.arguments.trim().is_empty() {
                    serde_json::Value::Object(serde_json::Map::new())
                } else {
                    match serde_json::from_str::<serde_json::Value>(&call.arguments) {
                        Ok(value @ serde_json::Value::Object(_)) => value,
                        _ => {
                            return Err(GatewayError::InvalidRequest(format!(
                                "arguments of tool call {} are not a JSON object",
                                call.id
                            )))
                        }
                    }
                };
                parts.push(GeminiPart {
                    function_call: Some(GeminiFunctionCall {
                        id: (!call.id.is_empty()).then(|| call.id.clone()),
                        name: call.name.clone(),
                        args,
                    }),
                    thought_signature: Some(
                        signature
                            .clone()
                            .unwrap_or_else(|| encode_base64(PLACEHOLDER_SIGNATURE.as_bytes())),
                    ),
                    ..GeminiPart::default()
                });
            }
            CanonicalPart::ToolResult { id, name, result } => parts.push(GeminiPart {
                function_response: Some(GeminiFunctionResponse {
                    id: (!id.is_empty()).then(|| id.clone()),
                    name: name.clone(),
                    response: serde_json::json!({ "output": result }),
                }),
                ..GeminiPart::default()
            }),
        }
    }
    Ok(parts)
}
