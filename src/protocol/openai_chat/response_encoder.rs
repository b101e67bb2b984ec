use crate::protocol::canonical::{unix_now, CanonicalCompletion, CanonicalPart, CanonicalUsage};

use super::{
    function_type, OpenAiChatResponse, OpenAiChoice, OpenAiContent, OpenAiMessage,
    OpenAiMessageAudio, OpenAiToolCall, OpenAiToolCallFunction, OpenAiUsage,
};

impl From<CanonicalUsage> for OpenAiUsage {
    fn from(usage: CanonicalUsage) -> Self {
        OpenAiUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[must_use]
pub fn finish_reason(completion: &CanonicalCompletion) -> &'static str {
    if completion.has_tool_calls() {
        "tool_calls"
    } else {
        "stop"
    }
}

pub(crate) fn encode_tool_calls(completion: &CanonicalCompletion) -> Vec<OpenAiToolCall> {
    completion
        .message
        .tool_calls()
        .into_iter()
        .map(|call| OpenAiToolCall {
            id: call.id.clone(),
            type_: function_type(),
            function: OpenAiToolCallFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        })
        .collect()
}

/// Encode a final completion as an `OpenAI` `chat.completion` object.
#[must_use]
pub fn encode_openai_chat_response(
    completion: &CanonicalCompletion,
    model: &str,
) -> OpenAiChatResponse {
    let text = completion.message.text();
    let reasoning = completion.message.reasoning_text();
    let tool_calls = encode_tool_calls(completion);

    let mut refusal = None;
    let mut audio = None;
    for part in &completion.message.parts {
        match part {
            CanonicalPart::Refusal { text } => refusal = Some(text.clone()),
            CanonicalPart::Audio {
                id,
                data,
                transcript,
                ..
            } => {
                audio = Some(OpenAiMessageAudio {
                    id: id.clone().unwrap_or_default(),
                    data: Some(data.clone()),
                    transcript: transcript.clone(),
                });
            }
            _ => {}
        }
    }

    OpenAiChatResponse {
        id: completion.message.id.clone(),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty() || tool_calls.is_empty())
                    .then_some(OpenAiContent::Text(text)),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                refusal,
                audio,
                ..OpenAiMessage::default()
            },
            finish_reason: Some(finish_reason(completion).to_string()),
        }],
        usage: Some(completion.usage.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, CanonicalToolCall};

    fn completion(parts: Vec<CanonicalPart>) -> CanonicalCompletion {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.id = "msg-1".into();
        message.parts.extend(parts);
        CanonicalCompletion {
            delta: false,
            model: "backend-model".into(),
            message,
            usage: CanonicalUsage::new(10, 5),
        }
    }

    #[test]
    fn test_encode_text_response() {
        let wire = encode_openai_chat_response(
            &completion(vec![CanonicalPart::reasoning("r"), CanonicalPart::text("Hello world")]),
            "gpt",
        );
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["id"], "msg-1");
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["model"], "gpt");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["choices"][0]["message"]["content"], "Hello world");
        assert_eq!(json["choices"][0]["message"]["reasoning_content"], "r");
        assert_eq!(json["usage"]["total_tokens"], 15);
    }

    #[test]
    fn test_encode_tool_call_response() {
        let wire = encode_openai_chat_response(
            &completion(vec![CanonicalPart::ToolCall(CanonicalToolCall {
                id: "call_xyz".into(),
                name: "get_weather".into(),
                arguments: "{\"city\":\"LA\"}".into(),
            })]),
            "gpt",
        );
        let choice = &wire.choices[0];
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_xyz");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"LA\"}");
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert!(choice.message.content.is_none());
    }
}
