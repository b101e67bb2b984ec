use crate::protocol::canonical::{unix_now, CanonicalCompletion, CanonicalPart};
use crate::stream::sse::{data_frame, done_frame};

use super::response_encoder::{encode_tool_calls, finish_reason};
use super::{
    OpenAiDelta, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamToolCall,
    OpenAiStreamToolCallFunction,
};

/// Encodes canonical deltas as `chat.completion.chunk` frames.
///
/// Text and reasoning are forwarded as they arrive. Tool calls are sent once,
/// complete, from the final aggregate, followed by the `finish_reason`
/// chunk and `[DONE]`.
#[derive(Debug)]
pub struct OpenAiStreamEncoder {
    id: String,
    model: String,
    created: u64,
    role_sent: bool,
}

impl OpenAiStreamEncoder {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            created: unix_now(),
            role_sent: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Frame for one delta, or `None` when it carries nothing to forward.
    pub fn encode_delta(&mut self, completion: &CanonicalCompletion) -> Option<String> {
        let mut delta = OpenAiDelta::default();
        for part in &completion.message.parts {
            match part {
                CanonicalPart::Text { text, .. } if !text.is_empty() => {
                    delta.content.get_or_insert_with(String::new).push_str(text);
                }
                CanonicalPart::Reasoning { text, .. } if !text.is_empty() => {
                    delta
                        .reasoning_content
                        .get_or_insert_with(String::new)
                        .push_str(text);
                }
                CanonicalPart::Refusal { text } if !text.is_empty() => {
                    delta.refusal.get_or_insert_with(String::new).push_str(text);
                }
                _ => {}
            }
        }
        if delta.content.is_none() && delta.reasoning_content.is_none() && delta.refusal.is_none()
        {
            return None;
        }
        Some(self.frame(delta, None, None))
    }

    /// Closing frames: tool calls, the `finish_reason` chunk (with usage when
    /// any was reported) and `[DONE]`.
    pub fn encode_finish(&mut self, completion: &CanonicalCompletion) -> String {
        let mut out = String::new();

        let tool_calls: Vec<OpenAiStreamToolCall> = encode_tool_calls(completion)
            .into_iter()
            .zip(0u32..)
            .map(|(call, index)| OpenAiStreamToolCall {
                index,
                id: Some(call.id),
                type_: Some(call.type_),
                function: Some(OpenAiStreamToolCallFunction {
                    name: Some(call.function.name),
                    arguments: Some(call.function.arguments),
                }),
            })
            .collect();
        if !tool_calls.is_empty() {
            let delta = OpenAiDelta {
                tool_calls: Some(tool_calls),
                ..OpenAiDelta::default()
            };
            out.push_str(&self.frame(delta, None, None));
        }

        let usage = (completion.usage.total_tokens > 0).then(|| completion.usage.into());
        out.push_str(&self.frame(
            OpenAiDelta::default(),
            Some(finish_reason(completion).to_string()),
            usage,
        ));
        out.push_str(&done_frame());
        out
    }

    fn frame(
        &mut self,
        mut delta: OpenAiDelta,
        finish_reason: Option<String>,
        usage: Option<super::OpenAiUsage>,
    ) -> String {
        if !self.role_sent {
            delta.role = Some("assistant".to_string());
            self.role_sent = true;
        }
        let chunk = OpenAiStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
            error: None,
        };
        // Serializing plain owned structs cannot fail.
        data_frame(&serde_json::to_string(&chunk).unwrap_or_default())
    }
}

/// A mid-stream error frame in the `OpenAI` error shape.
#[must_use]
pub fn error_frame(body: &serde_json::Value) -> String {
    data_frame(&body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{
        CanonicalMessage, CanonicalRole, CanonicalToolCall, CanonicalUsage,
    };

    fn delta(parts: Vec<CanonicalPart>) -> CanonicalCompletion {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.parts.extend(parts);
        CanonicalCompletion {
            delta: true,
            model: "m".into(),
            message,
            usage: CanonicalUsage::default(),
        }
    }

    fn payload(frame: &str) -> serde_json::Value {
        let json = frame.strip_prefix("data: ").unwrap().trim_end();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_first_frame_carries_role() {
        let mut encoder = OpenAiStreamEncoder::new("gpt");
        let first = payload(&encoder.encode_delta(&delta(vec![CanonicalPart::reasoning("r")])).unwrap());
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["model"], "gpt");
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["reasoning_content"], "r");
        assert!(first["choices"][0]["finish_reason"].is_null());

        let second = payload(&encoder.encode_delta(&delta(vec![CanonicalPart::text("hi")])).unwrap());
        assert!(second["choices"][0]["delta"].get("role").is_none());
        assert_eq!(second["choices"][0]["delta"]["content"], "hi");
        assert_eq!(first["id"], second["id"]);
    }

    #[test]
    fn test_empty_delta_is_skipped() {
        let mut encoder = OpenAiStreamEncoder::new("gpt");
        assert!(encoder.encode_delta(&delta(vec![])).is_none());
    }

    #[test]
    fn test_finish_sends_tool_calls_usage_and_done() {
        let mut encoder = OpenAiStreamEncoder::new("gpt");
        let mut last = delta(vec![CanonicalPart::ToolCall(CanonicalToolCall {
            id: "call_1".into(),
            name: "f".into(),
            arguments: "{}".into(),
        })]);
        last.usage = CanonicalUsage::new(2, 3);
        let out = encoder.encode_finish(&last);
        let frames: Vec<&str> = out.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        let calls = payload(frames[0]);
        assert_eq!(calls["choices"][0]["delta"]["tool_calls"][0]["id"], "call_1");
        let fin = payload(frames[1]);
        assert_eq!(fin["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(fin["usage"]["total_tokens"], 5);
        assert_eq!(frames[2], "data: [DONE]");
    }

    #[test]
    fn test_finish_omits_empty_usage() {
        let mut encoder = OpenAiStreamEncoder::new("gpt");
        let out = encoder.encode_finish(&delta(vec![CanonicalPart::text("x")]));
        let fin = payload(out.split("\n\n").next().unwrap());
        assert!(fin.get("usage").is_none());
        assert_eq!(fin["choices"][0]["finish_reason"], "stop");
    }
}
