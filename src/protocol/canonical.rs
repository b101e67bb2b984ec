use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Which front end the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressApi {
    OpenAiChat,
    Anthropic,
    Llmapi,
}

/// The wire protocol an upstream provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Llmapi,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Llmapi => "llmapi",
        }
    }
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl CanonicalUsage {
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments object, kept verbatim.
    pub arguments: String,
}

/// A single part of a message's content.
///
/// Exactly one variant is populated per part; the enum makes an empty or
/// ambiguous part unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        delta: bool,
    },
    Reasoning {
        text: String,
        /// Opaque blob some backends need back on the next turn to restore
        /// hidden reasoning state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Refusal {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Base64 payload.
        data: String,
        format: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        delta: bool,
    },
    File {
        mime_type: String,
        #[serde(default)]
        name: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    ToolCall(CanonicalToolCall),
    ToolResult {
        id: String,
        #[serde(default)]
        name: String,
        result: String,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl CanonicalPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        CanonicalPart::Text {
            text: text.into(),
            delta: false,
        }
    }

    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        CanonicalPart::Reasoning {
            text: text.into(),
            signature: None,
        }
    }

    /// The text channel this part contributes to, if it carries text that
    /// should be concatenated across deltas.
    #[must_use]
    pub fn text_kind(&self) -> Option<TextKind> {
        match self {
            CanonicalPart::Text { .. } => Some(TextKind::Visible),
            CanonicalPart::Reasoning { .. } => Some(TextKind::Reasoning),
            CanonicalPart::Refusal { .. } => Some(TextKind::Refusal),
            _ => None,
        }
    }
}

/// Channel of a text-bearing part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    Visible,
    Reasoning,
    Refusal,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: CanonicalRole,
    #[serde(default)]
    pub parts: SmallVec<[CanonicalPart; 2]>,
}

#[must_use]
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl CanonicalMessage {
    #[must_use]
    pub fn new(role: CanonicalRole) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn with_text(role: CanonicalRole, text: impl Into<String>) -> Self {
        let mut message = Self::new(role);
        message.parts.push(CanonicalPart::text(text));
        message
    }

    /// Concatenation of every visible text part, in order.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                CanonicalPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of every reasoning part, in order.
    #[must_use]
    pub fn reasoning_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                CanonicalPart::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn tool_calls(&self) -> Vec<&CanonicalToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                CanonicalPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// True when the message carries reasoning and nothing else.
    #[must_use]
    pub fn is_reasoning(&self) -> bool {
        !self.parts.is_empty()
            && self
                .parts
                .iter()
                .all(|part| matches!(part, CanonicalPart::Reasoning { .. }))
    }
}

/// One observable unit of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCompletion {
    /// `true` for an incremental update, `false` for the final aggregate.
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub model: String,
    pub message: CanonicalMessage,
    #[serde(default)]
    pub usage: CanonicalUsage,
}

impl CanonicalCompletion {
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message
            .parts
            .iter()
            .any(|part| matches!(part, CanonicalPart::ToolCall(_)))
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Generation settings for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Backend model identifier (already resolved from the public alias).
    pub model: String,
    /// System instructions sent out-of-band where the backend supports it.
    pub instructions: Option<String>,
    pub tools: Vec<CanonicalTool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u64>,
    pub stop_sequences: Vec<String>,
    /// Requested output voice: `women`, `men`, or a vendor voice name.
    pub audio_voice: Option<String>,
}

/// Map a generic voice (`women`/`men`) to a vendor voice name; other values
/// are taken as vendor names already.
#[must_use]
pub fn vendor_voice<'a>(voice: &'a str, women: &'a str, men: &'a str) -> &'a str {
    match voice {
        "women" => women,
        "men" => men,
        other => other,
    }
}

/// A decoded front-end request.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    /// Public model name as the client sent it.
    pub model: String,
    pub stream: bool,
    pub messages: Vec<CanonicalMessage>,
    pub options: ChatOptions,
}

/// Unix seconds, used for `created` fields.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(parts: Vec<CanonicalPart>) -> CanonicalMessage {
        CanonicalMessage {
            id: "m1".to_string(),
            role: CanonicalRole::Assistant,
            parts: parts.into_iter().collect(),
        }
    }

    #[test]
    fn test_text_concatenates_only_text_parts() {
        let msg = assistant(vec![
            CanonicalPart::reasoning("hmm"),
            CanonicalPart::text("Hel"),
            CanonicalPart::Refusal {
                text: "no".to_string(),
            },
            CanonicalPart::text("lo"),
        ]);
        assert_eq!(msg.text(), "Hello");
        assert_eq!(msg.reasoning_text(), "hmm");
    }

    #[test]
    fn test_tool_calls_in_order() {
        let msg = assistant(vec![
            CanonicalPart::ToolCall(CanonicalToolCall {
                id: "a".into(),
                name: "f".into(),
                arguments: "{}".into(),
            }),
            CanonicalPart::text("x"),
            CanonicalPart::ToolCall(CanonicalToolCall {
                id: "b".into(),
                name: "g".into(),
                arguments: "{\"k\":1}".into(),
            }),
        ]);
        let ids: Vec<&str> = msg.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_is_reasoning() {
        assert!(assistant(vec![CanonicalPart::reasoning("r")]).is_reasoning());
        assert!(!assistant(vec![CanonicalPart::reasoning("r"), CanonicalPart::text("t")])
            .is_reasoning());
        assert!(!assistant(vec![]).is_reasoning());
        assert!(!assistant(vec![CanonicalPart::text("t")]).is_reasoning());
    }

    #[test]
    fn test_helpers_on_empty_message() {
        let msg = CanonicalMessage::new(CanonicalRole::User);
        assert_eq!(msg.text(), "");
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn test_completion_json_roundtrip_is_lossless() {
        let completion = CanonicalCompletion {
            delta: true,
            model: "m".into(),
            message: assistant(vec![
                CanonicalPart::Reasoning {
                    text: "why".into(),
                    signature: Some("c2ln".into()),
                },
                CanonicalPart::Text {
                    text: "hi".into(),
                    delta: true,
                },
                CanonicalPart::ImageUrl {
                    url: "https://x/y.png".into(),
                    detail: Some("low".into()),
                    format: None,
                },
                CanonicalPart::Audio {
                    id: Some("au".into()),
                    data: "AAAA".into(),
                    format: "wav".into(),
                    transcript: Some("hello".into()),
                    delta: false,
                },
                CanonicalPart::File {
                    mime_type: "application/pdf".into(),
                    name: "a.pdf".into(),
                    data: vec![0, 159, 146, 150],
                },
                CanonicalPart::ToolCall(CanonicalToolCall {
                    id: "call_1".into(),
                    name: "lookup".into(),
                    arguments: "{\"q\":\"x\"}".into(),
                }),
                CanonicalPart::ToolResult {
                    id: "call_1".into(),
                    name: "lookup".into(),
                    result: "42".into(),
                },
            ]),
            usage: CanonicalUsage::new(3, 4),
        };

        let json = serde_json::to_string(&completion).unwrap();
        let back: CanonicalCompletion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, completion);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["message"]["parts"][0]["type"], "reasoning");
        assert_eq!(value["message"]["parts"][4]["data"], "AJ+Slg==");
        assert_eq!(value["usage"]["total_tokens"], 7);
    }

    #[test]
    fn test_provider_kind_serde() {
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(serde_json::to_string(&ProviderKind::Google).unwrap(), "\"google\"");
    }
}
