pub mod anthropic;
pub mod canonical;
pub(crate) mod error_shapes;
pub mod gemini;
pub mod llmapi;
pub mod media;
pub mod openai_chat;
