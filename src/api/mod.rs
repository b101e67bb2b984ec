pub mod anthropic;
pub(crate) mod common;
pub mod health;
pub mod llmapi;
pub mod models;
pub mod openai;
