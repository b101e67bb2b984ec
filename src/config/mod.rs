pub mod validation;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::ProviderKind;
use crate::stream::reasoning::DEFAULT_REASONING_MARKER;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Whole-request timeout in seconds, streaming included.
    pub timeout: u64,
    pub base_path: String,
    pub http_pool_max_idle_per_host: usize,
    pub http_pool_idle_timeout_secs: u64,
    /// Extra attempts for a send that failed before any response body.
    pub upstream_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    9000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_upstream_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default)]
    base_path: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    http_pool_idle_timeout_secs: u64,
    #[serde(default = "default_upstream_retries")]
    upstream_retries: u32,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            host: wire.host,
            port: wire.port,
            timeout: wire.timeout,
            base_path: wire.base_path.trim_end_matches('/').to_string(),
            http_pool_max_idle_per_host: wire.http_pool_max_idle_per_host,
            http_pool_idle_timeout_secs: wire.http_pool_idle_timeout_secs,
            upstream_retries: wire.upstream_retries,
            // missing or explicit null => tokio's default (one per core)
            runtime_worker_threads: match wire.runtime_worker_threads {
                Some(RuntimeThreadsSetting::Fixed(threads)) => Some(threads),
                Some(RuntimeThreadsSetting::Auto(())) | None => None,
            },
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: default_timeout(),
            base_path: String::new(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            upstream_retries: default_upstream_retries(),
            runtime_worker_threads: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Inline reasoning markers recognized in text output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
}

fn default_markers() -> Vec<String> {
    vec![DEFAULT_REASONING_MARKER.to_string()]
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
        }
    }
}

/// One upstream account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Wire protocol: `openai`, `anthropic`, `google` or `llmapi`.
    pub provider: String,
    /// Base URL; vendors other than `llmapi` fall back to their public API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sk: String,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

impl ProviderConfig {
    /// Parsed provider kind; `None` for names validation rejects.
    #[must_use]
    pub fn kind(&self) -> Option<ProviderKind> {
        match self.provider.as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "google" => Some(ProviderKind::Google),
            "llmapi" => Some(ProviderKind::Llmapi),
            _ => None,
        }
    }

    /// Configured URL, or the vendor's public endpoint.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return Some(url.trim_end_matches('/'));
        }
        match self.kind()? {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Google => Some("https://generativelanguage.googleapis.com/v1beta"),
            ProviderKind::Llmapi => None,
        }
    }
}

/// A public model name bound to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Upstream model id; defaults to `name`.
    #[serde(default)]
    pub model: String,
    pub provider: String,
    /// Output token cap applied when the client sets none.
    #[serde(default, alias = "maxToken")]
    pub max_token: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Accepted client tokens; empty disables authentication.
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails, or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: impl AsRef<std::path::Path>) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.llm.providers.len() >= 2);
        assert!(!config.llm.models.is_empty());
        assert_eq!(config.reasoning.markers, vec!["think".to_string()]);
    }

    #[test]
    fn test_defaults_for_minimal_config() {
        let config = parse_config("llm:\n  providers: []\n").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.timeout, 180);
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.tokens.is_empty());
        assert_eq!(config.reasoning.markers, vec!["think".to_string()]);
    }

    #[test]
    fn test_model_max_token_accepts_both_spellings() {
        let model: ModelConfig =
            serde_yaml::from_str("{name: a, provider: p, maxToken: 100}").unwrap();
        assert_eq!(model.max_token, Some(100));
        let model: ModelConfig =
            serde_yaml::from_str("{name: a, provider: p, max_token: 7}").unwrap();
        assert_eq!(model.max_token, Some(7));
    }

    #[test]
    fn test_provider_base_url_fallback() {
        let provider = ProviderConfig {
            name: "a".into(),
            provider: "anthropic".into(),
            url: None,
            sk: String::new(),
            insecure: false,
        };
        assert_eq!(provider.base_url(), Some("https://api.anthropic.com/v1"));

        let custom = ProviderConfig {
            url: Some("http://127.0.0.1:1234/v1/".into()),
            ..provider
        };
        assert_eq!(custom.base_url(), Some("http://127.0.0.1:1234/v1"));
    }

    #[test]
    fn test_runtime_threads_null_means_auto() {
        let server: ServerConfig = serde_yaml::from_str("runtime_worker_threads: null").unwrap();
        assert_eq!(server.runtime_worker_threads, None);
        let server: ServerConfig = serde_yaml::from_str("runtime_worker_threads: 4").unwrap();
        assert_eq!(server.runtime_worker_threads, Some(4));
    }
}
