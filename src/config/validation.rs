use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_tokens(config)?;
    validate_log_level(config)?;
    validate_reasoning_markers(config)?;
    validate_providers(config)?;
    validate_models(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    if !server.base_path.is_empty() && !server.base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    Ok(())
}

fn validate_tokens(config: &AppConfig) -> Result<(), ConfigError> {
    if config.tokens.iter().any(|token| token.trim().is_empty()) {
        return Err(validation_err("tokens contains an empty token"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.log.level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log.level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_reasoning_markers(config: &AppConfig) -> Result<(), ConfigError> {
    for marker in &config.reasoning.markers {
        if marker.trim().is_empty() {
            return Err(validation_err("reasoning.markers contains an empty name"));
        }
        if marker.contains(['<', '>', '/']) {
            return Err(validation_err(format!(
                "reasoning marker '{marker}' must not contain '<', '>' or '/'"
            )));
        }
    }
    Ok(())
}

const VALID_PROVIDERS: &[&str] = &["openai", "anthropic", "google", "llmapi"];

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for provider in &config.llm.providers {
        if provider.name.trim().is_empty() {
            return Err(validation_err("provider name cannot be empty"));
        }
        if !names.insert(provider.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if provider.kind().is_none() {
            return Err(validation_err(format!(
                "Provider '{}': unknown provider '{}'. Must be one of: {}",
                provider.name,
                provider.provider,
                VALID_PROVIDERS.join(", ")
            )));
        }
        let Some(base_url) = provider.base_url() else {
            return Err(validation_err(format!(
                "Provider '{}': url is required for {}",
                provider.name, provider.provider
            )));
        };
        let parsed = url::Url::parse(base_url).map_err(|err| {
            validation_err(format!(
                "Provider '{}': url is not a valid URL: {err}",
                provider.name
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(validation_err(format!(
                "Provider '{}': url must use http:// or https://",
                provider.name
            )));
        }
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let providers: HashSet<&str> = config
        .llm
        .providers
        .iter()
        .map(|provider| provider.name.as_str())
        .collect();

    let mut names = HashSet::new();
    for model in &config.llm.models {
        if model.name.trim().is_empty() {
            return Err(validation_err("model name cannot be empty"));
        }
        if !names.insert(model.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate model name '{}'",
                model.name
            )));
        }
        if !providers.contains(model.provider.as_str()) {
            return Err(validation_err(format!(
                "Model '{}': unknown provider '{}'",
                model.name, model.provider
            )));
        }
        if model.max_token == Some(0) {
            return Err(validation_err(format!(
                "Model '{}': max_token must be greater than 0 when set",
                model.name
            )));
        }
    }
    Ok(())
}
