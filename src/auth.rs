use crate::error::GatewayError;
use crate::protocol::canonical::IngressApi;
use http::header::{HeaderName, AUTHORIZATION};
use rustc_hash::FxHashSet;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Client tokens accepted by the front ends.
#[derive(Debug, Clone)]
pub enum AllowedClientKeys {
    /// No tokens configured: every request is accepted.
    Disabled,
    Single(Box<str>),
    Multiple(FxHashSet<String>),
}

impl AllowedClientKeys {
    fn contains(&self, key: &str) -> bool {
        match self {
            AllowedClientKeys::Disabled => true,
            AllowedClientKeys::Single(single) => single.as_ref() == key,
            AllowedClientKeys::Multiple(set) => set.contains(key),
        }
    }
}

fn bearer_token(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Extract the client token from request headers, based on the front end's convention.
///
/// - `OpenAiChat` / `Llmapi`: `Authorization: Bearer <key>`
/// - Anthropic: `x-api-key: <key>` first, then fall back to `Authorization: Bearer <key>`
///
/// # Errors
///
/// Returns `GatewayError::Auth` when no expected header is present.
pub fn extract_api_key(
    ingress: IngressApi,
    headers: &http::HeaderMap,
) -> Result<&str, GatewayError> {
    let key = match ingress {
        IngressApi::Anthropic => headers
            .get(X_API_KEY)
            .and_then(|v| v.to_str().ok())
            .or_else(|| bearer_token(headers)),
        IngressApi::OpenAiChat | IngressApi::Llmapi => bearer_token(headers),
    };

    key.filter(|key| !key.is_empty())
        .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))
}

/// Authenticate an incoming request against the configured tokens.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the token is missing or unknown.
pub fn authenticate(
    ingress: IngressApi,
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), GatewayError> {
    if matches!(allowed_keys, AllowedClientKeys::Disabled) {
        return Ok(());
    }
    let client_key = extract_api_key(ingress, headers)?;
    if allowed_keys.contains(client_key) {
        Ok(())
    } else {
        Err(GatewayError::Auth("Invalid API key".to_string()))
    }
}

/// Build the token index from the configured list.
#[must_use]
pub fn build_allowed_key_set(tokens: &[String]) -> AllowedClientKeys {
    let mut allowed_set: FxHashSet<String> = tokens.iter().cloned().collect();

    match allowed_set.len() {
        0 => AllowedClientKeys::Disabled,
        1 => match allowed_set.drain().next() {
            Some(single_key) => AllowedClientKeys::Single(single_key.into_boxed_str()),
            None => AllowedClientKeys::Disabled,
        },
        _ => AllowedClientKeys::Multiple(allowed_set),
    }
}
