//! Upstream provider adapters.
//!
//! Each adapter encodes the canonical conversation in its vendor's wire
//! format, sends it, and turns the answer back into a
//! [`CanonicalCompletion`]. Streaming is used exactly when the caller
//! registered at least one callback; the stream is then driven through
//! [`run_pipeline`] so callbacks see deltas as they arrive.

pub mod anthropic;
pub mod google;
pub mod llmapi;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::pipeline::{run_pipeline, StreamAdapter, StreamCallbacks};
use crate::protocol::canonical::{CanonicalCompletion, CanonicalMessage, ChatOptions, ProviderKind};
use crate::stream::reasoning::ReasoningMarker;
use crate::stream::{ChunkDecoder, DeltaAccumulator};
use crate::transport::HttpTransport;

pub use self::anthropic::AnthropicProvider;
pub use self::google::GoogleProvider;
pub use self::llmapi::LlmapiProvider;
pub use self::openai::OpenAiProvider;

/// One generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub messages: Vec<CanonicalMessage>,
    /// `options.model` is the backend model id.
    pub options: ChatOptions,
    pub callbacks: StreamCallbacks,
    /// Fired on timeout or when the client goes away.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider name.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Run one completion, streaming iff `request.callbacks` is non-empty.
    ///
    /// # Errors
    ///
    /// Transport, upstream, decode and callback failures as [`GatewayError`].
    async fn generate(&self, request: GenerateRequest)
        -> Result<CanonicalCompletion, GatewayError>;
}

/// Connection settings shared by every adapter.
#[derive(Clone)]
pub struct Upstream {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub insecure: bool,
    pub transport: Arc<HttpTransport>,
}

impl Upstream {
    /// # Errors
    ///
    /// [`GatewayError::Config`] when the provider has no usable base URL.
    pub fn from_config(
        config: &ProviderConfig,
        transport: Arc<HttpTransport>,
    ) -> Result<Self, GatewayError> {
        let base_url = config.base_url().ok_or_else(|| {
            GatewayError::Config(format!("provider '{}' has no url", config.name))
        })?;
        Ok(Self {
            name: config.name.clone(),
            base_url: base_url.to_string(),
            api_key: config.sk.clone(),
            insecure: config.insecure,
            transport,
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &http::HeaderMap,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = serde_json::to_vec(body)
            .map_err(|err| GatewayError::Internal(format!("failed to encode request: {err}")))?;
        tracing::debug!(provider = %self.name, url, bytes = body.len(), "sending upstream request");
        self.transport
            .post_json(url, headers, Bytes::from(body), self.insecure, cancel)
            .await
    }
}

/// Build the adapter for one configured provider.
///
/// # Errors
///
/// [`GatewayError::Config`] for an unknown provider kind or missing URL.
pub fn build_provider(
    config: &ProviderConfig,
    transport: Arc<HttpTransport>,
    markers: Arc<[ReasoningMarker]>,
) -> Result<Arc<dyn Provider>, GatewayError> {
    let Some(kind) = config.kind() else {
        return Err(GatewayError::Config(format!(
            "provider '{}' has unknown kind '{}'",
            config.name, config.provider
        )));
    };
    let upstream = Upstream::from_config(config, transport)?;
    Ok(match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(upstream, markers)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(upstream)),
        ProviderKind::Google => Arc::new(GoogleProvider::new(upstream)),
        ProviderKind::Llmapi => Arc::new(LlmapiProvider::new(upstream)),
    })
}

pub(crate) fn header_value(value: &str) -> Option<http::HeaderValue> {
    match http::HeaderValue::from_str(value) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("provider credential is not a valid header value; sending without it");
            None
        }
    }
}

pub(crate) fn bearer_headers(api_key: &str) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    if !api_key.is_empty() {
        if let Some(value) = header_value(&format!("Bearer {api_key}")) {
            headers.insert(http::header::AUTHORIZATION, value);
        }
    }
    headers
}

/// Drive a streamed body through the pipeline and map its error.
pub(crate) async fn drive_stream<D, A>(
    mut decoder: D,
    mut adapter: A,
    accumulator: DeltaAccumulator,
    callbacks: &StreamCallbacks,
) -> Result<CanonicalCompletion, GatewayError>
where
    D: ChunkDecoder + Send,
    A: StreamAdapter<Chunk = D::Item>,
{
    run_pipeline(&mut decoder, &mut adapter, accumulator, callbacks)
        .await
        .map_err(GatewayError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::stream::reasoning::markers_from_names;

    fn provider_config(kind: &str, url: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: "p".into(),
            provider: kind.into(),
            url: url.map(str::to_string),
            sk: "secret".into(),
            insecure: false,
        }
    }

    #[test]
    fn test_build_provider_kinds() {
        let transport = Arc::new(HttpTransport::new(&ServerConfig::default()));
        let markers = markers_from_names(&["think"]);
        for (kind, expected) in [
            ("openai", ProviderKind::OpenAi),
            ("anthropic", ProviderKind::Anthropic),
            ("google", ProviderKind::Google),
        ] {
            let provider =
                build_provider(&provider_config(kind, None), transport.clone(), markers.clone())
                    .unwrap();
            assert_eq!(provider.kind(), expected);
            assert_eq!(provider.name(), "p");
        }

        assert!(build_provider(
            &provider_config("llmapi", None),
            transport.clone(),
            markers.clone()
        )
        .is_err());
        let provider = build_provider(
            &provider_config("llmapi", Some("http://10.0.0.1:9000")),
            transport,
            markers,
        )
        .unwrap();
        assert_eq!(provider.kind(), ProviderKind::Llmapi);
    }

    #[test]
    fn test_bearer_headers() {
        let headers = bearer_headers("abc");
        assert_eq!(headers[http::header::AUTHORIZATION], "Bearer abc");
        assert!(bearer_headers("").is_empty());
        assert!(bearer_headers("bad\nkey").is_empty());
    }
}
