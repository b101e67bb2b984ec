use async_trait::async_trait;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalCompletion, ProviderKind};
use crate::protocol::gemini::encoder::encode_gemini_request;
use crate::protocol::gemini::response_decoder::{decode_gemini_response, GeminiStreamAdapter};
use crate::protocol::gemini::GeminiResponse;
use crate::stream::{DeltaAccumulator, JsonArrayDecoder};
use crate::transport::read_json;

use super::{drive_stream, header_value, GenerateRequest, Provider, Upstream};

/// Gemini `generateContent` / `streamGenerateContent`.
///
/// The streaming endpoint is called without `alt=sse`, so the body is one
/// JSON array whose elements arrive over time.
pub struct GoogleProvider {
    upstream: Upstream,
    headers: http::HeaderMap,
}

impl GoogleProvider {
    #[must_use]
    pub fn new(upstream: Upstream) -> Self {
        let mut headers = http::HeaderMap::new();
        if let Some(value) = header_value(&upstream.api_key) {
            headers.insert("x-goog-api-key", value);
        }
        Self { upstream, headers }
    }

    fn model_url(&self, model: &str, stream: bool) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let action = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        self.upstream.endpoint(&format!("/models/{model}:{action}"))
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        &self.upstream.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<CanonicalCompletion, GatewayError> {
        let stream = request.callbacks.is_streaming();
        let body = encode_gemini_request(&request.messages, &request.options)?;
        let url = self.model_url(&request.options.model, stream);
        let response = self
            .upstream
            .post(&url, &self.headers, &body, &request.cancel)
            .await?;

        if !stream {
            let wire: GeminiResponse = read_json(response, &request.cancel).await?;
            let mut completion = decode_gemini_response(wire)?;
            if completion.model.is_empty() {
                completion.model = request.options.model;
            }
            return Ok(completion);
        }

        let decoder =
            JsonArrayDecoder::new(response.bytes_stream()).with_cancellation(request.cancel);
        drive_stream(
            decoder,
            GeminiStreamAdapter::new(),
            DeltaAccumulator::new(request.options.model),
            &request.callbacks,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::transport::HttpTransport;
    use std::sync::Arc;

    fn provider() -> GoogleProvider {
        GoogleProvider::new(Upstream {
            name: "g".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key: "key".into(),
            insecure: false,
            transport: Arc::new(HttpTransport::new(&ServerConfig::default())),
        })
    }

    #[test]
    fn test_model_urls() {
        let provider = provider();
        assert_eq!(
            provider.model_url("gemini-2.5-flash", false),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            provider.model_url("models/gemini-2.5-flash", true),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
        assert_eq!(provider.headers["x-goog-api-key"], "key");
    }
}
