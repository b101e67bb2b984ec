use async_trait::async_trait;

use crate::error::GatewayError;
use crate::protocol::anthropic::encoder::encode_anthropic_request;
use crate::protocol::anthropic::response_decoder::{
    decode_anthropic_response, AnthropicStreamAdapter,
};
use crate::protocol::anthropic::{AnthropicResponse, ANTHROPIC_VERSION};
use crate::protocol::canonical::{CanonicalCompletion, ProviderKind};
use crate::stream::{DeltaAccumulator, EventStreamDecoder};
use crate::transport::read_json;

use super::{drive_stream, header_value, GenerateRequest, Provider, Upstream};

/// Messages API over `{url}/messages`.
pub struct AnthropicProvider {
    upstream: Upstream,
    headers: http::HeaderMap,
}

impl AnthropicProvider {
    #[must_use]
    pub fn new(upstream: Upstream) -> Self {
        let mut headers = http::HeaderMap::new();
        if let Some(value) = header_value(&upstream.api_key) {
            headers.insert("x-api-key", value);
        }
        headers.insert(
            "anthropic-version",
            http::HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Self { upstream, headers }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.upstream.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<CanonicalCompletion, GatewayError> {
        let stream = request.callbacks.is_streaming();
        let body = encode_anthropic_request(&request.messages, &request.options, stream);
        let url = self.upstream.endpoint("/messages");
        let response = self
            .upstream
            .post(&url, &self.headers, &body, &request.cancel)
            .await?;

        if !stream {
            let wire: AnthropicResponse = read_json(response, &request.cancel).await?;
            return decode_anthropic_response(wire);
        }

        let decoder =
            EventStreamDecoder::new(response.bytes_stream()).with_cancellation(request.cancel);
        drive_stream(
            decoder,
            AnthropicStreamAdapter::new(),
            DeltaAccumulator::new(request.options.model),
            &request.callbacks,
        )
        .await
    }
}
