use async_trait::async_trait;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalCompletion, ProviderKind};
use crate::protocol::llmapi::response_decoder::LlmapiStreamAdapter;
use crate::protocol::llmapi::{encode_chat_request, to_canonical_completion, ChatResponse};
use crate::stream::{DeltaAccumulator, EventStreamDecoder};
use crate::transport::read_json;

use super::{bearer_headers, drive_stream, GenerateRequest, Provider, Upstream};

/// Another gateway instance, spoken to over its internal RPC schema.
pub struct LlmapiProvider {
    upstream: Upstream,
    headers: http::HeaderMap,
}

impl LlmapiProvider {
    #[must_use]
    pub fn new(upstream: Upstream) -> Self {
        let headers = bearer_headers(&upstream.api_key);
        Self { upstream, headers }
    }
}

#[async_trait]
impl Provider for LlmapiProvider {
    fn name(&self) -> &str {
        &self.upstream.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Llmapi
    }

    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<CanonicalCompletion, GatewayError> {
        let stream = request.callbacks.is_streaming();
        let body = encode_chat_request(&request.messages, &request.options);
        let path = if stream {
            "/api/v1/chat/stream"
        } else {
            "/api/v1/chat"
        };
        let url = self.upstream.endpoint(path);
        let response = self
            .upstream
            .post(&url, &self.headers, &body, &request.cancel)
            .await?;

        if !stream {
            let wire: ChatResponse = read_json(response, &request.cancel).await?;
            if let Some(error) = wire.error {
                return Err(GatewayError::Upstream {
                    status: 502,
                    message: error.message,
                });
            }
            let Some(completion) = wire.chat_completion else {
                return Err(GatewayError::Translation(
                    "upstream response has no chatCompletion".to_string(),
                ));
            };
            return to_canonical_completion(completion);
        }

        let decoder =
            EventStreamDecoder::new(response.bytes_stream()).with_cancellation(request.cancel);
        drive_stream(
            decoder,
            LlmapiStreamAdapter::new(),
            DeltaAccumulator::new(request.options.model),
            &request.callbacks,
        )
        .await
    }
}
