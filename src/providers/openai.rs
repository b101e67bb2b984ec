use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalCompletion, ProviderKind};
use crate::protocol::openai_chat::encoder::encode_openai_chat_request;
use crate::protocol::openai_chat::response_decoder::{
    decode_openai_chat_response, OpenAiStreamAdapter,
};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::stream::reasoning::ReasoningMarker;
use crate::stream::{DeltaAccumulator, EventStreamDecoder};
use crate::transport::read_json;

use super::{bearer_headers, drive_stream, GenerateRequest, Provider, Upstream};

/// Chat Completions over `{url}/chat/completions`.
pub struct OpenAiProvider {
    upstream: Upstream,
    headers: http::HeaderMap,
    markers: Arc<[ReasoningMarker]>,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(upstream: Upstream, markers: Arc<[ReasoningMarker]>) -> Self {
        let headers = bearer_headers(&upstream.api_key);
        Self {
            upstream,
            headers,
            markers,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.upstream.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<CanonicalCompletion, GatewayError> {
        let stream = request.callbacks.is_streaming();
        let body = encode_openai_chat_request(&request.messages, &request.options, stream);
        let url = self.upstream.endpoint("/chat/completions");
        let response = self
            .upstream
            .post(&url, &self.headers, &body, &request.cancel)
            .await?;

        if !stream {
            let wire: OpenAiChatResponse = read_json(response, &request.cancel).await?;
            return decode_openai_chat_response(wire, &self.markers);
        }

        let decoder =
            EventStreamDecoder::new(response.bytes_stream()).with_cancellation(request.cancel);
        let accumulator = DeltaAccumulator::new(request.options.model)
            .with_reasoning_markers(Arc::clone(&self.markers));
        drive_stream(decoder, OpenAiStreamAdapter, accumulator, &request.callbacks).await
    }
}
