use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;

use crate::api::common::{
    json_response, parse_body, respond_once, respond_streaming, route, FrameEncoder,
};
use crate::error::{format_error, into_axum_response, GatewayError};
use crate::protocol::anthropic::decoder::decode_anthropic_request;
use crate::protocol::anthropic::response_encoder::encode_anthropic_response;
use crate::protocol::anthropic::stream::{error_frame, AnthropicStreamEncoder};
use crate::protocol::anthropic::AnthropicRequest;
use crate::protocol::canonical::{CanonicalCompletion, IngressApi};
use crate::state::AppState;

const INGRESS: IngressApi = IngressApi::Anthropic;
const FRONT_END: &str = "anthropic";

impl FrameEncoder for AnthropicStreamEncoder {
    fn delta(&mut self, completion: &CanonicalCompletion) -> Option<String> {
        let frames = self.encode_delta(completion);
        (!frames.is_empty()).then_some(frames)
    }

    fn finish(&mut self, completion: &CanonicalCompletion) -> String {
        self.encode_finish(completion)
    }

    fn error(&mut self, err: &GatewayError) -> String {
        let (_, body) = format_error(err, INGRESS);
        let type_ = body["error"]["type"].as_str().unwrap_or("api_error");
        error_frame(type_, &err.to_string())
    }
}

/// `POST /v1/messages`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match handler_inner(state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => into_axum_response(&err, INGRESS),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, GatewayError> {
    state.authenticate(INGRESS, headers)?;
    let wire: AnthropicRequest = parse_body(body)?;
    let routed = route(&state, decode_anthropic_request(wire)?)?;

    if routed.request.stream {
        let encoder = AnthropicStreamEncoder::new(&routed.public_model);
        return Ok(respond_streaming(state, routed, INGRESS, FRONT_END, encoder).await);
    }
    Ok(respond_once(&state, routed, INGRESS, FRONT_END, |completion, model| {
        json_response(&encode_anthropic_response(completion, model))
    })
    .await)
}
