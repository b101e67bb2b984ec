use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;

use crate::api::common::{
    json_response, parse_body, respond_once, respond_streaming, route, FrameEncoder,
};
use crate::error::{format_error, into_axum_response, GatewayError};
use crate::protocol::canonical::{CanonicalCompletion, IngressApi};
use crate::protocol::openai_chat::decoder::decode_openai_chat_request;
use crate::protocol::openai_chat::response_encoder::encode_openai_chat_response;
use crate::protocol::openai_chat::stream::{error_frame, OpenAiStreamEncoder};
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::state::AppState;

const INGRESS: IngressApi = IngressApi::OpenAiChat;
const FRONT_END: &str = "openai";

impl FrameEncoder for OpenAiStreamEncoder {
    fn delta(&mut self, completion: &CanonicalCompletion) -> Option<String> {
        self.encode_delta(completion)
    }

    fn finish(&mut self, completion: &CanonicalCompletion) -> String {
        self.encode_finish(completion)
    }

    fn error(&mut self, err: &GatewayError) -> String {
        error_frame(&format_error(err, INGRESS).1)
    }
}

/// `POST /v1/chat/completions`
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
    let wire: OpenAiChatRequest = parse_body(body)?;
    let routed = route(&state, decode_openai_chat_request(wire)?)?;

    if routed.request.stream {
        let encoder = OpenAiStreamEncoder::new(&routed.public_model);
        return Ok(respond_streaming(state, routed, INGRESS, FRONT_END, encoder).await);
    }
    Ok(respond_once(&state, routed, INGRESS, FRONT_END, |completion, model| {
        json_response(&encode_openai_chat_response(completion, model))
    })
    .await)
}
