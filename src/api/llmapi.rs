//! Internal RPC front end: `chatParams` in, `chatCompletion` out.
//!
//! The streaming route sends every delta as its own `chatCompletion` with
//! `delta=true` and closes with the aggregate (`delta=false`); there is no
//! `[DONE]` sentinel.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;

use crate::api::common::{
    json_response, parse_body, respond_once, respond_streaming, route, FrameEncoder,
};
use crate::error::{into_axum_response, GatewayError};
use crate::protocol::canonical::{CanonicalCompletion, IngressApi};
use crate::protocol::error_shapes::error_code;
use crate::protocol::llmapi::{
    decode_chat_request, from_canonical_completion, ChatError, ChatRequest, ChatResponse,
};
use crate::state::AppState;
use crate::stream::sse::data_frame;

const INGRESS: IngressApi = IngressApi::Llmapi;
const FRONT_END: &str = "llmapi";

struct ChatStreamEncoder {
    model: String,
}

impl ChatStreamEncoder {
    fn completion_frame(&self, completion: &CanonicalCompletion) -> String {
        let mut wire = from_canonical_completion(completion);
        wire.model.clone_from(&self.model);
        frame(&ChatResponse {
            chat_completion: Some(wire),
            error: None,
        })
    }
}

fn frame(response: &ChatResponse) -> String {
    // Serializing plain owned structs cannot fail.
    data_frame(&serde_json::to_string(response).unwrap_or_default())
}

/// Error body in the internal schema, with the `OpenAI`-style code.
fn chat_error(err: &GatewayError) -> ChatError {
    ChatError {
        code: error_code(err.category()).to_string(),
        message: err.to_string(),
    }
}

impl FrameEncoder for ChatStreamEncoder {
    fn delta(&mut self, completion: &CanonicalCompletion) -> Option<String> {
        Some(self.completion_frame(completion))
    }

    fn finish(&mut self, completion: &CanonicalCompletion) -> String {
        self.completion_frame(completion)
    }

    fn error(&mut self, err: &GatewayError) -> String {
        frame(&ChatResponse {
            chat_completion: None,
            error: Some(chat_error(err)),
        })
    }
}

/// `POST /api/v1/chat`
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    handle(state, &headers, &body, false).await
}

/// `POST /api/v1/chat/stream`
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    handle(state, &headers, &body, true).await
}

async fn handle(state: Arc<AppState>, headers: &HeaderMap, body: &[u8], stream: bool) -> Response {
    match handler_inner(state, headers, body, stream).await {
        Ok(response) => response,
        Err(err) => into_axum_response(&err, INGRESS),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: &HeaderMap,
    body: &[u8],
    stream: bool,
) -> Result<Response, GatewayError> {
    state.authenticate(INGRESS, headers)?;
    let wire: ChatRequest = parse_body(body)?;
    let mut request = decode_chat_request(wire)?;
    request.stream = stream;
    let routed = route(&state, request)?;

    if stream {
        let encoder = ChatStreamEncoder {
            model: routed.public_model.clone(),
        };
        return Ok(respond_streaming(state, routed, INGRESS, FRONT_END, encoder).await);
    }
    Ok(respond_once(&state, routed, INGRESS, FRONT_END, |completion, model| {
        let mut wire = from_canonical_completion(completion);
        wire.model = model.to_string();
        json_response(&ChatResponse {
            chat_completion: Some(wire),
            error: None,
        })
    })
    .await)
}
