//! Request flow shared by the front ends: model resolution, the upstream
//! deadline, and the SSE response plumbing.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{into_axum_response, GatewayError};
use crate::observability::log_request_complete;
use crate::pipeline::{CallbackError, CompletionCallback, StreamCallbacks};
use crate::protocol::canonical::{CanonicalCompletion, CanonicalRequest, IngressApi};
use crate::providers::GenerateRequest;
use crate::routing::RouteTarget;
use crate::state::AppState;

/// Frames buffered between the pipeline and the client socket.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// A decoded request bound to its provider.
pub(crate) struct RoutedRequest {
    pub(crate) target: RouteTarget,
    /// Model name as the client sent it; echoed back in responses.
    pub(crate) public_model: String,
    pub(crate) request: CanonicalRequest,
}

/// Resolve the model and fill provider-side options.
pub(crate) fn route(
    state: &AppState,
    mut request: CanonicalRequest,
) -> Result<RoutedRequest, GatewayError> {
    let target = state.model_router.resolve(&request.model)?;
    request.options.model.clone_from(&target.actual_model);
    if request.options.max_tokens.is_none() {
        request.options.max_tokens = target.max_token;
    }
    tracing::debug!(
        model = %request.model,
        provider = target.provider.name(),
        actual_model = %target.actual_model,
        stream = request.stream,
        "routing request"
    );
    Ok(RoutedRequest {
        target,
        public_model: request.model.clone(),
        request,
    })
}

/// Run one generation under the configured deadline.
///
/// The deadline fires the request's cancellation token; an exchange cut
/// short that way is reported as a `504` upstream error.
pub(crate) async fn generate(
    state: &AppState,
    routed: &RoutedRequest,
    callbacks: StreamCallbacks,
) -> Result<CanonicalCompletion, GatewayError> {
    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        let timeout = state.request_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };

    let request = GenerateRequest {
        messages: routed.request.messages.clone(),
        options: routed.request.options.clone(),
        callbacks,
        cancel: cancel.clone(),
    };
    let result = routed.target.provider.generate(request).await;
    timer.abort();

    match result {
        Err(GatewayError::Cancelled) if cancel.is_cancelled() => Err(GatewayError::Upstream {
            status: 504,
            message: format!(
                "upstream did not finish within {}s",
                state.request_timeout().as_secs()
            ),
        }),
        other => other,
    }
}

/// Non-streaming flow: generate, then render the aggregate.
pub(crate) async fn respond_once<F>(
    state: &AppState,
    routed: RoutedRequest,
    ingress: IngressApi,
    front_end: &'static str,
    render: F,
) -> Response
where
    F: FnOnce(&CanonicalCompletion, &str) -> Response,
{
    let start = Instant::now();
    match generate(state, &routed, StreamCallbacks::default()).await {
        Ok(completion) => {
            log_request_complete(
                front_end,
                &routed.public_model,
                false,
                &completion.usage,
                start,
            );
            render(&completion, &routed.public_model)
        }
        Err(err) => {
            tracing::warn!(front_end, model = %routed.public_model, error = %err, "request failed");
            into_axum_response(&err, ingress)
        }
    }
}

/// Renders canonical completions as one front end's stream frames.
pub(crate) trait FrameEncoder: Send + 'static {
    /// Frames for one delta; `None` when there is nothing to forward.
    fn delta(&mut self, completion: &CanonicalCompletion) -> Option<String>;

    /// Closing frames built from the final aggregate.
    fn finish(&mut self, completion: &CanonicalCompletion) -> String;

    /// A mid-stream error frame.
    fn error(&mut self, err: &GatewayError) -> String;
}

enum Outbound {
    Frame(Bytes),
    /// Failure before any frame was sent; answered as a plain error response.
    Failed(GatewayError),
}

struct SharedEncoder<E> {
    encoder: E,
    sent_any: bool,
}

struct FrameForwarder<E> {
    shared: Arc<Mutex<SharedEncoder<E>>>,
    tx: mpsc::Sender<Outbound>,
}

#[async_trait]
impl<E: FrameEncoder> CompletionCallback for FrameForwarder<E> {
    async fn call(&self, completion: CanonicalCompletion) -> Result<(), CallbackError> {
        let frame = {
            let mut shared = self.shared.lock().await;
            let Some(frame) = shared.encoder.delta(&completion) else {
                return Ok(());
            };
            shared.sent_any = true;
            frame
        };
        self.tx
            .send(Outbound::Frame(Bytes::from(frame)))
            .await
            .map_err(|_| CallbackError("client disconnected".to_string()))
    }
}

/// Streaming flow.
///
/// Generation runs on its own task and hands frames to the response body
/// through a bounded channel, so a slow client slows the upstream read. If
/// the exchange fails before the first frame, the client gets an ordinary
/// JSON error with a matching status instead of an event stream.
pub(crate) async fn respond_streaming<E: FrameEncoder>(
    state: Arc<AppState>,
    routed: RoutedRequest,
    ingress: IngressApi,
    front_end: &'static str,
    encoder: E,
) -> Response {
    let (tx, mut rx) = mpsc::channel::<Outbound>(STREAM_CHANNEL_CAPACITY);
    let shared = Arc::new(Mutex::new(SharedEncoder {
        encoder,
        sent_any: false,
    }));
    let callbacks = StreamCallbacks::default().on_delta(FrameForwarder {
        shared: Arc::clone(&shared),
        tx: tx.clone(),
    });

    tokio::spawn(async move {
        let start = Instant::now();
        let result = generate(&state, &routed, callbacks).await;
        let mut shared = shared.lock().await;
        let outbound = match result {
            Ok(completion) => {
                log_request_complete(
                    front_end,
                    &routed.public_model,
                    true,
                    &completion.usage,
                    start,
                );
                Outbound::Frame(Bytes::from(shared.encoder.finish(&completion)))
            }
            Err(GatewayError::Callback(reason)) => {
                tracing::info!(front_end, model = %routed.public_model, reason = %reason, "stream aborted by client");
                return;
            }
            Err(err) => {
                tracing::warn!(front_end, model = %routed.public_model, error = %err, "stream failed");
                if shared.sent_any {
                    Outbound::Frame(Bytes::from(shared.encoder.error(&err)))
                } else {
                    Outbound::Failed(err)
                }
            }
        };
        shared.sent_any = true;
        drop(shared);
        let _ = tx.send(outbound).await;
    });

    let first = match rx.recv().await {
        Some(Outbound::Frame(frame)) => frame,
        Some(Outbound::Failed(err)) => return into_axum_response(&err, ingress),
        None => {
            return into_axum_response(
                &GatewayError::Internal("stream ended without a response".to_string()),
                ingress,
            )
        }
    };

    let rest = futures_util::stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(Outbound::Frame(frame)) => Some((Ok::<Bytes, Infallible>(frame), rx)),
            Some(Outbound::Failed(_)) | None => None,
        }
    });
    let body = futures_util::StreamExt::chain(
        futures_util::stream::once(async move { Ok::<Bytes, Infallible>(first) }),
        rest,
    );

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// JSON response with status 200.
pub(crate) fn json_response<T: serde::Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Body::from(body),
        )
            .into_response(),
        Err(err) => into_axum_response(
            &GatewayError::Internal(format!("failed to encode response: {err}")),
            IngressApi::OpenAiChat,
        ),
    }
}

/// Parse a JSON request body into the front end's wire type.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::InvalidRequest(format!("invalid JSON body: {err}")))
}
