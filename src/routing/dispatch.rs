use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, ServiceExt};
use tower_http::compression::CompressionLayer;

use crate::api::{anthropic, health, llmapi, models, openai};
use crate::state::AppState;

const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteMatch {
    Health,
    Models,
    OpenAiChat,
    Anthropic,
    Chat,
    ChatStream,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching front-end handler.
///
/// Responses are gzip-compressed when the client sends
/// `Accept-Encoding: gzip`, except `text/event-stream` bodies and bodies
/// under 32 bytes, which go out as-is.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let router = tower::service_fn(move |request: Request<Body>| {
        route_request(Arc::clone(&state), Arc::clone(&base_path), request)
    });
    let response = CompressionLayer::new().layer(router).oneshot(request).await?;
    Ok(response.map(Body::new))
}

async fn route_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());
    tracing::debug!(method = %parts.method, path = parts.uri.path(), ?route, "dispatch");

    let response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Models => models::handler(State(state), &parts.headers).await,
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
        RouteMatch::OpenAiChat | RouteMatch::Anthropic | RouteMatch::Chat | RouteMatch::ChatStream => {
            let body_bytes = match read_request_body(body).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            let state = State(state);
            match route {
                RouteMatch::OpenAiChat => openai::handler(state, parts.headers, body_bytes).await,
                RouteMatch::Anthropic => anthropic::handler(state, parts.headers, body_bytes).await,
                RouteMatch::Chat => llmapi::chat_handler(state, parts.headers, body_bytes).await,
                _ => llmapi::chat_stream_handler(state, parts.headers, body_bytes).await,
            }
        }
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| {
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large (max 2MiB)",
            )
                .into_response()
        })
}

fn match_route(method: &Method, path: &str, base_path: &str) -> RouteMatch {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    let (route, expected) = match path {
        "/" => (RouteMatch::Health, Method::GET),
        "/v1/models" => (RouteMatch::Models, Method::GET),
        "/v1/chat/completions" | "/api/v1/openai/completions" => {
            (RouteMatch::OpenAiChat, Method::POST)
        }
        "/v1/messages" | "/api/v1/claude/messages" => (RouteMatch::Anthropic, Method::POST),
        "/api/v1/chat" => (RouteMatch::Chat, Method::POST),
        "/api/v1/chat/stream" => (RouteMatch::ChatStream, Method::POST),
        _ => return RouteMatch::NotFound,
    };
    if *method == expected {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}
