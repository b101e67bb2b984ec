#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use llmapi::config::{AppConfig, LlmConfig, ModelConfig, ProviderConfig};
use llmapi::routing::dispatch::dispatch_request;
use llmapi::state::AppState;

pub const CLIENT_KEY: &str = "client-key";

/// Serve `app` on an ephemeral local port.
pub async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

pub fn provider(name: &str, kind: &str, url: String) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        provider: kind.to_string(),
        url: Some(url),
        sk: "upstream-secret".to_string(),
        insecure: false,
    }
}

pub fn model(name: &str, actual: &str, provider: &str) -> ModelConfig {
    ModelConfig {
        name: name.to_string(),
        model: actual.to_string(),
        provider: provider.to_string(),
        max_token: None,
    }
}

pub fn build_state(providers: Vec<ProviderConfig>, models: Vec<ModelConfig>) -> Arc<AppState> {
    let config = AppConfig {
        tokens: vec![CLIENT_KEY.to_string()],
        llm: LlmConfig { providers, models },
        ..AppConfig::default()
    };
    Arc::new(AppState::new(config).expect("build state"))
}

/// Send one request through the dispatcher and collect the whole body.
pub async fn send(
    state: Arc<AppState>,
    uri: &str,
    auth: &[(&str, &str)],
    body: serde_json::Value,
) -> (StatusCode, String, String) {
    let (status, headers, body) = send_raw(state, uri, auth, body).await;
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        status,
        content_type,
        String::from_utf8(body.to_vec()).expect("utf-8 body"),
    )
}

/// Like [`send`], keeping response headers and the undecoded body bytes.
pub async fn send_raw(
    state: Arc<AppState>,
    uri: &str,
    headers: &[(&str, &str)],
    body: serde_json::Value,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(Body::from(serde_json::to_vec(&body).expect("serialize request")))
        .expect("build request");

    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    (status, headers, body)
}

pub fn bearer() -> [(&'static str, &'static str); 1] {
    [("authorization", "Bearer client-key")]
}

/// Payloads of every `data:` line in an SSE body.
pub fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// Names of every `event:` line in an SSE body.
pub fn sse_events(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .map(str::to_string)
        .collect()
}

/// An upstream response carrying a fixed SSE body.
pub fn sse_response(body: String) -> axum::response::Response {
    axum::response::Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from(body))
        .expect("build sse response")
}
