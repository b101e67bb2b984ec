mod common;

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};

use common::{bearer, build_state, model, provider, send, spawn_upstream, sse_data};

/// Split `body` at fixed byte offsets so array elements straddle reads.
fn chunked(body: &str, cut: usize) -> Response {
    let pieces: Vec<Result<Bytes, Infallible>> = body
        .as_bytes()
        .chunks(cut)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect();
    Response::builder()
        .header("content-type", "application/json")
        .body(Body::from_stream(futures_util::stream::iter(pieces)))
        .unwrap()
}

fn stream_body() -> String {
    let elements = [
        json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [
            {"text": "compare ", "thought": true}
        ]}}]}),
        json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [
            {"text": "options", "thought": true, "thoughtSignature": "c2ln"}
        ]}}]}),
        json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [
            {"text": "Use "}
        ]}}]}),
        json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [
            {"text": "Rust."}
        ]}, "finishReason": "STOP"}],
         "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6, "totalTokenCount": 10},
         "modelVersion": "gemini-x"}),
    ];
    let items: Vec<String> = elements.iter().map(Value::to_string).collect();
    format!("[{}\n]", items.join(",\r\n"))
}

#[tokio::test]
async fn test_stream_reads_json_array_body() {
    let app = Router::new().fallback(|uri: Uri, headers: HeaderMap, Json(body): Json<Value>| async move {
        assert_eq!(uri.path(), "/v1beta/models/gemini-x:streamGenerateContent");
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "upstream-secret");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "which language?");
        chunked(&stream_body(), 7)
    });
    let (base, server) = spawn_upstream(app).await;
    let state = build_state(
        vec![provider("gem", "google", format!("{base}/v1beta"))],
        vec![model("gemini", "gemini-x", "gem")],
    );

    let (status, _, body) = send(
        state,
        "/v1/chat/completions",
        &bearer(),
        json!({
            "model": "gemini",
            "stream": true,
            "messages": [{"role": "user", "content": "which language?"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = sse_data(&body);
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut usage = Value::Null;
    for frame in &frames[..frames.len() - 1] {
        let chunk: Value = serde_json::from_str(frame).unwrap();
        let delta = &chunk["choices"][0]["delta"];
        content.push_str(delta["content"].as_str().unwrap_or_default());
        reasoning.push_str(delta["reasoning_content"].as_str().unwrap_or_default());
        if !chunk["usage"].is_null() {
            usage = chunk["usage"].clone();
        }
    }
    assert_eq!(reasoning, "compare options");
    assert_eq!(content, "Use Rust.");
    assert_eq!(usage["total_tokens"], 10);

    server.abort();
}

#[tokio::test]
async fn test_non_stream_function_call_gets_an_id() {
    let app = Router::new().fallback(|uri: Uri| async move {
        assert_eq!(uri.path(), "/v1beta/models/gemini-x:generateContent");
        Json(json!({
            "candidates": [{"index": 0, "content": {"role": "model", "parts": [
                {"functionCall": {"name": "lookup", "args": {"q": "rust"}}}
            ]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        }))
    });
    let (base, server) = spawn_upstream(app).await;
    let state = build_state(
        vec![provider("gem", "google", format!("{base}/v1beta"))],
        vec![model("gemini", "gemini-x", "gem")],
    );

    let (status, _, body) = send(
        state,
        "/v1/chat/completions",
        &bearer(),
        json!({"model": "gemini", "messages": [{"role": "user", "content": "search"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payload: Value = serde_json::from_str(&body).unwrap();
    let call = &payload["choices"][0]["message"]["tool_calls"][0];
    assert!(!call["id"].as_str().unwrap().is_empty());
    assert_eq!(call["function"]["name"], "lookup");
    assert_eq!(payload["choices"][0]["finish_reason"], "tool_calls");

    server.abort();
}

#[tokio::test]
async fn test_streamed_error_element_fails_request() {
    let app = Router::new().fallback(|| async {
        chunked(
            &json!([{"error": {"code": 500, "message": "backend overloaded", "status": "INTERNAL"}}])
                .to_string(),
            5,
        )
    });
    let (base, server) = spawn_upstream(app).await;
    let state = build_state(
        vec![provider("gem", "google", format!("{base}/v1beta"))],
        vec![model("gemini", "gemini-x", "gem")],
    );

    let (status, _, body) = send(
        state,
        "/v1/chat/completions",
        &bearer(),
        json!({"model": "gemini", "stream": true, "messages": [{"role": "user", "content": "x"}]}),
    )
    .await;
    assert!(status.is_server_error());
    let payload: Value = serde_json::from_str(&body).unwrap();
    assert!(payload["error"]["message"]
        .as_str()
        .unwrap()
        .contains("backend overloaded"));

    server.abort();
}
