use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;

use crate::api::common::json_response;
use crate::error::into_axum_response;
use crate::protocol::canonical::IngressApi;
use crate::state::AppState;

/// Fixed `created` stamp; configured models have no creation time.
const MODEL_CREATED: u64 = 1_677_610_602;

#[derive(Debug, Serialize)]
struct ModelObject<'a> {
    id: &'a str,
    object: &'static str,
    created: u64,
    owned_by: &'a str,
}

#[derive(Debug, Serialize)]
struct ModelList<'a> {
    object: &'static str,
    data: Vec<ModelObject<'a>>,
}

/// List configured models in `OpenAI` format.
pub async fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    const INGRESS: IngressApi = IngressApi::OpenAiChat;
    if let Err(err) = state.authenticate(INGRESS, headers) {
        return into_axum_response(&err, INGRESS);
    }

    let data = state
        .model_router
        .models()
        .iter()
        .map(|model| ModelObject {
            id: &model.name,
            object: "model",
            created: MODEL_CREATED,
            owned_by: &model.provider,
        })
        .collect();
    json_response(&ModelList {
        object: "list",
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, LlmConfig, ModelConfig, ProviderConfig};

    fn state() -> Arc<AppState> {
        let config = AppConfig {
            tokens: vec!["test-key".into()],
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    name: "svc_one".into(),
                    provider: "openai".into(),
                    url: Some("https://api.example.com/v1".into()),
                    sk: "k1".into(),
                    insecure: false,
                }],
                models: vec![
                    ModelConfig {
                        name: "gpt-4o".into(),
                        model: String::new(),
                        provider: "svc_one".into(),
                        max_token: None,
                    },
                    ModelConfig {
                        name: "mini".into(),
                        model: "gpt-4o-mini".into(),
                        provider: "svc_one".into(),
                        max_token: Some(512),
                    },
                ],
            },
            ..AppConfig::default()
        };
        Arc::new(AppState::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_handler_lists_configured_models() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer test-key".parse().unwrap());
        let response = handler(State(state()), &headers).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["object"], "list");
        let data = body["data"].as_array().unwrap();

        let ids: Vec<&str> = data.iter().map(|m| m["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["gpt-4o", "mini"]);
        for m in data {
            assert_eq!(m["object"], "model");
            assert_eq!(m["owned_by"], "svc_one");
            assert_eq!(m["created"], 1_677_610_602);
        }
    }

    #[tokio::test]
    async fn test_handler_requires_token() {
        let response = handler(State(state()), &HeaderMap::new()).await;
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
