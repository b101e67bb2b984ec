use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "llmapi is running",
        "config": {
            "providers_count": state.model_router.provider_count(),
            "models_count": state.model_router.models().len(),
            "auth_enabled": !config.tokens.is_empty(),
            "log_level": config.log.level,
            "reasoning_markers": config.reasoning.markers,
        }
    }))
}
