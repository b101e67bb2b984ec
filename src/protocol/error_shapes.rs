//! Error bodies in each front end's native shape.

use serde_json::{json, Value};

use crate::error::ErrorCategory;
use crate::protocol::canonical::IngressApi;

/// Vendor strings for one category: `OpenAI` type, `OpenAI` code, Anthropic type.
struct ErrorNames {
    openai_type: &'static str,
    code: &'static str,
    anthropic_type: &'static str,
}

fn names(cat: ErrorCategory) -> ErrorNames {
    let (openai_type, code, anthropic_type) = match cat {
        ErrorCategory::InvalidRequest => (
            "invalid_request_error",
            "invalid_request",
            "invalid_request_error",
        ),
        ErrorCategory::NotFound => ("invalid_request_error", "model_not_found", "not_found_error"),
        ErrorCategory::Authentication => (
            "authentication_error",
            "invalid_api_key",
            "authentication_error",
        ),
        ErrorCategory::Permission => ("permission_error", "permission_denied", "permission_error"),
        ErrorCategory::RateLimit => ("rate_limit_error", "rate_limit_exceeded", "rate_limit_error"),
        ErrorCategory::ServerError | ErrorCategory::Unknown => {
            ("server_error", "server_error", "api_error")
        }
    };
    ErrorNames {
        openai_type,
        code,
        anthropic_type,
    }
}

/// Short machine-readable code, shared by the `OpenAI` and internal shapes.
#[must_use]
pub(crate) fn error_code(cat: ErrorCategory) -> &'static str {
    names(cat).code
}

/// Error body for `ingress`.
///
/// - `OpenAI`: `{"error":{"message","type","code","param"}}`
/// - Anthropic: `{"type":"error","error":{"type","message"}}`
/// - internal RPC: `{"error":{"code","message"}}`, the `ChatResponse` error field
#[must_use]
pub(crate) fn error_payload(ingress: IngressApi, cat: ErrorCategory, message: &str) -> Value {
    let names = names(cat);
    match ingress {
        IngressApi::OpenAiChat => json!({
            "error": {
                "message": message,
                "type": names.openai_type,
                "code": names.code,
                "param": null,
            }
        }),
        IngressApi::Anthropic => json!({
            "type": "error",
            "error": {
                "type": names.anthropic_type,
                "message": message,
            }
        }),
        IngressApi::Llmapi => json!({
            "error": {
                "code": names.code,
                "message": message,
            }
        }),
    }
}
