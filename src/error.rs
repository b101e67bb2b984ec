use crate::config::ConfigError;
use crate::pipeline::PipelineError;
use crate::protocol::canonical::IngressApi;
use crate::protocol::error_shapes::error_payload;
use crate::stream::DecodeError;

/// Crate-wide error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream decode error: {0}")]
    Decode(String),
    #[error("Protocol translation error: {0}")]
    Translation(String),
    #[error("Stream consumer failed: {0}")]
    Callback(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::ModelNotFound(_) => ErrorCategory::NotFound,
            GatewayError::Config(_)
            | GatewayError::Transport(_)
            | GatewayError::Decode(_)
            | GatewayError::Translation(_)
            | GatewayError::Callback(_)
            | GatewayError::Cancelled
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
            GatewayError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }
}

impl From<DecodeError> for GatewayError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Cancelled => GatewayError::Cancelled,
            DecodeError::Transport(message) => GatewayError::Transport(message),
            other => GatewayError::Decode(other.to_string()),
        }
    }
}

impl From<PipelineError> for GatewayError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(decode) => decode.into(),
            PipelineError::Accumulate(inner) => GatewayError::Translation(inner.to_string()),
            PipelineError::Callback(inner) => GatewayError::Callback(inner.0),
            PipelineError::Upstream(message) => GatewayError::Upstream {
                status: 502,
                message,
            },
            PipelineError::Unfinished | PipelineError::EmptyResponse => {
                GatewayError::Decode(err.to_string())
            }
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => http::StatusCode::NOT_FOUND,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ServerError | ErrorCategory::Unknown => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Format an error for a given front end, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(
    err: &GatewayError,
    ingress: IngressApi,
) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let message = err.to_string();

    (status, error_payload(ingress, cat, &message))
}

/// Convert a `GatewayError` into an axum response for a specific front end.
#[must_use]
pub fn into_axum_response(err: &GatewayError, ingress: IngressApi) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err, ingress);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self, IngressApi::OpenAiChat)
    }
}
