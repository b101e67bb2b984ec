use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::protocol::canonical::CanonicalUsage;

/// Map a config log level to an `EnvFilter` directive.
///
/// - "DISABLED" -> `None` (no subscriber installed)
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
#[must_use]
pub fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured level and format.
///
/// `RUST_LOG`, when set, overrides the configured level.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(err) = installed {
        eprintln!("tracing subscriber already installed: {err}");
    }
}

/// Log one finished request: model, token usage and latency.
pub fn log_request_complete(
    front_end: &str,
    model: &str,
    stream: bool,
    usage: &CanonicalUsage,
    start_time: Instant,
) {
    info!(
        front_end,
        model,
        stream,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        latency_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request complete"
    );
}
