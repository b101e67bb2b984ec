use std::time::Duration;

use http::header::RETRY_AFTER;
use http::{HeaderMap, StatusCode};

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(1);
const RETRY_AFTER_CAP: Duration = Duration::from_secs(30);

/// Retries of the initial upstream send, decided before any body byte is read.
///
/// Once a response has been accepted, nothing is retried: the stream belongs
/// to the pipeline and failures surface to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether `attempt` (zero-based) may be followed by another one.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Overloaded or rate-limited answers; a plain 500 is final.
    #[must_use]
    pub fn is_retriable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 503 | 529)
    }

    /// Connection-level failures where the request never reached a handler.
    #[must_use]
    pub fn is_retriable_transport(err: &reqwest::Error) -> bool {
        if err.is_connect() {
            return true;
        }
        let message = err.to_string().to_ascii_lowercase();
        ["connection reset", "connection closed", "broken pipe", "unexpected eof"]
            .iter()
            .any(|needle| message.contains(needle))
    }

    /// Doubling backoff from 100ms, capped at one second.
    #[must_use]
    pub fn backoff(attempt: u32) -> Duration {
        BACKOFF_BASE
            .saturating_mul(1_u32 << attempt.min(10))
            .min(BACKOFF_CAP)
    }

    /// The upstream's `Retry-After` seconds (capped) or the backoff.
    #[must_use]
    pub fn delay_after(headers: &HeaderMap, attempt: u32) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map_or_else(
                || Self::backoff(attempt),
                |secs| Duration::from_secs(secs).min(RETRY_AFTER_CAP),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(2);
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!RetryPolicy::new(0).allows(0));
    }

    #[test]
    fn test_only_overload_statuses_retry() {
        assert!(RetryPolicy::is_retriable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::is_retriable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!RetryPolicy::is_retriable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!RetryPolicy::is_retriable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_delay_prefers_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(RetryPolicy::delay_after(&headers, 0), Duration::from_millis(100));
        assert_eq!(RetryPolicy::delay_after(&headers, 1), Duration::from_millis(200));
        assert_eq!(RetryPolicy::delay_after(&headers, 8), Duration::from_secs(1));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(RetryPolicy::delay_after(&headers, 0), Duration::from_secs(3));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3600"));
        assert_eq!(RetryPolicy::delay_after(&headers, 0), Duration::from_secs(30));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(RetryPolicy::delay_after(&headers, 2), Duration::from_millis(400));
    }
}
