use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::GatewayError;

use super::retry_policy::RetryPolicy;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BODY_MAX_CHARS: usize = 512;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    accept_invalid_certs: bool,
) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Shared HTTP client pool for upstream providers.
///
/// Two lazily built clients exist: one verifying TLS certificates and one for
/// providers configured as `insecure`. The request deadline is not a client
/// setting; callers pass a [`CancellationToken`] that fires on timeout.
pub struct HttpTransport {
    verified: OnceLock<reqwest::Client>,
    unverified: OnceLock<reqwest::Client>,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        Self {
            verified: OnceLock::new(),
            unverified: OnceLock::new(),
            pool_max_idle_per_host: config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            retry: RetryPolicy::new(config.upstream_retries),
        }
    }

    fn client(&self, insecure: bool) -> &reqwest::Client {
        let cell = if insecure {
            &self.unverified
        } else {
            &self.verified
        };
        cell.get_or_init(|| {
            match build_reqwest_client(self.pool_max_idle_per_host, self.pool_idle_timeout, insecure)
            {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(error = %err, "failed to build configured reqwest client, falling back to default client");
                    reqwest::Client::new()
                }
            }
        })
    }

    /// POST a JSON body and return the response once its status is a success.
    ///
    /// Connection failures and `429`/`503`/`529` answers are retried up to
    /// `upstream_retries` times; nothing has been read from the body then.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Transport`] when the request cannot be sent,
    /// [`GatewayError::Upstream`] for a non-success status (with the message
    /// taken from the error body) and [`GatewayError::Cancelled`] when
    /// `cancel` fires first.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &http::HeaderMap,
        body: Bytes,
        insecure: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, GatewayError> {
        let client = self.client(insecure);
        let mut attempt = 0;
        loop {
            let request = client
                .post(url)
                .headers(headers.clone())
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body.clone());

            match cancellable(cancel, request.send()).await? {
                Ok(response) => {
                    let status = response.status();
                    if self.retry.allows(attempt) && RetryPolicy::is_retriable_status(status) {
                        let delay = RetryPolicy::delay_after(response.headers(), attempt);
                        tracing::debug!(
                            status = status.as_u16(),
                            retry_attempt = attempt + 1,
                            delay_ms = delay.as_millis(),
                            "retrying upstream request after retriable status"
                        );
                        drop(response);
                        cancellable(cancel, tokio::time::sleep(delay)).await?;
                        attempt += 1;
                        continue;
                    }
                    if !status.is_success() {
                        let body = cancellable(cancel, response.bytes())
                            .await?
                            .unwrap_or_default();
                        let message = upstream_error_message(&body);
                        tracing::warn!(status = status.as_u16(), error = %message, url, "upstream rejected request");
                        return Err(GatewayError::Upstream {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    return Ok(response);
                }
                Err(err) => {
                    let message = err.to_string();
                    if !self.retry.allows(attempt) || !RetryPolicy::is_retriable_transport(&err) {
                        tracing::error!(error = %message, url, "upstream request failed");
                        return Err(GatewayError::Transport(message));
                    }
                    let delay = RetryPolicy::backoff(attempt);
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %message,
                        "retrying upstream request after transport error"
                    );
                    cancellable(cancel, tokio::time::sleep(delay)).await?;
                    attempt += 1;
                }
            }
        }
    }
}

/// Race `future` against `cancel`.
///
/// # Errors
///
/// [`GatewayError::Cancelled`] when the token fires first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, future: F) -> Result<T, GatewayError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GatewayError::Cancelled),
        value = future => Ok(value),
    }
}

/// Read a whole (non-streaming) response body as JSON.
///
/// # Errors
///
/// [`GatewayError::Transport`] when the body cannot be read,
/// [`GatewayError::Translation`] when it is not the expected JSON, and
/// [`GatewayError::Cancelled`] when `cancel` fires first.
pub async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<T, GatewayError> {
    let body = cancellable(cancel, response.bytes())
        .await?
        .map_err(|err| GatewayError::Transport(err.to_string()))?;
    serde_json::from_slice(&body)
        .map_err(|err| GatewayError::Translation(format!("invalid upstream response: {err}")))
}

/// Best-effort human message from an upstream error body.
///
/// Understands `{"error":{"message":..}}`, `{"error":".."}` and
/// `{"message":..}`; anything else is returned as (truncated) text.
#[must_use]
pub fn upstream_error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("error").filter(|error| error.is_string()))
            .or_else(|| value.get("message"))
            .and_then(serde_json::Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty error body".to_string();
    }
    text.chars().take(ERROR_BODY_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_are_lazy_and_separate() {
        let transport = HttpTransport::new(&ServerConfig::default());
        assert!(transport.verified.get().is_none());
        assert!(transport.unverified.get().is_none());

        let _ = transport.client(false);
        assert!(transport.verified.get().is_some());
        assert!(transport.unverified.get().is_none());

        let _ = transport.client(true);
        assert!(transport.unverified.get().is_some());
    }

    #[test]
    fn test_zero_idle_timeout_disables_expiry() {
        let transport = HttpTransport::new(&ServerConfig {
            http_pool_idle_timeout_secs: 0,
            ..ServerConfig::default()
        });
        assert_eq!(transport.pool_idle_timeout, None);
    }

    #[test]
    fn test_upstream_error_message_shapes() {
        assert_eq!(
            upstream_error_message(br#"{"error":{"message":"bad key","type":"x"}}"#),
            "bad key"
        );
        assert_eq!(upstream_error_message(br#"{"error":"nope"}"#), "nope");
        assert_eq!(upstream_error_message(br#"{"message":"gone"}"#), "gone");
        assert_eq!(upstream_error_message(b"  plain failure \n"), "plain failure");
        assert_eq!(upstream_error_message(b""), "empty error body");
        assert_eq!(
            upstream_error_message("x".repeat(2_000).as_bytes()).len(),
            ERROR_BODY_MAX_CHARS
        );
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { 1 }).await;
        assert_eq!(result, Err(GatewayError::Cancelled));

        let live = CancellationToken::new();
        assert_eq!(cancellable(&live, async { 2 }).await, Ok(2));
    }
}
