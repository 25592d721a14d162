//! Throttle-aware retry with exponential backoff

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::config::RetrySettings;
use crate::error::SweepResult;

/// What to do with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Hand the response to the caller
    Done,
    /// Try again, optionally after a server-provided delay
    Retry(Option<Duration>),
}

/// Default classification: 429/502/503/504 are transient, honouring `Retry-After`
pub fn throttle_verdict(response: &HttpResponse) -> RetryVerdict {
    match response.status {
        429 | 502 | 503 | 504 => RetryVerdict::Retry(response.retry_after()),
        _ => RetryVerdict::Done,
    }
}

/// Retry behaviour for one run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(600),
            max_delay: Duration::from_secs(12),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy without any sleeping, for tests
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Send with the default throttle classification
    pub async fn send(&self, transport: &dyn HttpTransport, request: HttpRequest) -> SweepResult<HttpResponse> {
        self.send_with(transport, request, &throttle_verdict).await
    }

    /// Send, retrying while `classify` asks for it. When attempts run out the
    /// last response is returned as-is; transport errors are returned once
    /// they stop being transient or attempts are exhausted.
    pub async fn send_with(
        &self,
        transport: &dyn HttpTransport,
        request: HttpRequest,
        classify: &(dyn Fn(&HttpResponse) -> RetryVerdict + Send + Sync),
    ) -> SweepResult<HttpResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let server_delay = match transport.send(request.clone()).await {
                Ok(response) => match classify(&response) {
                    RetryVerdict::Done => return Ok(response),
                    RetryVerdict::Retry(_) if attempt >= self.max_attempts => {
                        warn!(
                            "{} {} still throttled after {} attempts (HTTP {})",
                            request.method, request.url, attempt, response.status
                        );
                        return Ok(response);
                    }
                    RetryVerdict::Retry(delay) => {
                        debug!(
                            "{} {} returned HTTP {} (attempt {}/{})",
                            request.method, request.url, response.status, attempt, self.max_attempts
                        );
                        delay
                    }
                },
                Err(error) => {
                    if !error.is_transient() || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    debug!(
                        "{} {} failed (attempt {}/{}): {}",
                        request.method, request.url, attempt, self.max_attempts, error
                    );
                    None
                }
            };

            let delay = server_delay.unwrap_or_else(|| self.backoff_delay(attempt));
            if !delay.is_zero() {
                debug!("Retrying in {:?}", delay);
                sleep(delay).await;
            }
        }
    }

    /// Exponential delay for the given attempt (1-based), capped, plus jitter
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = raw.min(self.max_delay);

        if self.jitter && !capped.is_zero() {
            let jitter_ms = rand::thread_rng().gen_range(0..=250u64);
            capped + Duration::from_millis(jitter_ms)
        } else {
            capped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockTransport;
    use reqwest::Method;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy { jitter: false, ..RetryPolicy::default() };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(600));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(2400));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(12));
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(12));
    }

    #[test]
    fn test_jitter_stays_small() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(600));
            assert!(delay <= Duration::from_millis(850));
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mock = MockTransport::new();
        mock.on_sequence(
            Method::GET,
            "/throttled",
            vec![
                HttpResponse::new(429, "slow down"),
                HttpResponse::new(503, "busy"),
                HttpResponse::new(200, "ok"),
            ],
        );

        let response = RetryPolicy::immediate(6)
            .send(&mock, HttpRequest::get("https://graph.test/throttled"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(mock.count(&Method::GET, "/throttled"), 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_response() {
        let mock = MockTransport::new();
        mock.on_sequence(Method::GET, "/always", vec![HttpResponse::new(503, "busy")]);

        let response = RetryPolicy::immediate(6)
            .send(&mock, HttpRequest::get("https://graph.test/always"))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(mock.count(&Method::GET, "/always"), 6);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mock = MockTransport::new();
        mock.on_sequence(Method::GET, "/bad", vec![HttpResponse::new(400, "bad")]);

        let response = RetryPolicy::immediate(6)
            .send(&mock, HttpRequest::get("https://graph.test/bad"))
            .await
            .unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(mock.count(&Method::GET, "/bad"), 1);
    }

    #[test]
    fn test_transport_errors_are_retried_then_returned() {
        let mock = MockTransport::new();
        mock.on_transport_error(Method::GET, "/down", "connection reset");

        let result = tokio_test::block_on(
            RetryPolicy::immediate(3).send(&mock, HttpRequest::get("https://graph.test/down")),
        );
        assert!(result.unwrap_err().is_transient());
        assert_eq!(mock.count(&Method::GET, "/down"), 3);
    }
}
