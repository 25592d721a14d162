use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::SweepResult;

/// Longest body excerpt written to the trace log
const MAX_TRACE_BODY: usize = 4000;

/// Logs every exchange of the wrapped transport.
///
/// Request lines go to `debug`, bodies to `trace`. Credentials are never
/// logged: `RequestAuth` is skipped and `Authorization` headers are redacted.
pub struct TracingTransport {
    inner: Arc<dyn HttpTransport>,
}

impl TracingTransport {
    pub fn new(inner: Arc<dyn HttpTransport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl HttpTransport for TracingTransport {
    async fn send(&self, request: HttpRequest) -> SweepResult<HttpResponse> {
        let method = request.method.clone();
        let url = request.url.clone();

        if tracing::enabled!(target: "mailsweep::http", tracing::Level::TRACE) {
            let headers: Vec<String> = request
                .headers
                .iter()
                .map(|(k, v)| {
                    if k.eq_ignore_ascii_case("authorization") {
                        format!("{}: <redacted>", k)
                    } else {
                        format!("{}: {}", k, v)
                    }
                })
                .collect();
            trace!(target: "mailsweep::http", "> {} {} [{}]", method, url, headers.join("; "));
            if let Some(body) = request.body.as_deref() {
                trace!(target: "mailsweep::http", "> {}", excerpt(body));
            }
        }

        let started = Instant::now();
        let result = self.inner.send(request).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => {
                debug!(target: "mailsweep::http", "{} {} -> {} in {:?}", method, url, response.status, elapsed);
                trace!(target: "mailsweep::http", "< {}", excerpt(&response.body));
            }
            Err(e) => {
                debug!(target: "mailsweep::http", "{} {} failed after {:?}: {}", method, url, elapsed, e);
            }
        }

        result
    }
}

fn excerpt(body: &str) -> String {
    if body.chars().count() <= MAX_TRACE_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_TRACE_BODY).collect();
        format!("{}... ({} bytes)", cut, body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockTransport;
    use reqwest::Method;

    #[tokio::test]
    async fn test_passes_exchange_through() {
        let mock = Arc::new(MockTransport::new());
        mock.on_sequence(Method::GET, "/me", vec![HttpResponse::new(200, "{}")]);

        let traced = TracingTransport::new(mock.clone());
        let response = traced
            .send(HttpRequest::get("https://graph.test/me").header("Authorization", "Bearer abc"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(mock.requests().len(), 1);
        assert_eq!(mock.requests()[0].header_value("authorization"), Some("Bearer abc"));
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(MAX_TRACE_BODY + 10);
        assert!(excerpt(&long).ends_with("bytes)"));
        assert_eq!(excerpt("short"), "short");
    }
}
