//! HTTP plumbing shared by the Graph and EWS adapters
//!
//! Adapters never touch `reqwest` directly. They build an [`HttpRequest`],
//! hand it to an [`HttpTransport`] (usually through [`RetryPolicy`]) and read
//! the buffered [`HttpResponse`]. This keeps throttling, tracing and tests
//! independent of the protocol code.

pub mod mock;
pub mod retry;
pub mod trace;

pub use retry::{RetryPolicy, RetryVerdict};
pub use trace::TracingTransport;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SweepError, SweepResult};

/// Credentials attached to a single request
#[derive(Clone, PartialEq, Eq)]
pub enum RequestAuth {
    Bearer(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestAuth::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            RequestAuth::Basic { username, .. } => write!(f, "Basic({}, <redacted>)", username),
        }
    }
}

/// Fully buffered outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub auth: Option<RequestAuth>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            auth: None,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn auth(mut self, auth: Option<RequestAuth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        let body = value.to_string();
        self.header("Content-Type", "application/json").body(body)
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Value of a request header, matched case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Fully buffered response; header names are lower-cased
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Delay requested by the server, in seconds or as an HTTP date
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header("retry-after")?.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
        Some(delta.to_std().unwrap_or(Duration::ZERO))
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> SweepResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| SweepError::protocol(format!("unexpected JSON payload (HTTP {}): {}", self.status, e)))
    }
}

/// Anything that can execute a buffered HTTP exchange
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> SweepResult<HttpResponse>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> SweepResult<HttpResponse> {
        (**self).send(request).await
    }
}

/// Production transport on top of a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> SweepResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .user_agent(concat!("mailsweep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SweepError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> SweepResult<HttpResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.auth {
            Some(RequestAuth::Bearer(token)) => builder.bearer_auth(token),
            Some(RequestAuth::Basic { username, password }) => builder.basic_auth(username, Some(password)),
            None => builder,
        };
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse { status, headers, body })
    }
}

/// Transports handed to workers at task start, one per worker slot
#[derive(Clone)]
pub struct ClientPool {
    transports: Vec<Arc<dyn HttpTransport>>,
}

impl ClientPool {
    /// Build `size` independent transports from a factory
    pub fn new<F>(size: usize, factory: F) -> SweepResult<Self>
    where
        F: Fn() -> SweepResult<Arc<dyn HttpTransport>>,
    {
        let transports = (0..size.max(1)).map(|_| factory()).collect::<SweepResult<Vec<_>>>()?;
        Ok(Self { transports })
    }

    /// Share one transport across every slot (tests, single mailbox runs)
    pub fn shared(transport: Arc<dyn HttpTransport>, size: usize) -> Self {
        Self {
            transports: vec![transport; size.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Transport owned by a worker slot
    pub fn checkout(&self, slot: usize) -> Arc<dyn HttpTransport> {
        self.transports[slot % self.transports.len()].clone()
    }
}
