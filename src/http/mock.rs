//! Scripted transport for tests
//!
//! Routes are matched on method plus a URL fragment; when several fragments
//! match, the longest one wins (ties go to the route registered last).
//! Unmatched requests get a 404. Every request
//! is recorded so tests can assert on call counts and payloads.

use async_trait::async_trait;
use reqwest::Method;
use std::sync::{Mutex, MutexGuard};

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{SweepError, SweepResult};

type Handler = Box<dyn Fn(&HttpRequest) -> SweepResult<HttpResponse> + Send + Sync>;

struct Route {
    method: Method,
    fragment: String,
    handler: Handler,
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer matching requests with a handler
    pub fn on<F>(&self, method: Method, fragment: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.push(method, fragment, Box::new(move |request| Ok(handler(request))));
    }

    /// Answer with a fixed JSON body
    pub fn on_json(&self, method: Method, fragment: &str, status: u16, value: serde_json::Value) {
        self.on(method, fragment, move |_| HttpResponse::json(status, &value));
    }

    /// Answer with the given responses in order, repeating the last one
    pub fn on_sequence(&self, method: Method, fragment: &str, responses: Vec<HttpResponse>) {
        let queue = Mutex::new(responses);
        self.push(
            method,
            fragment,
            Box::new(move |_| {
                let mut queue = lock(&queue);
                match queue.len() {
                    0 => Ok(HttpResponse::new(500, "empty sequence")),
                    1 => Ok(queue[0].clone()),
                    _ => Ok(queue.remove(0)),
                }
            }),
        );
    }

    /// Fail matching requests below HTTP
    pub fn on_transport_error(&self, method: Method, fragment: &str, message: &str) {
        let message = message.to_string();
        self.push(
            method,
            fragment,
            Box::new(move |_| Err(SweepError::transport(message.clone()))),
        );
    }

    fn push(&self, method: Method, fragment: &str, handler: Handler) {
        lock(&self.routes).push(Route {
            method,
            fragment: fragment.to_string(),
            handler,
        });
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Requests with the given method whose URL contains `fragment`
    pub fn matching(&self, method: &Method, fragment: &str) -> Vec<HttpRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| &r.method == method && r.url.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn count(&self, method: &Method, fragment: &str) -> usize {
        self.matching(method, fragment).len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> SweepResult<HttpResponse> {
        lock(&self.requests).push(request.clone());

        let routes = lock(&self.routes);
        let route = routes
            .iter()
            .filter(|r| r.method == request.method && request.url.contains(&r.fragment))
            .max_by_key(|r| r.fragment.len());

        match route {
            Some(route) => (route.handler)(&request),
            None => Ok(HttpResponse::new(404, format!("no mock route for {} {}", request.method, request.url))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
