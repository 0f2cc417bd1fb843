//! Scripted [`Transport`] for tests.
//!
//! Routes are matched in registration order against the request URL
//! (substring) and, for storage-RPC calls, the `method` field of the
//! body. Each route holds a FIFO of canned outcomes; the last outcome
//! repeats once the queue drains. Every executed request is recorded
//! so tests can assert on targets and payloads.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use havenchat_types::{HavenchatError, Result};
use serde_json::Value;

use crate::http::{HttpRequest, Transport, Upload};

// ---------------------------------------------------------------------------
// Recorded traffic
// ---------------------------------------------------------------------------

/// One request the mock has seen.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub url: String,
    pub params: Option<Value>,
    pub headers: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

struct Route {
    url_contains: String,
    method: Option<String>,
    outcomes: VecDeque<Result<Value>>,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        if !request.url.contains(&self.url_contains) {
            return false;
        }
        match &self.method {
            None => true,
            Some(method) => {
                request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("method"))
                    .and_then(Value::as_str)
                    == Some(method.as_str())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Scripted transport. Cloneable handles are unnecessary: share it
/// through an `Arc` like the production client.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route matched by URL substring.
    pub fn route(&self, url_contains: &str, outcomes: Vec<Result<Value>>) {
        self.push_route(url_contains, None, outcomes);
    }

    /// Registers a route matched by URL substring and storage-RPC
    /// method name.
    pub fn route_method(&self, url_contains: &str, method: &str, outcomes: Vec<Result<Value>>) {
        self.push_route(url_contains, Some(method.to_string()), outcomes);
    }

    fn push_route(&self, url_contains: &str, method: Option<String>, outcomes: Vec<Result<Value>>) {
        self.routes
            .lock()
            .expect("routes lock")
            .push(Route {
                url_contains: url_contains.to_string(),
                method,
                outcomes: outcomes.into_iter().collect(),
            });
    }

    /// All requests executed so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Requests whose URL contains the given fragment.
    pub fn requests_to(&self, url_contains: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(url_contains))
            .collect()
    }

    fn respond(&self, request: &HttpRequest) -> Result<Value> {
        let mut routes = self.routes.lock().expect("routes lock");
        for route in routes.iter_mut() {
            if !route.matches(request) {
                continue;
            }
            return match route.outcomes.len() {
                0 => Err(HavenchatError::generic(format!(
                    "mock route '{}' has no outcomes",
                    route.url_contains
                ))),
                // The last outcome repeats.
                1 => clone_outcome(&route.outcomes[0]),
                _ => route.outcomes.pop_front().expect("non-empty"),
            };
        }
        Err(HavenchatError::generic(format!(
            "no mock route matches {}",
            request.url
        )))
    }
}

fn clone_outcome(outcome: &Result<Value>) -> Result<Value> {
    match outcome {
        Ok(value) => Ok(value.clone()),
        Err(HavenchatError::HttpRequestFailed { status, body }) => {
            Err(HavenchatError::HttpRequestFailed {
                status: *status,
                body: body.clone(),
            })
        }
        Err(other) => Err(HavenchatError::generic(format!("mock error: {other}"))),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<Value> {
        self.requests.lock().expect("requests lock").push(RecordedRequest {
            url: request.url.clone(),
            params: request.params.clone(),
            headers: request.headers.clone(),
        });
        self.respond(&request)
    }

    async fn upload(&self, upload: Upload) -> Result<Value> {
        let request = HttpRequest::post(upload.url.clone(), Value::Null);
        self.requests.lock().expect("requests lock").push(RecordedRequest {
            url: upload.url.clone(),
            params: None,
            headers: upload.headers.clone(),
        });
        self.respond(&request)
    }
}
