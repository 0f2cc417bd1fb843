//! JSON-over-HTTPS primitive.
//!
//! One [`Transport`] seam with a production [`HttpClient`] behind it.
//! The client owns three long-lived `reqwest` pools:
//!
//! - **seed** — standard TLS validation, 20 s timeout
//! - **snode** — accepts any certificate and hostname, 20 s timeout
//! - **snode long-poll** — permissive like snode, 40 s read timeout
//!
//! Service nodes present self-signed certificates; trusting them
//! blindly is a deliberate decision confined to the snode pools. The
//! seed and open-group traffic always validates normally.
//!
//! # Failure contract
//!
//! - transport error → `HttpRequestFailed { status: 0, body: None }`
//! - non-2xx → `HttpRequestFailed { status, body }`
//! - 2xx with a non-JSON body → `{"result": <raw text>}`

use std::time::Duration;

use async_trait::async_trait;
use havenchat_types::config::NetworkConfig;
use havenchat_types::{HavenchatError, Result};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Verb / ConnectionPool
// ---------------------------------------------------------------------------

/// HTTP verb. GET and DELETE carry parameters in the query string;
/// PUT, POST and PATCH send `application/json` bodies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verb {
    Get,
    Put,
    Post,
    Patch,
    Delete,
}

impl Verb {
    fn as_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Put => reqwest::Method::PUT,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    /// Whether this verb carries parameters in the query string.
    pub fn uses_query(self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

/// Which connection pool a request runs on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionPool {
    /// Standard TLS validation. Seed and open-group traffic.
    Seed,
    /// Accepts any certificate. Storage-RPC traffic.
    Snode,
    /// Permissive like [`ConnectionPool::Snode`], 40 s read timeout.
    SnodeLongPoll,
}

// ---------------------------------------------------------------------------
// HttpRequest
// ---------------------------------------------------------------------------

/// One outbound HTTP call.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub verb: Verb,
    pub url: String,
    /// Query pairs (GET/DELETE) or JSON body (PUT/POST/PATCH).
    pub params: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub pool: ConnectionPool,
}

impl HttpRequest {
    /// A GET on the seed pool.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Verb::Get, url)
    }

    /// A POST on the seed pool.
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Verb::Post, url).with_params(body)
    }

    /// A bare request with the given verb on the seed pool.
    pub fn new(verb: Verb, url: impl Into<String>) -> Self {
        Self {
            verb,
            url: url.into(),
            params: None,
            headers: Vec::new(),
            pool: ConnectionPool::Seed,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_pool(mut self, pool: ConnectionPool) -> Self {
        self.pool = pool;
        self
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The HTTP seam everything above the wire goes through. Production
/// code uses [`HttpClient`]; tests script a mock implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes one request and decodes the response per the failure
    /// contract.
    async fn execute(&self, request: HttpRequest) -> Result<Value>;

    /// Uploads one file as `multipart/form-data` and decodes the
    /// response like [`execute`](Self::execute). Always POSTs on the
    /// seed pool (uploads target open-group servers).
    async fn upload(&self, upload: Upload) -> Result<Value>;
}

/// A multipart file upload.
#[derive(Clone, Debug)]
pub struct Upload {
    pub url: String,
    /// Form field name, e.g. `avatar` or `content`.
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// Production [`Transport`] backed by `reqwest`.
pub struct HttpClient {
    seed: reqwest::Client,
    snode: reqwest::Client,
    snode_long_poll: reqwest::Client,
}

impl HttpClient {
    /// Builds the three connection pools from the config timeouts.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let long_poll_timeout = Duration::from_secs(config.long_poll_timeout_secs);

        let seed = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(client_build_error)?;

        // Service nodes use self-signed certificates; this is the only
        // permissive client in the process.
        let snode = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(client_build_error)?;

        let snode_long_poll = reqwest::Client::builder()
            .timeout(long_poll_timeout)
            .connect_timeout(request_timeout)
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(client_build_error)?;

        Ok(Self {
            seed,
            snode,
            snode_long_poll,
        })
    }

    fn pool(&self, pool: ConnectionPool) -> &reqwest::Client {
        match pool {
            ConnectionPool::Seed => &self.seed,
            ConnectionPool::Snode => &self.snode,
            ConnectionPool::SnodeLongPoll => &self.snode_long_poll,
        }
    }

    async fn decode_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status().as_u16();
        // Read the body fully on every path so the connection returns
        // to the pool.
        let text = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return Err(HavenchatError::HttpRequestFailed {
                status,
                body: if text.is_empty() { None } else { Some(text) },
            });
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(_) => Ok(json!({ "result": text })),
        }
    }
}

fn client_build_error(e: reqwest::Error) -> HavenchatError {
    HavenchatError::Generic {
        reason: format!("failed to build HTTP client: {e}"),
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<Value> {
        let client = self.pool(request.pool);
        let mut builder = client.request(request.verb.as_method(), &request.url);

        if let Some(params) = &request.params {
            if request.verb.uses_query() {
                builder = builder.query(&query_pairs(params));
            } else {
                builder = builder.json(params);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::debug!(url = %request.url, %e, "transport failure");
            HavenchatError::HttpRequestFailed {
                status: 0,
                body: None,
            }
        })?;

        Self::decode_response(response).await
    }

    async fn upload(&self, upload: Upload) -> Result<Value> {
        let part = reqwest::multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|e| HavenchatError::Generic {
                reason: format!("invalid upload content type: {e}"),
            })?;
        let form = reqwest::multipart::Form::new().part(upload.field, part);

        let mut builder = self.seed.post(&upload.url).multipart(form);
        for (name, value) in &upload.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::debug!(url = %upload.url, %e, "upload transport failure");
            HavenchatError::HttpRequestFailed {
                status: 0,
                body: None,
            }
        })?;

        Self::decode_response(response).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Flattens a JSON object into query pairs. Non-string scalars are
/// rendered with their JSON representation.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(map) = params.as_object() else {
        return Vec::new();
    };
    map.iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
