//! The HTTP capability (spec §6): "the action receives an HTTP client
//! exposing, at minimum, get/post/put/patch/delete/head/options, request/
//! response capture for issue formatting, and a history for optional
//! tracing." The core does not mandate a specific implementation — this
//! module defines the capability trait plus one reference `reqwest`-backed
//! client, mirroring the teacher's reuse of a single pooled `reqwest::Client`
//! (`executors/http.rs::HttpExecutor::new`) across requests.
//!
//! The wire implementation itself, auth helpers, and assertion helpers are
//! explicitly out of scope (spec §1) — this reference client exists so the
//! runner and CLI in this crate are runnable end-to-end without requiring a
//! caller to bring their own capability for every example and test.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{ErrorContext, VenomError, VenomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

/// A recorded request/response pair, kept in the client's `history` for
/// tracing (spec §6) and reused by the issue formatter (§4.7) to build
/// request/response snapshots without re-querying the wire.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<Value>,
    pub status: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<Value>,
    pub duration_ms: f64,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl HttpResponse {
    /// HTTP status class 4xx/5xx, per spec §4.7's failure classification:
    /// "a response whose `status_code` indicates failure (client/server
    /// error class per HTTP)".
    pub fn is_failure_status(&self) -> bool {
        self.status >= 400
    }
}

/// The capability a step's action receives. Implementations are expected
/// to be cheap to share across steps within one journey invocation (the
/// reference client pools its connections) but are NOT required to be
/// `Sync` across concurrent journeys — each load-engine worker owns its
/// own instance (spec §5).
#[async_trait]
pub trait HttpCapability: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        headers: Option<HashMap<String, String>>,
    ) -> VenomResult<HttpResponse>;

    async fn get(&self, url: &str) -> VenomResult<HttpResponse> {
        self.request(Method::Get, url, None, None).await
    }

    async fn post(&self, url: &str, body: Option<Value>) -> VenomResult<HttpResponse> {
        self.request(Method::Post, url, body, None).await
    }

    async fn put(&self, url: &str, body: Option<Value>) -> VenomResult<HttpResponse> {
        self.request(Method::Put, url, body, None).await
    }

    async fn patch(&self, url: &str, body: Option<Value>) -> VenomResult<HttpResponse> {
        self.request(Method::Patch, url, body, None).await
    }

    async fn delete(&self, url: &str) -> VenomResult<HttpResponse> {
        self.request(Method::Delete, url, None, None).await
    }

    async fn head(&self, url: &str) -> VenomResult<HttpResponse> {
        self.request(Method::Head, url, None, None).await
    }

    async fn options(&self, url: &str) -> VenomResult<HttpResponse> {
        self.request(Method::Options, url, None, None).await
    }

    /// The exchanges recorded so far, oldest first. Used by the issue
    /// formatter to build request/response snapshots and by callers who
    /// want to trace a journey's wire activity (spec §6).
    fn history(&self) -> Vec<HttpExchange>;
}

/// Reference implementation backed by a single pooled `reqwest::Client`.
/// Headers subset captured per exchange follows the teacher's Content-Type
/// emphasis (`runner/formatter.py::format_step_failure` singles out
/// Content-Type as "most important").
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    base_url: Option<String>,
    history: Mutex<Vec<HttpExchange>>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: None,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Some(base_url.into()),
            history: Mutex::new(Vec::new()),
        }
    }

    fn full_url(&self, url: &str) -> String {
        match (&self.base_url, url.starts_with("http://") || url.starts_with("https://")) {
            (Some(base), false) => format!("{}{}", base.trim_end_matches('/'), url),
            _ => url.to_string(),
        }
    }

    fn headers_subset(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for key in ["content-type", "location", "retry-after", "x-request-id"] {
            if let Some(value) = headers.get(key) {
                if let Ok(s) = value.to_str() {
                    out.insert(key.to_string(), s.to_string());
                }
            }
        }
        out
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpCapability for ReqwestHttpClient {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        headers: Option<HashMap<String, String>>,
    ) -> VenomResult<HttpResponse> {
        let full = self.full_url(url);
        let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .expect("method names are all valid HTTP tokens");
        let mut builder = self.client.request(reqwest_method, &full);

        if let Some(headers) = &headers {
            for (k, v) in headers {
                builder = builder.header(k, v);
            }
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| classify_reqwest_error(e, &full))?;
        let status = response.status().as_u16();
        let response_headers = Self::headers_subset(response.headers());
        let text = response.text().await.unwrap_or_default();
        let response_body = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok().or(Some(Value::String(text)))
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let request_headers = headers.unwrap_or_default();
        self.history.lock().expect("lock poisoned").push(HttpExchange {
            method: method.as_str().to_string(),
            url: full,
            request_headers,
            request_body: body,
            status,
            response_headers: response_headers.clone(),
            response_body: response_body.clone(),
            duration_ms,
        });

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body: response_body,
        })
    }

    fn history(&self) -> Vec<HttpExchange> {
        self.history.lock().expect("lock poisoned").clone()
    }
}

/// Classifies a `reqwest` transport error into the §7 connection error
/// family, preserving enough context for the retry policy's classifier and
/// the issue formatter's suggestion lookup to key off of.
fn classify_reqwest_error(err: reqwest::Error, url: &str) -> VenomError {
    let context = ErrorContext::new().with_request(url.to_string());
    if err.is_timeout() {
        VenomError::ConnectionTimeout {
            elapsed: Duration::default(),
            context,
        }
    } else if err.is_connect() {
        VenomError::ConnectionRefused { context }
    } else {
        VenomError::ConnectionFailed {
            message: err.to_string(),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_status_classifies_4xx_and_5xx() {
        let ok = HttpResponse { status: 200, headers: HashMap::new(), body: None };
        let client_err = HttpResponse { status: 404, headers: HashMap::new(), body: None };
        let server_err = HttpResponse { status: 503, headers: HashMap::new(), body: None };
        assert!(!ok.is_failure_status());
        assert!(client_err.is_failure_status());
        assert!(server_err.is_failure_status());
    }

    #[test]
    fn base_url_is_joined_with_relative_paths() {
        let client = ReqwestHttpClient::with_base_url("https://api.example.com");
        assert_eq!(client.full_url("/users"), "https://api.example.com/users");
        assert_eq!(
            client.full_url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }
}
