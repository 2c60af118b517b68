//! Requests, responses and the callbacks that connect them.
//!
//! # Design
//! A request is plain data built with a small builder and never changes after
//! it is submitted. The caller learns the outcome through an
//! [`HttpClientCallbacks`] object shared behind an `Arc`, so a single callbacks
//! value can serve thousands of requests. `on_response` is called exactly
//! once per submitted request, on the thread driving the client.

use std::fmt;
use std::time::Duration;

use crate::error::ErrorCode;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered key/value pairs used for query parameters and headers.
pub type RestParams = Vec<(String, String)>;

/// A request body together with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeContent {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl MimeContent {
    pub fn new(body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.to_string(),
        }
    }
}

/// An HTTP request described as plain data.
///
/// `resource` is relative to the client's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub resource: String,
    pub query_params: RestParams,
    pub headers: RestParams,
    pub content: Option<MimeContent>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, resource: &str) -> Self {
        Self {
            method,
            resource: resource.to_string(),
            query_params: Vec::new(),
            headers: Vec::new(),
            content: None,
            timeout: None,
        }
    }

    pub fn get(resource: &str) -> Self {
        Self::new(HttpMethod::Get, resource)
    }

    pub fn post(resource: &str, content: MimeContent) -> Self {
        Self::new(HttpMethod::Post, resource).content(content)
    }

    pub fn put(resource: &str, content: MimeContent) -> Self {
        Self::new(HttpMethod::Put, resource).content(content)
    }

    pub fn delete(resource: &str) -> Self {
        Self::new(HttpMethod::Delete, resource)
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn content(mut self, content: MimeContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn body_len(&self) -> usize {
        self.content.as_ref().map_or(0, |c| c.body.len())
    }

    /// Request target: `resource` followed by the percent-encoded query.
    pub fn target(&self) -> String {
        let mut target = if self.resource.starts_with('/') {
            self.resource.clone()
        } else {
            format!("/{}", self.resource)
        };
        if !self.query_params.is_empty() {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &self.query_params {
                query.append_pair(key, value);
            }
            target.push(if target.contains('?') { '&' } else { '?' });
            target.push_str(&query.finish());
        }
        target
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub(crate) fn wants_header(&self, name: &str) -> bool {
        !self.has_header(name)
    }
}

/// Outcome of a request, delivered to `on_response`.
///
/// `status`, `headers` and `body` are only meaningful when `error` is
/// `Success`; failures carry status 0, no headers and an empty body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub error: ErrorCode,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Human readable reason for a failure, empty on success.
    pub detail: String,
}

impl HttpResponse {
    pub fn success(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            error: ErrorCode::Success,
            status,
            headers,
            body,
            detail: String::new(),
        }
    }

    pub fn failure(error: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            error,
            status: 0,
            headers: Vec::new(),
            body: Vec::new(),
            detail: detail.into(),
        }
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Kind of raw protocol data passed to the debug hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// Request head, just before it is written.
    HeaderOut,
    /// Response head (interim or final), as received.
    HeaderIn,
}

/// Receiver of request outcomes.
pub trait HttpClientCallbacks: Send + Sync {
    /// Called exactly once per submitted request, on the loop thread.
    fn on_response(&self, request: &HttpRequest, response: HttpResponse);

    /// Raw protocol data, for tracing decisions such as `Expect`.
    ///
    /// Runs on the loop thread in the middle of a processing step. It may
    /// submit requests or read the client's sizes, but must not drive the
    /// client's `process_one`. A panic here fails the request with `Other`.
    fn on_debug(&self, _request: &HttpRequest, _event: DebugEvent, _data: &[u8]) {}
}

type OnResponse = Box<dyn Fn(&HttpRequest, HttpResponse) + Send + Sync>;
type OnDebug = Box<dyn Fn(&HttpRequest, DebugEvent, &[u8]) + Send + Sync>;

/// Callbacks built from closures.
pub struct HttpClientSimpleCallbacks {
    on_response: OnResponse,
    on_debug: Option<OnDebug>,
}

impl HttpClientSimpleCallbacks {
    pub fn new<F>(on_response: F) -> Self
    where
        F: Fn(&HttpRequest, HttpResponse) + Send + Sync + 'static,
    {
        Self {
            on_response: Box::new(on_response),
            on_debug: None,
        }
    }

    pub fn with_debug<F>(mut self, on_debug: F) -> Self
    where
        F: Fn(&HttpRequest, DebugEvent, &[u8]) + Send + Sync + 'static,
    {
        self.on_debug = Some(Box::new(on_debug));
        self
    }
}

impl HttpClientCallbacks for HttpClientSimpleCallbacks {
    fn on_response(&self, request: &HttpRequest, response: HttpResponse) {
        (self.on_response)(request, response)
    }

    fn on_debug(&self, request: &HttpRequest, event: DebugEvent, data: &[u8]) {
        if let Some(on_debug) = &self.on_debug {
            on_debug(request, event, data)
        }
    }
}

impl fmt::Debug for HttpClientSimpleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientSimpleCallbacks")
            .field("debug", &self.on_debug.is_some())
            .finish()
    }
}
