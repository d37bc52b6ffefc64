// Route primitives
//
// Options for the two ways a suspended request can be resolved: forwarded
// (optionally rewritten) or fulfilled with a synthesized response.

use crate::driver::RequestInfo;
use std::collections::HashMap;

/// Options for continuing a request with modifications.
///
/// Unset fields keep the original request's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinueOptions {
    /// Replacement request headers (the full set, not a delta)
    pub headers: Option<HashMap<String, String>>,
    /// Replacement request method (GET, POST, etc.)
    pub method: Option<String>,
    /// Replacement POST data
    pub post_data: Option<String>,
    /// Replacement request URL (must keep the same protocol)
    pub url: Option<String>,
}

impl ContinueOptions {
    /// Creates a new builder for ContinueOptions
    pub fn builder() -> ContinueOptionsBuilder {
        ContinueOptionsBuilder::default()
    }

    /// Returns true if no field overrides the original request.
    pub fn is_empty(&self) -> bool {
        self.headers.is_none()
            && self.method.is_none()
            && self.post_data.is_none()
            && self.url.is_none()
    }

    /// The request the network will actually see once these overrides apply.
    pub fn apply(&self, original: &RequestInfo) -> RequestInfo {
        RequestInfo {
            id: original.id.clone(),
            url: self.url.clone().unwrap_or_else(|| original.url.clone()),
            method: self.method.clone().unwrap_or_else(|| original.method.clone()),
            headers: self
                .headers
                .clone()
                .unwrap_or_else(|| original.headers.clone()),
            post_data: self.post_data.clone().or_else(|| original.post_data.clone()),
        }
    }
}

/// Builder for ContinueOptions
#[derive(Debug, Clone, Default)]
pub struct ContinueOptionsBuilder {
    headers: Option<HashMap<String, String>>,
    method: Option<String>,
    post_data: Option<String>,
    url: Option<String>,
}

impl ContinueOptionsBuilder {
    /// Sets the request headers
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Sets the request method
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the POST data
    pub fn post_data(mut self, post_data: impl Into<String>) -> Self {
        self.post_data = Some(post_data.into());
        self
    }

    /// Sets the request URL (must have same protocol as original)
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Builds the ContinueOptions
    pub fn build(self) -> ContinueOptions {
        ContinueOptions {
            headers: self.headers,
            method: self.method,
            post_data: self.post_data,
            url: self.url,
        }
    }
}

/// Options for fulfilling a route with a custom response.
#[derive(Debug, Clone, PartialEq)]
pub struct FulfillOptions {
    /// HTTP status code (default: 200)
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body as bytes
    pub body: Option<Vec<u8>>,
}

impl Default for FulfillOptions {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: None,
        }
    }
}

impl FulfillOptions {
    /// Creates a new FulfillOptions builder
    pub fn builder() -> FulfillOptionsBuilder {
        FulfillOptionsBuilder::default()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Builder for FulfillOptions
#[derive(Debug, Clone, Default)]
pub struct FulfillOptionsBuilder {
    status: Option<u16>,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
}

impl FulfillOptionsBuilder {
    /// Sets the HTTP status code
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds every header in `headers`, replacing existing names
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets a single response header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the response body from bytes
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the response body from a string
    pub fn body_string(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into().into_bytes());
        self
    }

    /// Builds the FulfillOptions, adding `content-length` when a body is set
    pub fn build(self) -> FulfillOptions {
        let mut headers = self.headers;
        if let Some(body) = &self.body {
            headers.insert("content-length".to_string(), body.len().to_string());
        }
        FulfillOptions {
            status: self.status.unwrap_or(200),
            headers,
            body: self.body,
        }
    }
}
