// Browser driver seam
//
// The engine never talks to a browser directly. A driver adapter implements
// these traits on top of its own session type (page, context, CDP target)
// and forwards response events and intercepted requests to the registered
// handlers.

pub mod route;
pub mod simulated;

use crate::error::Result;
use crate::pattern::UrlPattern;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use route::{ContinueOptions, ContinueOptionsBuilder, FulfillOptions, FulfillOptionsBuilder};

/// Type alias for boxed listener future
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Response listener registered through [`BrowserSession::on_response`]
pub type ResponseHandler = Arc<dyn Fn(Arc<dyn NetworkResponse>) -> HandlerFuture + Send + Sync>;

/// Route handler registered through [`BrowserSession::route`]
pub type RouteHandler = Arc<dyn Fn(Arc<dyn InterceptedRoute>) -> HandlerFuture + Send + Sync>;

/// Wraps an async closure into a [`ResponseHandler`].
pub fn response_handler<F, Fut>(handler: F) -> ResponseHandler
where
    F: Fn(Arc<dyn NetworkResponse>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |response| -> HandlerFuture { Box::pin(handler(response)) })
}

/// Wraps an async closure into a [`RouteHandler`].
pub fn route_handler<F, Fut>(handler: F) -> RouteHandler
where
    F: Fn(Arc<dyn InterceptedRoute>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |route| -> HandlerFuture { Box::pin(handler(route)) })
}

/// Owned snapshot of an outbound request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    /// Driver-assigned request id, if the driver exposes one
    pub id: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub post_data: Option<String>,
}

impl RequestInfo {
    /// Creates a request with no headers and no body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            post_data: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_post_data(mut self, body: impl Into<String>) -> Self {
        self.post_data = Some(body.into());
        self
    }
}

/// Driver-reported timing for a response, in milliseconds.
///
/// Follows the resource-timing convention: `request_start` and
/// `response_end` are offsets from the same origin, `-1` when unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseTiming {
    pub request_start: f64,
    pub response_end: f64,
}

impl ResponseTiming {
    /// Elapsed time between request start and response end, if both are known.
    pub fn elapsed_millis(&self) -> Option<u64> {
        if self.request_start < 0.0 || self.response_end < self.request_start {
            return None;
        }
        Some((self.response_end - self.request_start).round() as u64)
    }
}

/// A network response observed by the browser.
#[async_trait]
pub trait NetworkResponse: Send + Sync {
    /// Final URL of the response
    fn url(&self) -> &str;

    /// HTTP status code
    fn status(&self) -> u16;

    /// Response headers as reported by the driver
    fn headers(&self) -> &HashMap<String, String>;

    /// The request that produced this response
    fn request(&self) -> &RequestInfo;

    /// Reads the response body as text.
    ///
    /// May fail for redirects, aborted loads or binary payloads.
    async fn text(&self) -> Result<String>;

    /// Timing metadata, if the driver recorded it.
    fn timing(&self) -> Option<ResponseTiming>;
}

/// A request suspended by a route, waiting to be answered or forwarded.
#[async_trait]
pub trait InterceptedRoute: Send + Sync {
    /// The suspended request
    fn request(&self) -> &RequestInfo;

    /// Lets the request proceed, optionally with modifications.
    async fn continue_(&self, overrides: Option<ContinueOptions>) -> Result<()>;

    /// Answers the request with a synthesized response.
    async fn fulfill(&self, options: FulfillOptions) -> Result<()>;

    /// Aborts the request with a network error code (default: "failed").
    async fn abort(&self, error_code: Option<&str>) -> Result<()>;
}

/// A browser session (page or context) that exposes network events.
///
/// Drivers offer no way to remove a response listener once added; callers
/// that need to "stop" listening must make their handler a no-op instead.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Stable identifier for this session
    fn session_id(&self) -> &str;

    /// Registers a listener invoked for every response the session receives.
    async fn on_response(&self, handler: ResponseHandler) -> Result<()>;

    /// Registers a route handler for requests whose URL matches `pattern`.
    async fn route(&self, pattern: UrlPattern, handler: RouteHandler) -> Result<()>;
}

#[async_trait]
impl<T: BrowserSession + ?Sized> BrowserSession for Arc<T> {
    fn session_id(&self) -> &str {
        (**self).session_id()
    }

    async fn on_response(&self, handler: ResponseHandler) -> Result<()> {
        (**self).on_response(handler).await
    }

    async fn route(&self, pattern: UrlPattern, handler: RouteHandler) -> Result<()> {
        (**self).route(pattern, handler).await
    }
}
