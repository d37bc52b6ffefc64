// Simulated browser session
//
// In-process implementation of the driver seam. Events are dispatched by
// the caller instead of a browser, which makes every engine path testable
// without launching anything.

use crate::driver::{
    BrowserSession, ContinueOptions, FulfillOptions, InterceptedRoute, NetworkResponse,
    RequestInfo, ResponseHandler, ResponseTiming, RouteHandler,
};
use crate::error::{Error, Result};
use crate::pattern::UrlPattern;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A response fed into [`SimulatedSession::dispatch_response`].
#[derive(Debug, Clone)]
pub struct SimulatedResponse {
    request: RequestInfo,
    url: String,
    status: u16,
    headers: HashMap<String, String>,
    body: Option<String>,
    timing: Option<ResponseTiming>,
}

impl SimulatedResponse {
    /// Response to a bare `method url` request with an empty readable body.
    pub fn new(method: &str, url: &str, status: u16) -> Self {
        Self::for_request(RequestInfo::new(method, url), status)
    }

    /// Response to a fully specified request.
    pub fn for_request(request: RequestInfo, status: u16) -> Self {
        Self {
            url: request.url.clone(),
            request,
            status,
            headers: HashMap::new(),
            body: Some(String::new()),
            timing: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Makes `text()` fail, as it does for redirects and evicted bodies.
    pub fn with_unreadable_body(mut self) -> Self {
        self.body = None;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Reports a request-to-response-end duration of `millis`.
    pub fn with_elapsed_millis(mut self, millis: u64) -> Self {
        self.timing = Some(ResponseTiming {
            request_start: 0.0,
            response_end: millis as f64,
        });
        self
    }
}

#[async_trait]
impl NetworkResponse for SimulatedResponse {
    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    fn request(&self) -> &RequestInfo {
        &self.request
    }

    async fn text(&self) -> Result<String> {
        self.body
            .clone()
            .ok_or_else(|| Error::Driver(format!("Response body unavailable for {}", self.url)))
    }

    fn timing(&self) -> Option<ResponseTiming> {
        self.timing
    }
}

/// How a dispatched request was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Answered with a synthesized response
    Fulfilled(FulfillOptions),
    /// Forwarded to the network; `request` is what the network sees
    Continued {
        request: RequestInfo,
        overrides: Option<ContinueOptions>,
    },
    /// Failed with a network error code
    Aborted(String),
    /// No route matched, or the matching handler never resolved the request
    Unhandled,
}

impl RouteOutcome {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, RouteOutcome::Fulfilled(_))
    }

    /// The request as forwarded, if the route continued it.
    pub fn forwarded_request(&self) -> Option<&RequestInfo> {
        match self {
            RouteOutcome::Continued { request, .. } => Some(request),
            _ => None,
        }
    }
}

struct SimulatedRoute {
    request: RequestInfo,
    outcome: Mutex<Option<RouteOutcome>>,
}

impl SimulatedRoute {
    fn resolve(&self, outcome: RouteOutcome) -> Result<()> {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return Err(Error::Driver(format!(
                "Route is already handled: {} {}",
                self.request.method, self.request.url
            )));
        }
        *slot = Some(outcome);
        Ok(())
    }
}

#[async_trait]
impl InterceptedRoute for SimulatedRoute {
    fn request(&self) -> &RequestInfo {
        &self.request
    }

    async fn continue_(&self, overrides: Option<ContinueOptions>) -> Result<()> {
        let request = match &overrides {
            Some(options) => options.apply(&self.request),
            None => self.request.clone(),
        };
        self.resolve(RouteOutcome::Continued { request, overrides })
    }

    async fn fulfill(&self, options: FulfillOptions) -> Result<()> {
        self.resolve(RouteOutcome::Fulfilled(options))
    }

    async fn abort(&self, error_code: Option<&str>) -> Result<()> {
        self.resolve(RouteOutcome::Aborted(
            error_code.unwrap_or("failed").to_string(),
        ))
    }
}

#[derive(Clone)]
struct RouteHandlerEntry {
    pattern: UrlPattern,
    handler: RouteHandler,
}

/// A browser session whose network events are driven by the caller.
pub struct SimulatedSession {
    id: String,
    response_handlers: Mutex<Vec<ResponseHandler>>,
    route_handlers: Mutex<Vec<RouteHandlerEntry>>,
}

impl SimulatedSession {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            response_handlers: Mutex::new(Vec::new()),
            route_handlers: Mutex::new(Vec::new()),
        })
    }

    /// Number of response listeners ever registered. Listeners cannot be removed.
    pub fn response_listener_count(&self) -> usize {
        self.response_handlers.lock().len()
    }

    /// Number of route handlers registered.
    pub fn route_count(&self) -> usize {
        self.route_handlers.lock().len()
    }

    /// Delivers `response` to every listener in registration order.
    ///
    /// The first listener error is returned to the caller and later
    /// listeners do not run, mirroring an exception escaping a driver
    /// callback.
    pub async fn dispatch_response(&self, response: SimulatedResponse) -> Result<()> {
        let handlers = self.response_handlers.lock().clone();
        let response: Arc<dyn NetworkResponse> = Arc::new(response);
        for handler in handlers {
            handler(response.clone()).await?;
        }
        Ok(())
    }

    /// Runs `request` through the route table (last registered wins).
    pub async fn dispatch_request(&self, request: RequestInfo) -> Result<RouteOutcome> {
        let entry = self
            .route_handlers
            .lock()
            .iter()
            .rev()
            .find(|entry| entry.pattern.is_match(&request.url))
            .cloned();

        let Some(entry) = entry else {
            return Ok(RouteOutcome::Unhandled);
        };

        let route = Arc::new(SimulatedRoute {
            request,
            outcome: Mutex::new(None),
        });
        let handle: Arc<dyn InterceptedRoute> = route.clone();
        (entry.handler)(handle).await?;

        let outcome = route.outcome.lock().take();
        Ok(outcome.unwrap_or(RouteOutcome::Unhandled))
    }
}

#[async_trait]
impl BrowserSession for SimulatedSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn on_response(&self, handler: ResponseHandler) -> Result<()> {
        self.response_handlers.lock().push(handler);
        Ok(())
    }

    async fn route(&self, pattern: UrlPattern, handler: RouteHandler) -> Result<()> {
        self.route_handlers
            .lock()
            .push(RouteHandlerEntry { pattern, handler });
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSession")
            .field("id", &self.id)
            .field("response_listeners", &self.response_listener_count())
            .field("routes", &self.route_count())
            .finish()
    }
}
