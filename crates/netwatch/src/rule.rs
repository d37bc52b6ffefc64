// Interception rules
//
// A rule answers matching requests with a mocked response, fails them with
// a network error, or rewrites them before they reach the network. Rules are
// shared between the registry and the route handlers attached to sessions,
// so the enabled flag is atomic.

use crate::driver::{ContinueOptions, RequestInfo};
use crate::error::{Error, Result};
use crate::pattern::UrlPattern;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Content type of mocked responses unless a rule says otherwise
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Produces a mock body from the intercepted request.
pub type BodyGenerator = Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>;

/// Inspects an intercepted request and optionally returns a replacement.
///
/// Returning `None` means "no change": the rule goes on to mock.
pub type RequestInterceptor = Arc<dyn Fn(&RequestInfo) -> Option<RequestOverride> + Send + Sync>;

/// Replacement fields for a forwarded request. Unset fields keep the original.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverride {
    pub method: Option<String>,
    /// The full replacement header set
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl RequestOverride {
    pub fn into_continue_options(self) -> ContinueOptions {
        ContinueOptions {
            headers: self.headers,
            method: self.method,
            post_data: self.body,
            url: self.url,
        }
    }
}

/// A registered mock/rewrite rule.
pub struct InterceptionRule {
    name: String,
    pattern: UrlPattern,
    method: Option<Regex>,
    method_source: String,
    status: u16,
    headers: HashMap<String, String>,
    body: Option<String>,
    body_file: Option<PathBuf>,
    generator: Option<BodyGenerator>,
    delay: Duration,
    request_interceptor: Option<RequestInterceptor>,
    abort: Option<String>,
    enabled: AtomicBool,
}

impl InterceptionRule {
    /// Starts a rule called `name` for URLs matching `pattern`.
    pub fn builder(name: impl Into<String>, pattern: impl Into<String>) -> InterceptionRuleBuilder {
        InterceptionRuleBuilder::new(name, pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    /// Method pattern as configured (`.*` when unrestricted).
    pub fn method_pattern(&self) -> &str {
        &self.method_source
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn has_request_interceptor(&self) -> bool {
        self.request_interceptor.is_some()
    }

    /// Network error code matching requests are aborted with, if the rule
    /// blocks instead of mocking.
    pub fn abort_code(&self) -> Option<&str> {
        self.abort.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// True if the rule's method pattern accepts `method` (case-insensitive).
    pub fn matches_method(&self, method: &str) -> bool {
        match &self.method {
            Some(regex) => regex.is_match(method),
            None => true,
        }
    }

    /// Runs the request interceptor, if any.
    pub fn intercept_request(&self, request: &RequestInfo) -> Option<RequestOverride> {
        self.request_interceptor
            .as_ref()
            .and_then(|interceptor| interceptor(request))
    }

    /// Resolves the mock payload: generator, then literal body, then file.
    ///
    /// An unreadable file is logged and treated as "no payload", which lets
    /// the request through unmodified.
    pub async fn resolve_body(&self, request: &RequestInfo) -> Option<String> {
        if let Some(generator) = &self.generator {
            return Some(generator(request));
        }
        if let Some(body) = &self.body {
            return Some(body.clone());
        }
        if let Some(path) = &self.body_file {
            return match tokio::fs::read_to_string(path).await {
                Ok(contents) => Some(contents),
                Err(e) => {
                    tracing::warn!(
                        "Rule '{}': failed to read mock body from {}: {}",
                        self.name,
                        path.display(),
                        e
                    );
                    None
                }
            };
        }
        None
    }

    /// Where the payload comes from, for reports.
    pub fn body_source(&self) -> &'static str {
        if self.generator.is_some() {
            "generator"
        } else if self.body.is_some() {
            "literal"
        } else if self.body_file.is_some() {
            "file"
        } else {
            "none"
        }
    }
}

impl fmt::Debug for InterceptionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("method", &self.method_source)
            .field("status", &self.status)
            .field("body_source", &self.body_source())
            .field("delay", &self.delay)
            .field("request_interceptor", &self.request_interceptor.is_some())
            .field("abort", &self.abort)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Builder for [`InterceptionRule`].
#[derive(Clone)]
pub struct InterceptionRuleBuilder {
    name: String,
    pattern: String,
    method: Option<String>,
    status: u16,
    headers: HashMap<String, String>,
    body: Option<String>,
    body_file: Option<PathBuf>,
    generator: Option<BodyGenerator>,
    delay: Duration,
    request_interceptor: Option<RequestInterceptor>,
    abort: Option<String>,
    enabled: bool,
}

impl InterceptionRuleBuilder {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            method: None,
            status: 200,
            headers: HashMap::new(),
            body: None,
            body_file: None,
            generator: None,
            delay: Duration::ZERO,
            request_interceptor: None,
            abort: None,
            enabled: true,
        }
    }

    /// Restricts the rule to methods matching `pattern` (e.g. `"POST"`, `"GET|HEAD"`)
    pub fn method(mut self, pattern: impl Into<String>) -> Self {
        self.method = Some(pattern.into());
        self
    }

    /// Sets the mocked status code (default: 200)
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a mocked response header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds every header in `headers`
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets a literal mock body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the mock body to `value` serialized as JSON
    pub fn json(mut self, value: &impl serde::Serialize) -> Result<Self> {
        self.body = Some(serde_json::to_string(value)?);
        Ok(self)
    }

    /// Reads the mock body from `path` on every intercepted request
    pub fn body_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body_file = Some(path.into());
        self
    }

    /// Computes the mock body from the request
    pub fn generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Delays the mocked response by `delay`
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Rewrites the request instead of mocking when the callback returns a replacement
    pub fn request_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&RequestInfo) -> Option<RequestOverride> + Send + Sync + 'static,
    {
        self.request_interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Aborts matching requests with the network error `code` (e.g. `"failed"`,
    /// `"blockedbyclient"`) instead of mocking them
    pub fn abort(mut self, code: impl Into<String>) -> Self {
        self.abort = Some(code.into());
        self
    }

    /// Sets the initial enabled state (default: true)
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds the rule. Mocked responses default to `content-type: application/json`.
    pub fn build(self) -> Result<InterceptionRule> {
        self.build_with_content_type(DEFAULT_CONTENT_TYPE)
    }

    /// Builds the rule, applying `default_content_type` when no content type was given.
    pub fn build_with_content_type(
        mut self,
        default_content_type: &str,
    ) -> Result<InterceptionRule> {
        if !self
            .headers
            .keys()
            .any(|key| key.eq_ignore_ascii_case("content-type"))
        {
            self.headers
                .insert("content-type".to_string(), default_content_type.to_string());
        }

        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "Interception rule requires a name".to_string(),
            ));
        }
        let pattern = UrlPattern::new(&self.pattern)?;

        let method_source = self.method.unwrap_or_else(|| ".*".to_string());
        let method = if method_source == ".*" {
            None
        } else {
            let regex = Regex::new(&format!("(?i)^(?:{method_source})$")).map_err(|e| {
                Error::InvalidPattern {
                    pattern: method_source.clone(),
                    source: e,
                }
            })?;
            Some(regex)
        };

        Ok(InterceptionRule {
            name: self.name,
            pattern,
            method,
            method_source,
            status: self.status,
            headers: self.headers,
            body: self.body,
            body_file: self.body_file,
            generator: self.generator,
            delay: self.delay,
            request_interceptor: self.request_interceptor,
            abort: self.abort,
            enabled: AtomicBool::new(self.enabled),
        })
    }
}

impl fmt::Debug for InterceptionRuleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionRuleBuilder")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("method", &self.method)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
