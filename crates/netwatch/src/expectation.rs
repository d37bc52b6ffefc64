// Expectations - declarative assertions on captured exchanges
//
// An expectation is bound to a URL pattern and checks any combination of
// status code, latency, body and one header. Every configured dimension is
// evaluated; a failure reports all of them at once.

use crate::error::{Error, Result};
use crate::exchange::ExchangeRecord;
use crate::pattern::UrlPattern;
use regex::Regex;
use std::fmt;
use std::time::Duration;

/// A multi-dimensional assertion bound to a URL pattern.
///
/// Build one with [`Expectation::builder`].
#[derive(Debug, Clone)]
pub struct Expectation {
    pattern: UrlPattern,
    status_code: Option<u16>,
    max_response_time: Option<Duration>,
    body_contains: Option<String>,
    body_equals: Option<String>,
    body_matches: Option<BodyRegex>,
    header_contains: Option<(String, String)>,
}

/// Body regex kept alongside its source so reports show what the user wrote.
#[derive(Debug, Clone)]
struct BodyRegex {
    source: String,
    anchored: Regex,
}

impl Expectation {
    /// Starts an expectation for URLs matching `pattern` (plain path or regex).
    pub fn builder(pattern: impl Into<String>) -> ExpectationBuilder {
        ExpectationBuilder::new(pattern)
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn max_response_time(&self) -> Option<Duration> {
        self.max_response_time
    }

    /// True if `url` falls under this expectation.
    pub fn applies_to(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// Human-readable list of the configured checks.
    pub fn describe(&self) -> Vec<String> {
        let mut checks = Vec::new();
        if let Some(code) = self.status_code {
            checks.push(format!("status == {code}"));
        }
        if let Some(max) = self.max_response_time {
            checks.push(format!("response time < {}ms", max.as_millis()));
        }
        if let Some(needle) = &self.body_contains {
            checks.push(format!("body contains '{needle}'"));
        }
        if let Some(expected) = &self.body_equals {
            checks.push(format!("body equals '{expected}'"));
        }
        if let Some(body_regex) = &self.body_matches {
            checks.push(format!("body matches '{}'", body_regex.source));
        }
        if let Some((name, value)) = &self.header_contains {
            checks.push(format!("header '{name}' contains '{value}'"));
        }
        checks
    }

    /// Checks `record` against every configured dimension.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationFailure`] listing every failed dimension.
    pub fn validate(&self, record: &ExchangeRecord) -> std::result::Result<(), ValidationFailure> {
        let mut failures = Vec::new();
        let body = record.response_body.as_deref();

        if let Some(expected) = self.status_code {
            if record.status_code != Some(expected) {
                let actual = record
                    .status_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "none".to_string());
                failures.push(format!(
                    "Status Code Mismatch: Expected {expected}, Actual {actual}"
                ));
            }
        }

        if let Some(max) = self.max_response_time {
            let max_ms = max.as_millis() as u64;
            match record.response_time_millis {
                Some(actual) if actual >= max_ms => failures.push(format!(
                    "Response Time Exceeded: Expected < {max_ms}ms, Actual {actual}ms"
                )),
                Some(_) => {}
                None => tracing::warn!(
                    "No timing reported for {}; skipping response time check",
                    record.url
                ),
            }
        }

        if let Some(needle) = &self.body_contains {
            if !body.is_some_and(|b| b.contains(needle.as_str())) {
                failures.push(format!(
                    "Body Content Mismatch: Expected body to contain '{needle}'"
                ));
            }
        }

        if let Some(expected) = &self.body_equals {
            if body != Some(expected.as_str()) {
                failures.push(format!(
                    "Body Mismatch: Expected body to equal '{expected}'"
                ));
            }
        }

        if let Some(body_regex) = &self.body_matches {
            if !body.is_some_and(|b| body_regex.anchored.is_match(b)) {
                failures.push(format!(
                    "Body Pattern Mismatch: Expected body to match '{}'",
                    body_regex.source
                ));
            }
        }

        if let Some((name, needle)) = &self.header_contains {
            match record.response_header(name) {
                None => failures.push(format!(
                    "Header Missing: Expected header '{name}' to be present"
                )),
                Some(actual) if !actual.contains(needle.as_str()) => failures.push(format!(
                    "Header Mismatch: Expected header '{name}' to contain '{needle}', Actual '{actual}'"
                )),
                Some(_) => {}
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        Err(ValidationFailure {
            url: record.url.clone(),
            method: record.http_method.clone(),
            pattern: self.pattern.as_str().to_string(),
            failures,
            actual_body: record.response_body.clone(),
        })
    }
}

/// Builder for [`Expectation`].
///
/// Patterns are compiled in [`build`](Self::build), so a bad regex is
/// reported before anything is registered.
#[derive(Debug, Clone, Default)]
pub struct ExpectationBuilder {
    pattern: String,
    status_code: Option<u16>,
    max_response_time: Option<Duration>,
    body_contains: Option<String>,
    body_equals: Option<String>,
    body_matches: Option<String>,
    header_contains: Option<(String, String)>,
}

impl ExpectationBuilder {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    /// Requires the exact status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Requires the response to complete strictly faster than `max`
    pub fn max_response_time(mut self, max: Duration) -> Self {
        self.max_response_time = Some(max);
        self
    }

    /// Requires the body to contain `needle`
    pub fn body_contains(mut self, needle: impl Into<String>) -> Self {
        self.body_contains = Some(needle.into());
        self
    }

    /// Requires the body to equal `expected` exactly
    pub fn body_equals(mut self, expected: impl Into<String>) -> Self {
        self.body_equals = Some(expected.into());
        self
    }

    /// Requires the whole body to match `regex`
    pub fn body_matches(mut self, regex: impl Into<String>) -> Self {
        self.body_matches = Some(regex.into());
        self
    }

    /// Requires header `name` to be present and contain `value`
    pub fn header_contains(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_contains = Some((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<Expectation> {
        let pattern = UrlPattern::new(&self.pattern)?;
        let body_matches = self
            .body_matches
            .map(|source| {
                let anchored = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
                    Error::InvalidPattern {
                        pattern: source.clone(),
                        source: e,
                    }
                })?;
                Ok::<_, Error>(BodyRegex { source, anchored })
            })
            .transpose()?;

        if let Some((name, _)) = &self.header_contains {
            if name.trim().is_empty() {
                return Err(Error::InvalidArgument(
                    "header_contains requires a header name".to_string(),
                ));
            }
        }

        Ok(Expectation {
            pattern,
            status_code: self.status_code,
            max_response_time: self.max_response_time,
            body_contains: self.body_contains,
            body_equals: self.body_equals,
            body_matches,
            header_contains: self.header_contains,
        })
    }
}

/// Every failed dimension of one expectation against one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub url: String,
    pub method: String,
    pub pattern: String,
    pub failures: Vec<String>,
    pub actual_body: Option<String>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network expectation failed for {} {} (pattern '{}'):",
            self.method, self.url, self.pattern
        )?;
        for failure in &self.failures {
            writeln!(f, "  - {failure}")?;
        }
        match &self.actual_body {
            Some(body) => write!(f, "Actual response body: {body}"),
            None => write!(f, "Actual response body: <unavailable>"),
        }
    }
}

impl std::error::Error for ValidationFailure {}
