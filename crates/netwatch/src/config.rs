// Engine options
//
// Options are plain serde structs with optional fields so they can come from
// a JSON file, from the environment, or from code. Unset fields fall back to
// the defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default timeout for exchange assertions (5 seconds)
pub const DEFAULT_ASSERTION_TIMEOUT_MS: u64 = 5_000;

/// Default polling interval for exchange assertions (100ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Options shared by the monitor, the interception manager and assertions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    /// Read response bodies into exchange records (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_response_bodies: Option<bool>,

    /// Truncate captured bodies to this many characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_body_chars: Option<usize>,

    /// Content type for mocked responses without one (default: application/json)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_content_type: Option<String>,

    /// Timeout for `expect_exchanges` assertions in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_timeout_ms: Option<u64>,

    /// Poll interval for `expect_exchanges` assertions in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

impl EngineOptions {
    /// Creates a new builder for EngineOptions
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::default()
    }

    /// Parses options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads options from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::from(e).context(format!("Failed to read {}", path.display())))?;
        Self::from_json_str(&contents)
    }

    /// Reads options from `NETWATCH_*` environment variables.
    ///
    /// - `NETWATCH_CAPTURE_BODIES` (true/false)
    /// - `NETWATCH_MAX_BODY_CHARS`
    /// - `NETWATCH_DEFAULT_CONTENT_TYPE`
    /// - `NETWATCH_ASSERTION_TIMEOUT_MS`
    /// - `NETWATCH_POLL_INTERVAL_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            capture_response_bodies: parse_var(&lookup, "NETWATCH_CAPTURE_BODIES")?,
            max_body_chars: parse_var(&lookup, "NETWATCH_MAX_BODY_CHARS")?,
            default_content_type: lookup("NETWATCH_DEFAULT_CONTENT_TYPE"),
            assertion_timeout_ms: parse_var(&lookup, "NETWATCH_ASSERTION_TIMEOUT_MS")?,
            poll_interval_ms: parse_var(&lookup, "NETWATCH_POLL_INTERVAL_MS")?,
        })
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn or(self, fallback: EngineOptions) -> Self {
        Self {
            capture_response_bodies: self
                .capture_response_bodies
                .or(fallback.capture_response_bodies),
            max_body_chars: self.max_body_chars.or(fallback.max_body_chars),
            default_content_type: self.default_content_type.or(fallback.default_content_type),
            assertion_timeout_ms: self.assertion_timeout_ms.or(fallback.assertion_timeout_ms),
            poll_interval_ms: self.poll_interval_ms.or(fallback.poll_interval_ms),
        }
    }

    pub fn captures_bodies(&self) -> bool {
        self.capture_response_bodies.unwrap_or(true)
    }

    pub fn content_type(&self) -> &str {
        self.default_content_type
            .as_deref()
            .unwrap_or(crate::rule::DEFAULT_CONTENT_TYPE)
    }

    pub fn assertion_timeout(&self) -> Duration {
        Duration::from_millis(
            self.assertion_timeout_ms
                .unwrap_or(DEFAULT_ASSERTION_TIMEOUT_MS),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Applies `max_body_chars` to a captured body.
    pub(crate) fn truncate_body(&self, body: String) -> String {
        match self.max_body_chars {
            Some(max) if body.chars().count() > max => body.chars().take(max).collect(),
            _ => body,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidArgument(format!("{key}='{raw}': {e}"))),
    }
}

/// Builder for EngineOptions
#[derive(Debug, Clone, Default)]
pub struct EngineOptionsBuilder {
    options: EngineOptions,
}

impl EngineOptionsBuilder {
    pub fn capture_response_bodies(mut self, capture: bool) -> Self {
        self.options.capture_response_bodies = Some(capture);
        self
    }

    pub fn max_body_chars(mut self, max: usize) -> Self {
        self.options.max_body_chars = Some(max);
        self
    }

    pub fn default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.options.default_content_type = Some(content_type.into());
        self
    }

    pub fn assertion_timeout(mut self, timeout: Duration) -> Self {
        self.options.assertion_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn build(self) -> EngineOptions {
        self.options
    }
}
