// Error types for netwatch

use crate::expectation::ValidationFailure;
use thiserror::Error;

/// Result type alias for netwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring or intercepting network traffic
#[derive(Debug, Error)]
pub enum Error {
    /// A URL or body pattern failed to compile as a regular expression
    ///
    /// Surfaced at builder or registration time, never during dispatch.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Invalid argument provided to a builder or registration call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A captured exchange did not satisfy its expectation
    ///
    /// Raised on the dispatch path at the moment of the mismatch and carried
    /// out through the driver's dispatch call.
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// A failure detected on a background timer, delivered at a poll point
    #[error("Pending network failure: {0}")]
    PendingFailure(String),

    /// Assertion timeout (expect_exchanges API)
    #[error("Assertion timeout: {0}")]
    AssertionTimeout(String),

    /// End-of-scenario monitoring check found unmet expectations
    #[error("Network monitoring failed: {0}")]
    MonitoringFailed(String),

    /// No interception rule registered under the given name
    #[error("Interception rule not found: '{0}'")]
    RuleNotFound(String),

    /// The browser driver rejected or failed an operation
    #[error("Driver error: {0}")]
    Driver(String),

    /// I/O error (file-sourced mock bodies, option files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error with additional context
    #[error("{0}: {1}")]
    Context(String, #[source] Box<Error>),
}

impl Error {
    /// Adds context to the error
    pub fn context(self, msg: impl Into<String>) -> Self {
        Error::Context(msg.into(), Box::new(self))
    }

    /// Returns true for errors that represent the system under test misbehaving,
    /// as opposed to configuration or driver problems.
    pub fn is_assertion(&self) -> bool {
        match self {
            Error::Validation(_)
            | Error::PendingFailure(_)
            | Error::AssertionTimeout(_)
            | Error::MonitoringFailed(_) => true,
            Error::Context(_, inner) => inner.is_assertion(),
            _ => false,
        }
    }
}
