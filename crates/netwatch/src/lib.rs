//! netwatch: network interception and validation for browser test automation
//!
//! Two cooperating halves share one [`NetworkContext`]:
//!
//! - [`ResponseMonitor`] observes responses on a browser session, records them
//!   and validates them against registered [`Expectation`]s as they arrive.
//! - [`InterceptionManager`] attaches route handlers that mock responses,
//!   delay them or rewrite outgoing requests according to [`InterceptionRule`]s.
//!
//! The engine talks to the browser only through the traits in [`driver`].
//! [`driver::simulated::SimulatedSession`] implements them in memory for tests.
//!
//! # Examples
//!
//! ## Validating a login call
//!
//! ```ignore
//! use netwatch::{NetworkContext, ResponseMonitor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> netwatch::Result<()> {
//!     let context = NetworkContext::new();
//!     let monitor = ResponseMonitor::new(context.clone());
//!
//!     monitor
//!         .builder(&page)
//!         .expect("/auth/login", |e| {
//!             e.status_code(200).max_response_time(Duration::from_secs(2))
//!         })
//!         .build()
//!         .await?;
//!
//!     // ... drive the page ...
//!
//!     monitor.assert_monitoring_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Mocking an API
//!
//! ```ignore
//! use netwatch::{InterceptionManager, NetworkContext};
//!
//! #[tokio::main]
//! async fn main() -> netwatch::Result<()> {
//!     let manager = InterceptionManager::new(NetworkContext::new());
//!     manager.mock_response("/api/users", 201, r#"{"status":"mocked"}"#)?;
//!     manager.modify_request_header("/api/", "Authorization", "Bearer test")?;
//!     manager.apply_to(&page).await?;
//!     Ok(())
//! }
//! ```

pub mod driver;

mod assertions;
mod builder;
mod config;
mod context;
mod error;
mod exchange;
mod expectation;
mod interceptor;
mod monitor;
mod pattern;
mod report;
mod rule;

// Re-export error types
pub use error::{Error, Result};

// Re-export configuration
pub use config::{
    DEFAULT_ASSERTION_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, EngineOptions, EngineOptionsBuilder,
};

// Re-export shared state and captured data
pub use context::NetworkContext;
pub use exchange::{ExchangeHistory, ExchangeRecord};
pub use pattern::{MATCH_ALL, UrlPattern, looks_like_regex, normalize};

// Re-export monitoring API
pub use expectation::{Expectation, ExpectationBuilder, ValidationFailure};
pub use monitor::{MonitorSession, ResponseMonitor};

// Re-export interception API
pub use interceptor::{InterceptionManager, RuleHandle};
pub use rule::{
    BodyGenerator, DEFAULT_CONTENT_TYPE, InterceptionRule, InterceptionRuleBuilder,
    RequestInterceptor, RequestOverride,
};

// Re-export builders, reports and assertions
pub use assertions::{ExchangeAssertion, expect_exchanges};
pub use builder::{InterceptionBuilder, MonitorBuilder};
pub use report::{ExpectationSummary, MonitoringSummary, NetworkReport, RuleSummary};
