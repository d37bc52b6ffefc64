// Fluent setup builders
//
// Builders collect configuration for one session and apply it in a single
// step. Every pattern is compiled before anything is installed, so a bad
// pattern leaves the context untouched.

use crate::driver::BrowserSession;
use crate::error::{Error, Result};
use crate::expectation::{Expectation, ExpectationBuilder};
use crate::interceptor::{InterceptionManager, RuleHandle, attach_rule};
use crate::monitor::ResponseMonitor;
use crate::pattern::UrlPattern;
use crate::rule::{InterceptionRule, InterceptionRuleBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

impl ResponseMonitor {
    /// Starts a fluent monitoring setup for `session`.
    pub fn builder<'a>(&'a self, session: &'a dyn BrowserSession) -> MonitorBuilder<'a> {
        MonitorBuilder::new(self, session)
    }
}

impl InterceptionManager {
    /// Starts a fluent interception setup for `session`.
    pub fn builder<'a>(&'a self, session: &'a dyn BrowserSession) -> InterceptionBuilder<'a> {
        InterceptionBuilder::new(self, session)
    }
}

struct TimedStop {
    after: Duration,
    target: Option<String>,
}

struct CountedStop {
    pattern: String,
    expected: usize,
    timeout: Option<Duration>,
}

/// Fluent setup for a [`ResponseMonitor`].
///
/// By default `build` starts from a clean slate: listeners from earlier
/// builds on the session are retired, and history, expectations, warnings,
/// validation failures and any pending failure are cleared before the new
/// expectations go in. Call
/// [`keep_existing_state`](Self::keep_existing_state) to add to what is there.
///
/// # Example
///
/// ```ignore
/// monitor
///     .builder(&page)
///     .expect_status("/api/login", 200)
///     .expect("/api/users", |e| e.status_code(200).max_response_time(Duration::from_secs(2)))
///     .stop_after_count("/api/users", 1, Some(Duration::from_secs(10)))
///     .build()
///     .await?;
/// ```
pub struct MonitorBuilder<'a> {
    monitor: &'a ResponseMonitor,
    session: &'a dyn BrowserSession,
    expectations: Vec<ExpectationBuilder>,
    watch: Vec<String>,
    timed_stop: Option<TimedStop>,
    counted_stop: Option<CountedStop>,
    replace: bool,
}

impl<'a> MonitorBuilder<'a> {
    pub fn new(monitor: &'a ResponseMonitor, session: &'a dyn BrowserSession) -> Self {
        Self {
            monitor,
            session,
            expectations: Vec::new(),
            watch: Vec::new(),
            timed_stop: None,
            counted_stop: None,
            replace: true,
        }
    }

    /// Adds an expectation for `pattern`, configured by `configure`.
    pub fn expect<F>(mut self, pattern: &str, configure: F) -> Self
    where
        F: FnOnce(ExpectationBuilder) -> ExpectationBuilder,
    {
        self.expectations.push(configure(Expectation::builder(pattern)));
        self
    }

    /// Expects responses matching `pattern` to have status `code`.
    pub fn expect_status(self, pattern: &str, code: u16) -> Self {
        self.expect(pattern, |e| e.status_code(code))
    }

    /// Expects responses matching `pattern` to arrive in under `max`.
    pub fn expect_response_time(self, pattern: &str, max: Duration) -> Self {
        self.expect(pattern, |e| e.max_response_time(max))
    }

    /// Expects response bodies matching `pattern` to contain `needle`.
    pub fn expect_body_contains(self, pattern: &str, needle: &str) -> Self {
        let needle = needle.to_string();
        self.expect(pattern, move |e| e.body_contains(needle))
    }

    /// Captures responses matching `pattern` without validating them.
    pub fn watch(mut self, pattern: &str) -> Self {
        self.watch.push(pattern.to_string());
        self
    }

    /// Stops monitoring after `after`, optionally checking that `target` was seen.
    pub fn stop_after(mut self, after: Duration, target: Option<&str>) -> Self {
        self.timed_stop = Some(TimedStop {
            after,
            target: target.map(str::to_string),
        });
        self
    }

    /// Stops monitoring once `expected` responses matching `pattern` arrived.
    pub fn stop_after_count(
        mut self,
        pattern: &str,
        expected: usize,
        timeout: Option<Duration>,
    ) -> Self {
        self.counted_stop = Some(CountedStop {
            pattern: pattern.to_string(),
            expected,
            timeout,
        });
        self
    }

    /// Adds to the current history and expectations instead of replacing them.
    pub fn keep_existing_state(mut self) -> Self {
        self.replace = false;
        self
    }

    /// Installs the expectations and attaches one listener to the session.
    ///
    /// # Errors
    ///
    /// Returns an error, before changing any state, if a pattern is invalid
    /// or an auto-stop is configured without a running Tokio runtime.
    pub async fn build(self) -> Result<()> {
        let expectations = self
            .expectations
            .into_iter()
            .map(ExpectationBuilder::build)
            .collect::<Result<Vec<_>>>()?;
        let watched = self
            .watch
            .iter()
            .map(|pattern| UrlPattern::new(pattern))
            .collect::<Result<Vec<_>>>()?;
        if let Some(target) = self.timed_stop.as_ref().and_then(|stop| stop.target.as_ref()) {
            UrlPattern::new(target)?;
        }
        if let Some(stop) = &self.counted_stop {
            UrlPattern::new(&stop.pattern)?;
            if stop.expected == 0 {
                return Err(Error::InvalidArgument(
                    "stop_after_count requires an expected count of at least 1".to_string(),
                ));
            }
        }
        if (self.timed_stop.is_some() || self.counted_stop.is_some())
            && tokio::runtime::Handle::try_current().is_err()
        {
            return Err(Error::InvalidArgument(
                "auto-stop requires a running Tokio runtime".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut patterns: Vec<UrlPattern> = expectations
            .iter()
            .map(|expectation| expectation.pattern().clone())
            .chain(watched)
            .filter(|pattern| seen.insert(pattern.as_str().to_string()))
            .collect();
        if patterns.is_empty() {
            patterns.push(UrlPattern::match_all());
        }

        let context = self.monitor.context();
        if self.replace {
            self.monitor.restart_session(self.session.session_id());
            context.reset_monitoring_state();
        }
        tracing::info!(
            "Installing {} expectation(s) for session '{}'",
            expectations.len(),
            self.session.session_id()
        );
        context.install_expectations(expectations, self.replace);

        self.monitor.watch_patterns(self.session, patterns).await?;

        if let Some(stop) = self.timed_stop {
            self.monitor
                .stop_after_seconds(self.session, stop.after, stop.target.as_deref())?;
        }
        if let Some(stop) = self.counted_stop {
            self.monitor
                .stop_after_count(self.session, &stop.pattern, stop.expected, stop.timeout)
                .await?;
        }
        Ok(())
    }
}

/// Fluent setup for an [`InterceptionManager`].
///
/// Rules are validated as a batch, registered under one lock and attached to
/// the session. By default the batch replaces every existing rule.
///
/// # Example
///
/// ```ignore
/// let handles = manager
///     .builder(&page)
///     .mock("/api/users", 201, r#"{"status":"mocked"}"#)
///     .rule("slow-search", "/api/search", |r| r.method("GET").delay(Duration::from_secs(2)))
///     .build()
///     .await?;
/// handles[1].disable()?;
/// ```
pub struct InterceptionBuilder<'a> {
    manager: &'a InterceptionManager,
    session: &'a dyn BrowserSession,
    rules: Vec<Result<InterceptionRuleBuilder>>,
    replace: bool,
}

impl<'a> InterceptionBuilder<'a> {
    pub fn new(manager: &'a InterceptionManager, session: &'a dyn BrowserSession) -> Self {
        Self {
            manager,
            session,
            rules: Vec::new(),
            replace: true,
        }
    }

    /// Adds a rule named `name` for `pattern`, configured by `configure`.
    pub fn rule<F>(mut self, name: &str, pattern: &str, configure: F) -> Self
    where
        F: FnOnce(InterceptionRuleBuilder) -> InterceptionRuleBuilder,
    {
        self.rules
            .push(Ok(configure(InterceptionRule::builder(name, pattern))));
        self
    }

    /// Like [`rule`](Self::rule) for configuration that can fail, such as
    /// [`InterceptionRuleBuilder::json`].
    pub fn try_rule<F>(mut self, name: &str, pattern: &str, configure: F) -> Self
    where
        F: FnOnce(InterceptionRuleBuilder) -> Result<InterceptionRuleBuilder>,
    {
        self.rules
            .push(configure(InterceptionRule::builder(name, pattern)));
        self
    }

    /// Answers requests matching `pattern` with `status` and `body`.
    pub fn mock(self, pattern: &str, status: u16, body: &str) -> Self {
        let body = body.to_string();
        self.rule(&format!("mock:{pattern}"), pattern, move |r| {
            r.status(status).body(body)
        })
    }

    /// Answers requests matching `pattern` with 408 after `delay`.
    pub fn timeout(self, pattern: &str, delay: Duration) -> Self {
        self.rule(&format!("timeout:{pattern}"), pattern, move |r| {
            r.status(408)
                .delay(delay)
                .body(r#"{"error":"Request Timeout"}"#)
        })
    }

    /// Keeps previously registered rules instead of replacing them.
    pub fn keep_existing_rules(mut self) -> Self {
        self.replace = false;
        self
    }

    /// Registers the batch and attaches every enabled rule to the session.
    ///
    /// Returns one handle per rule, in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns an error, before changing any state, if a rule is invalid or
    /// two rules in the batch share a name.
    pub async fn build(self) -> Result<Vec<RuleHandle>> {
        let context = self.manager.context();
        let content_type = context.options().content_type().to_string();

        let mut names = HashSet::new();
        let mut batch = Vec::with_capacity(self.rules.len());
        for builder in self.rules {
            let rule = builder?.build_with_content_type(&content_type)?;
            if !names.insert(rule.name().to_string()) {
                return Err(Error::InvalidArgument(format!(
                    "Duplicate rule name '{}' in interception setup",
                    rule.name()
                )));
            }
            batch.push(Arc::new(rule));
        }

        tracing::info!(
            "Installing {} interception rule(s) for session '{}'",
            batch.len(),
            self.session.session_id()
        );
        context.install_rules(batch.clone(), self.replace);

        let mut handles = Vec::with_capacity(batch.len());
        for rule in &batch {
            if rule.is_enabled() {
                attach_rule(context, self.session, rule).await?;
            }
            handles.push(self.manager.handle(rule.name().to_string()));
        }
        Ok(handles)
    }
}
