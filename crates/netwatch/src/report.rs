// Monitoring summaries and network reports

use crate::context::NetworkContext;
use crate::error::{Error, Result};
use crate::exchange::ExchangeRecord;
use serde::Serialize;

/// How many captured exchanges one expectation matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationSummary {
    pub pattern: String,
    pub checks: Vec<String>,
    pub matched: usize,
}

/// Captured vs. expected exchanges at one point in time.
///
/// Successful when every expectation matched at least one captured exchange,
/// no validation failure was raised and no failure is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub captured: usize,
    pub mocked: usize,
    pub expectations: Vec<ExpectationSummary>,
    pub validation_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_failure: Option<String>,
    pub success: bool,
}

impl MonitoringSummary {
    pub fn collect(context: &NetworkContext) -> Self {
        let history = context.history();
        let expectations: Vec<ExpectationSummary> = context
            .expectations()
            .iter()
            .map(|expectation| ExpectationSummary {
                pattern: expectation.pattern().to_string(),
                checks: expectation.describe(),
                matched: history.count_matching(expectation.pattern()),
            })
            .collect();
        let validation_failures = context.validation_failure_count();
        let pending_failure = context.pending_failure();
        let success = expectations.iter().all(|e| e.matched > 0)
            && validation_failures == 0
            && pending_failure.is_none();

        Self {
            scenario: context.scenario_name(),
            captured: history.len(),
            mocked: history.mocked().len(),
            expectations,
            validation_failures,
            pending_failure,
            success,
        }
    }

    /// Expectations no captured exchange matched.
    pub fn unmet(&self) -> impl Iterator<Item = &ExpectationSummary> {
        self.expectations.iter().filter(|e| e.matched == 0)
    }

    pub fn log(&self) {
        if self.success {
            tracing::info!(
                "Network monitoring passed: {} exchange(s) captured ({} mocked), {} expectation(s) met",
                self.captured,
                self.mocked,
                self.expectations.len()
            );
            return;
        }
        tracing::warn!(
            "Network monitoring failed: {} exchange(s) captured, {} validation failure(s)",
            self.captured,
            self.validation_failures
        );
        for unmet in self.unmet() {
            tracing::warn!("  no exchange matched '{}'", unmet.pattern);
        }
        if let Some(pending) = &self.pending_failure {
            tracing::warn!("  pending failure: {}", pending);
        }
    }

    /// Returns [`Error::MonitoringFailed`] unless the summary is successful.
    pub fn ensure_success(&self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let mut problems: Vec<String> = self
            .unmet()
            .map(|unmet| format!("no exchange matched '{}'", unmet.pattern))
            .collect();
        if self.validation_failures > 0 {
            problems.push(format!(
                "{} validation failure(s)",
                self.validation_failures
            ));
        }
        if let Some(pending) = &self.pending_failure {
            problems.push(format!("pending failure: {pending}"));
        }
        Err(Error::MonitoringFailed(problems.join("; ")))
    }
}

/// One registered interception rule as seen in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSummary {
    pub name: String,
    pub pattern: String,
    pub method: String,
    pub status: u16,
    pub enabled: bool,
    pub body_source: String,
    pub delay_millis: u64,
    pub rewrites_requests: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_code: Option<String>,
    /// Recorded exchanges the rule's patterns match.
    pub intercept_count: usize,
}

/// Full serializable snapshot of a context: exchanges, expectations, rules
/// and warnings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkReport {
    pub summary: MonitoringSummary,
    pub exchanges: Vec<ExchangeRecord>,
    pub rules: Vec<RuleSummary>,
    pub warnings: Vec<String>,
}

impl NetworkReport {
    pub fn collect(context: &NetworkContext) -> Self {
        let exchanges: Vec<ExchangeRecord> = context
            .history()
            .snapshot()
            .iter()
            .map(|record| record.as_ref().clone())
            .collect();

        let rules = context
            .rules()
            .iter()
            .map(|rule| RuleSummary {
                name: rule.name().to_string(),
                pattern: rule.pattern().to_string(),
                method: rule.method_pattern().to_string(),
                status: rule.status(),
                enabled: rule.is_enabled(),
                body_source: rule.body_source().to_string(),
                delay_millis: rule.delay().as_millis() as u64,
                rewrites_requests: rule.has_request_interceptor(),
                abort_code: rule.abort_code().map(str::to_string),
                intercept_count: exchanges
                    .iter()
                    .filter(|record| {
                        rule.pattern().is_match(&record.url)
                            && rule.matches_method(&record.http_method)
                    })
                    .count(),
            })
            .collect();

        Self {
            summary: MonitoringSummary::collect(context),
            exchanges,
            rules,
            warnings: context.warnings(),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
