// Network context - state shared by the monitor, the interception manager
// and their listeners for one test run.
//
// Each collection is independently consistent. Nothing links a rule to its
// history entries; reports re-match patterns at read time.

use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::exchange::ExchangeHistory;
use crate::expectation::Expectation;
use crate::rule::InterceptionRule;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared engine state for one test run.
///
/// Cloning is cheap and every clone sees the same state. Create one per
/// run (or per worker) and pass it to [`ResponseMonitor`](crate::ResponseMonitor)
/// and [`InterceptionManager`](crate::InterceptionManager).
#[derive(Clone, Default)]
pub struct NetworkContext {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    options: EngineOptions,
    scenario: RwLock<Option<String>>,
    history: ExchangeHistory,
    expectations: RwLock<Vec<Arc<Expectation>>>,
    rules: RwLock<Vec<Arc<InterceptionRule>>>,
    /// Single slot, last write wins
    pending_failure: Mutex<Option<String>>,
    warnings: Mutex<Vec<String>>,
    validation_failures: AtomicUsize,
}

impl NetworkContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                options,
                ..Default::default()
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    // ---- scenario lifecycle ----

    /// Resets all state for a new scenario.
    pub fn begin_scenario(&self, name: impl Into<String>) {
        let name = name.into();
        tracing::info!("Starting network scenario '{}'", name);
        self.reset_monitoring_state();
        self.clear_expectations();
        self.clear_rules();
        *self.inner.scenario.write() = Some(name);
    }

    /// Drops every monitoring outcome: history, warnings, the validation
    /// failure count and any staged failure. Expectations and rules stay.
    pub fn reset_monitoring_state(&self) {
        self.clear_history();
        self.inner.warnings.lock().clear();
        self.inner.validation_failures.store(0, Ordering::SeqCst);
        self.reset_pending_failure();
    }

    /// Ends the current scenario, surfacing any staged failure.
    pub fn end_scenario(&self) -> Result<()> {
        let name = self.inner.scenario.write().take();
        tracing::debug!("Ending network scenario {:?}", name);
        self.check_and_throw_pending_failure()
    }

    pub fn scenario_name(&self) -> Option<String> {
        self.inner.scenario.read().clone()
    }

    // ---- history ----

    pub fn history(&self) -> &ExchangeHistory {
        &self.inner.history
    }

    pub fn clear_history(&self) {
        self.inner.history.clear();
    }

    // ---- expectations ----

    /// Registers `expectation`, replacing one with the same pattern in place.
    pub fn register_expectation(&self, expectation: Expectation) {
        let mut expectations = self.inner.expectations.write();
        upsert_expectation(&mut expectations, expectation);
    }

    /// Swaps in a whole batch under one write lock.
    ///
    /// With `replace` set, prior expectations are dropped first, so no
    /// listener ever observes a mix of old and new configuration.
    pub fn install_expectations(&self, batch: Vec<Expectation>, replace: bool) {
        let mut expectations = self.inner.expectations.write();
        if replace {
            expectations.clear();
        }
        for expectation in batch {
            upsert_expectation(&mut expectations, expectation);
        }
    }

    pub fn expectations(&self) -> Vec<Arc<Expectation>> {
        self.inner.expectations.read().clone()
    }

    /// First registered expectation whose pattern matches `url`.
    pub fn expectation_for(&self, url: &str) -> Option<Arc<Expectation>> {
        self.inner
            .expectations
            .read()
            .iter()
            .find(|expectation| expectation.applies_to(url))
            .cloned()
    }

    pub fn clear_expectations(&self) {
        self.inner.expectations.write().clear();
    }

    // ---- rules ----

    /// Registers `rule`, returning the rule it replaced (same name), if any.
    pub fn insert_rule(&self, rule: Arc<InterceptionRule>) -> Option<Arc<InterceptionRule>> {
        let mut rules = self.inner.rules.write();
        upsert_rule(&mut rules, rule)
    }

    /// Swaps in a batch of rules under one write lock.
    pub fn install_rules(&self, batch: Vec<Arc<InterceptionRule>>, replace: bool) {
        let mut rules = self.inner.rules.write();
        if replace {
            rules.clear();
        }
        for rule in batch {
            upsert_rule(&mut rules, rule);
        }
    }

    pub fn rule(&self, name: &str) -> Option<Arc<InterceptionRule>> {
        self.inner
            .rules
            .read()
            .iter()
            .find(|rule| rule.name() == name)
            .cloned()
    }

    pub fn remove_rule(&self, name: &str) -> Option<Arc<InterceptionRule>> {
        let mut rules = self.inner.rules.write();
        let index = rules.iter().position(|rule| rule.name() == name)?;
        Some(rules.remove(index))
    }

    pub fn rules(&self) -> Vec<Arc<InterceptionRule>> {
        self.inner.rules.read().clone()
    }

    pub fn clear_rules(&self) {
        self.inner.rules.write().clear();
    }

    // ---- cross-thread failures ----

    /// Stages a failure detected off the test thread.
    ///
    /// Only one failure is held. Staging another before the first is drained
    /// replaces it; the lost message is logged and kept in the warnings.
    pub fn set_pending_failure(&self, message: impl Into<String>) {
        let message = message.into();
        let previous = self.inner.pending_failure.lock().replace(message);
        if let Some(lost) = previous {
            tracing::warn!("Pending network failure overwritten before delivery: {}", lost);
            self.add_warning(format!("Overwritten pending failure: {lost}"));
        }
    }

    /// Removes and returns the staged failure.
    pub fn take_pending_failure(&self) -> Option<String> {
        self.inner.pending_failure.lock().take()
    }

    /// The staged failure, left in place.
    pub fn pending_failure(&self) -> Option<String> {
        self.inner.pending_failure.lock().clone()
    }

    pub fn has_pending_failure(&self) -> bool {
        self.inner.pending_failure.lock().is_some()
    }

    /// Poll point for the test lifecycle: returns (and clears) the staged failure.
    pub fn check_and_throw_pending_failure(&self) -> Result<()> {
        match self.take_pending_failure() {
            Some(message) => Err(Error::PendingFailure(message)),
            None => Ok(()),
        }
    }

    /// Discards any staged failure without reporting it.
    pub fn reset_pending_failure(&self) {
        if let Some(dropped) = self.take_pending_failure() {
            tracing::debug!("Discarding pending network failure: {}", dropped);
        }
    }

    // ---- warnings and counters ----

    pub fn add_warning(&self, warning: impl Into<String>) {
        self.inner.warnings.lock().push(warning.into());
    }

    pub fn warnings(&self) -> Vec<String> {
        self.inner.warnings.lock().clone()
    }

    pub(crate) fn record_validation_failure(&self) {
        self.inner.validation_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of validation failures raised since the scenario began.
    pub fn validation_failure_count(&self) -> usize {
        self.inner.validation_failures.load(Ordering::SeqCst)
    }
}

fn upsert_expectation(expectations: &mut Vec<Arc<Expectation>>, expectation: Expectation) {
    let expectation = Arc::new(expectation);
    match expectations
        .iter_mut()
        .find(|existing| existing.pattern() == expectation.pattern())
    {
        Some(slot) => *slot = expectation,
        None => expectations.push(expectation),
    }
}

fn upsert_rule(
    rules: &mut Vec<Arc<InterceptionRule>>,
    rule: Arc<InterceptionRule>,
) -> Option<Arc<InterceptionRule>> {
    match rules.iter_mut().find(|existing| existing.name() == rule.name()) {
        Some(slot) => Some(std::mem::replace(slot, rule)),
        None => {
            rules.push(rule);
            None
        }
    }
}

impl std::fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkContext")
            .field("scenario", &self.scenario_name())
            .field("exchanges", &self.inner.history.len())
            .field("expectations", &self.inner.expectations.read().len())
            .field("rules", &self.inner.rules.read().len())
            .field("pending_failure", &self.has_pending_failure())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::tests::record;

    #[test]
    fn test_pending_failure_roundtrip() {
        let context = NetworkContext::new();
        assert!(context.check_and_throw_pending_failure().is_ok());

        context.set_pending_failure("no login response");
        assert!(context.has_pending_failure());
        let err = context.check_and_throw_pending_failure().unwrap_err();
        assert!(matches!(err, Error::PendingFailure(ref m) if m == "no login response"));
        assert!(context.check_and_throw_pending_failure().is_ok());
    }

    #[test]
    fn test_pending_failure_last_write_wins() {
        let context = NetworkContext::new();
        context.set_pending_failure("first");
        context.set_pending_failure("second");

        assert_eq!(context.take_pending_failure().as_deref(), Some("second"));
        assert_eq!(context.warnings(), ["Overwritten pending failure: first"]);
    }

    #[test]
    fn test_reset_monitoring_state_keeps_configuration() {
        let context = NetworkContext::new();
        context.register_expectation(
            Expectation::builder("/login")
                .status_code(200)
                .build()
                .unwrap(),
        );
        context.history().append(record("POST", "https://x/login", 500));
        context.record_validation_failure();
        context.add_warning("slow login");
        context.set_pending_failure("late");

        context.reset_monitoring_state();
        assert!(context.history().is_empty());
        assert_eq!(context.validation_failure_count(), 0);
        assert!(context.warnings().is_empty());
        assert!(!context.has_pending_failure());
        assert_eq!(context.expectations().len(), 1);
    }

    #[test]
    fn test_expectation_same_pattern_replaced_in_place() {
        let context = NetworkContext::new();
        context.register_expectation(Expectation::builder("/a").status_code(200).build().unwrap());
        context.register_expectation(Expectation::builder("/b").status_code(200).build().unwrap());
        context.register_expectation(Expectation::builder("/a").status_code(201).build().unwrap());

        let expectations = context.expectations();
        assert_eq!(expectations.len(), 2);
        assert_eq!(expectations[0].status_code(), Some(201));
    }

    #[test]
    fn test_first_matching_expectation_wins() {
        let context = NetworkContext::new();
        context.install_expectations(
            vec![
                Expectation::builder("/api").status_code(200).build().unwrap(),
                Expectation::builder("/api/users").status_code(201).build().unwrap(),
            ],
            true,
        );
        let chosen = context.expectation_for("https://x/api/users").unwrap();
        assert_eq!(chosen.status_code(), Some(200));
    }

    #[test]
    fn test_rule_registry() {
        let context = NetworkContext::new();
        let first = Arc::new(InterceptionRule::builder("users", "/users").build().unwrap());
        let second = Arc::new(
            InterceptionRule::builder("users", "/users")
                .status(500)
                .build()
                .unwrap(),
        );
        assert!(context.insert_rule(first).is_none());
        assert!(context.insert_rule(second).is_some());
        assert_eq!(context.rule("users").unwrap().status(), 500);

        assert!(context.remove_rule("users").is_some());
        assert!(context.remove_rule("users").is_none());
    }

    #[test]
    fn test_begin_scenario_resets_everything() {
        let context = NetworkContext::new();
        context.history().append(record("GET", "https://x/", 200));
        context.register_expectation(Expectation::builder("/").build().unwrap());
        context.set_pending_failure("stale");
        context.add_warning("stale warning");

        context.begin_scenario("checkout");
        assert!(context.history().is_empty());
        assert!(context.expectations().is_empty());
        assert!(!context.has_pending_failure());
        assert!(context.warnings().is_empty());
        assert_eq!(context.scenario_name().as_deref(), Some("checkout"));

        context.set_pending_failure("late timeout");
        assert!(context.end_scenario().is_err());
        assert_eq!(context.scenario_name(), None);
    }
}
