// Response monitor
//
// Passive observation: listeners attached to a browser session capture
// matching responses into the shared history and validate them against the
// registered expectations as they arrive.
//
// Drivers cannot remove a response listener. Stopping a session therefore
// flips a flag that every listener checks on entry; a stopped listener keeps
// being called and does nothing. Listeners already running when the flag
// flips finish normally.

use crate::context::NetworkContext;
use crate::driver::{BrowserSession, NetworkResponse, response_handler};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeRecord, next_request_id, now_millis};
use crate::pattern::UrlPattern;
use crate::report::MonitoringSummary;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Monitoring state for one browser session.
///
/// A new generation is started when a session is watched again after it
/// was stopped, or when a replacing builder reconfigures it; listeners from
/// the earlier generation stay inert.
#[derive(Debug)]
pub struct MonitorSession {
    session_id: String,
    stopped: AtomicBool,
    /// Replaced by a newer generation; its timers report nothing
    retired: AtomicBool,
    listeners: AtomicUsize,
}

impl MonitorSession {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            stopped: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            listeners: AtomicUsize::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of listeners attached for this generation.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Marks the session stopped. Returns false if it already was.
    fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.stop();
    }
}

/// Watches browser sessions for responses and validates them.
///
/// # Example
///
/// ```ignore
/// use netwatch::{Expectation, NetworkContext, ResponseMonitor};
///
/// let context = NetworkContext::new();
/// let monitor = ResponseMonitor::new(context.clone());
///
/// context.register_expectation(Expectation::builder("/auth/login").status_code(200).build()?);
/// monitor.watch(&page, "/auth/login").await?;
/// // ... drive the page ...
/// monitor.assert_monitoring_result()?;
/// ```
#[derive(Clone)]
pub struct ResponseMonitor {
    context: NetworkContext,
    sessions: Arc<Mutex<HashMap<String, Arc<MonitorSession>>>>,
    timers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ResponseMonitor {
    pub fn new(context: NetworkContext) -> Self {
        Self {
            context,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            timers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    /// Captures responses whose URL matches `pattern` (plain path or regex).
    ///
    /// Each captured response is appended to the history and validated
    /// against the first registered expectation whose pattern matches its
    /// URL. A validation failure is returned from the listener, so it
    /// surfaces from the driver call that dispatched the response.
    pub async fn watch(&self, session: &dyn BrowserSession, pattern: &str) -> Result<()> {
        let pattern = UrlPattern::new(pattern)?;
        self.watch_patterns(session, vec![pattern]).await
    }

    /// Captures every response the session receives.
    pub async fn watch_all(&self, session: &dyn BrowserSession) -> Result<()> {
        self.watch_patterns(session, vec![UrlPattern::match_all()]).await
    }

    /// Attaches one listener capturing responses that match any of `patterns`.
    pub async fn watch_patterns(
        &self,
        session: &dyn BrowserSession,
        patterns: Vec<UrlPattern>,
    ) -> Result<()> {
        if patterns.is_empty() {
            return Err(Error::InvalidArgument(
                "watch requires at least one URL pattern".to_string(),
            ));
        }
        let state = self.active_session(session.session_id());
        let patterns = Arc::new(patterns);
        let context = self.context.clone();

        tracing::info!(
            "Watching session '{}' for {}",
            state.session_id(),
            describe_patterns(&patterns)
        );

        let listener_state = state.clone();
        session
            .on_response(response_handler(move |response| {
                let context = context.clone();
                let state = listener_state.clone();
                let patterns = patterns.clone();
                async move { handle_response(&context, &state, &patterns, response).await }
            }))
            .await?;
        state.listeners.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Stops monitoring `session`. Attached listeners become no-ops.
    pub fn stop(&self, session: &dyn BrowserSession) {
        self.stop_session(session.session_id());
    }

    /// Stops monitoring the session with id `session_id`.
    pub fn stop_session(&self, session_id: &str) {
        let state = self.sessions.lock().get(session_id).cloned();
        match state {
            Some(state) => {
                if state.stop() {
                    tracing::info!("Stopped monitoring session '{}'", session_id);
                }
            }
            None => tracing::debug!("stop: session '{}' is not monitored", session_id),
        }
    }

    /// True if the session's current monitoring generation is stopped.
    pub fn is_stopped(&self, session: &dyn BrowserSession) -> bool {
        self.session_state(session.session_id())
            .is_some_and(|state| state.is_stopped())
    }

    /// Current monitoring state for a session, if it was ever watched.
    pub fn session_state(&self, session_id: &str) -> Option<Arc<MonitorSession>> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Stops `session` after `after`, then checks what was captured meanwhile.
    ///
    /// With a `target` pattern, success means an exchange matching it was
    /// captured on this session since the call. Without one, any exchange
    /// matching a registered expectation counts (or any exchange at all when
    /// no expectations are registered). The outcome is added to the
    /// warnings; a miss is also staged as the pending failure.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is not a valid pattern or no Tokio
    /// runtime is running.
    pub fn stop_after_seconds(
        &self,
        session: &dyn BrowserSession,
        after: Duration,
        target: Option<&str>,
    ) -> Result<()> {
        let target = target.map(UrlPattern::new).transpose()?;
        let runtime = current_runtime("stop_after_seconds")?;
        let state = self.active_session(session.session_id());
        let cursor = self.context.history().cursor();
        let context = self.context.clone();

        tracing::debug!(
            "Session '{}' will stop monitoring in {:?}",
            state.session_id(),
            after
        );

        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if state.stop() {
                tracing::info!(
                    "Stopped monitoring session '{}' after {:?}",
                    state.session_id(),
                    after
                );
            }
            if state.is_retired() {
                return;
            }
            evaluate_timed_stop(&context, &state, cursor, after, target.as_ref());
        });
        self.track_timer(handle);
        Ok(())
    }

    /// Stops `session` as soon as `expected` responses matching `pattern`
    /// have been observed.
    ///
    /// With a `timeout`, failing to reach the count in time stages a pending
    /// failure describing how many responses were seen.
    ///
    /// Listeners run in registration order and the counter stops the
    /// session, so call [`watch`](Self::watch) first: a capture listener
    /// attached after the counter never sees the response that reached the
    /// count. [`MonitorBuilder`](crate::MonitorBuilder) attaches in that
    /// order. Attaching the counter to a session with no capture listener
    /// adds a warning.
    pub async fn stop_after_count(
        &self,
        session: &dyn BrowserSession,
        pattern: &str,
        expected: usize,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if expected == 0 {
            return Err(Error::InvalidArgument(
                "stop_after_count requires an expected count of at least 1".to_string(),
            ));
        }
        let pattern = UrlPattern::new(pattern)?;
        let runtime = match timeout {
            Some(_) => Some(current_runtime("stop_after_count")?),
            None => None,
        };
        let state = self.active_session(session.session_id());
        let counter = Arc::new(AtomicUsize::new(0));
        if state.listener_count() == 0 {
            let message = format!(
                "stop_after_count on session '{}' attached before any watch; \
                 the response reaching the count will not be captured",
                state.session_id()
            );
            tracing::warn!("{}", message);
            self.context.add_warning(message);
        }

        let listener_state = state.clone();
        let listener_counter = counter.clone();
        let listener_pattern = pattern.clone();
        session
            .on_response(response_handler(move |response| {
                let state = listener_state.clone();
                let counter = listener_counter.clone();
                let pattern = listener_pattern.clone();
                async move {
                    if state.is_stopped() || !pattern.is_match(response.url()) {
                        return Ok(());
                    }
                    let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::debug!(
                        "Session '{}': {}/{} responses matching {}",
                        state.session_id(),
                        seen,
                        expected,
                        pattern
                    );
                    if seen >= expected && state.stop() {
                        tracing::info!(
                            "Stopped monitoring session '{}' after {} matching response(s)",
                            state.session_id(),
                            seen
                        );
                    }
                    Ok(())
                }
            }))
            .await?;
        state.listeners.fetch_add(1, Ordering::SeqCst);

        if let (Some(runtime), Some(timeout)) = (runtime, timeout) {
            let context = self.context.clone();
            let handle = runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                let seen = counter.load(Ordering::SeqCst);
                if seen < expected && !state.is_retired() {
                    let message = format!(
                        "Expected {expected} response(s) matching '{pattern}' within {timeout:?}, but observed {seen}"
                    );
                    tracing::warn!("{}", message);
                    context.add_warning(message.clone());
                    context.set_pending_failure(message);
                }
            });
            self.track_timer(handle);
        }
        Ok(())
    }

    /// Aborts every outstanding auto-stop timer.
    pub fn cancel_timers(&self) {
        for handle in self.timers.lock().drain(..) {
            handle.abort();
        }
    }

    /// Number of auto-stop timers that have not fired yet.
    pub fn pending_timer_count(&self) -> usize {
        let mut timers = self.timers.lock();
        timers.retain(|timer| !timer.is_finished());
        timers.len()
    }

    pub fn clear_history(&self) {
        self.context.clear_history();
    }

    pub fn clear_expectations(&self) {
        self.context.clear_expectations();
    }

    /// Poll point: returns the staged cross-thread failure, if any.
    pub fn check_and_throw_pending_failure(&self) -> Result<()> {
        self.context.check_and_throw_pending_failure()
    }

    pub fn reset_pending_failure(&self) {
        self.context.reset_pending_failure();
    }

    /// Summarizes captured vs. expected exchanges and logs the result.
    pub fn log_monitoring_result(&self) -> MonitoringSummary {
        let summary = MonitoringSummary::collect(&self.context);
        summary.log();
        summary
    }

    /// Like [`log_monitoring_result`](Self::log_monitoring_result), but fails
    /// when the summary is not successful.
    pub fn assert_monitoring_result(&self) -> Result<MonitoringSummary> {
        let summary = self.log_monitoring_result();
        summary.ensure_success()?;
        Ok(summary)
    }

    /// Session state to attach new listeners to, starting a fresh
    /// generation if the previous one was stopped.
    fn active_session(&self, session_id: &str) -> Arc<MonitorSession> {
        let mut sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(state) if !state.is_stopped() => state.clone(),
            _ => {
                let state = Arc::new(MonitorSession::new(session_id));
                sessions.insert(session_id.to_string(), state.clone());
                state
            }
        }
    }

    /// Retires the session's current generation, if any, and starts a new
    /// one. Listeners and timers of the old generation go inert.
    pub(crate) fn restart_session(&self, session_id: &str) -> Arc<MonitorSession> {
        let state = Arc::new(MonitorSession::new(session_id));
        let previous = self
            .sessions
            .lock()
            .insert(session_id.to_string(), state.clone());
        if let Some(previous) = previous {
            previous.retire();
            tracing::debug!(
                "Retired {} listener(s) on session '{}'",
                previous.listener_count(),
                session_id
            );
        }
        state
    }

    fn track_timer(&self, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock();
        timers.retain(|timer| !timer.is_finished());
        timers.push(handle);
    }
}

impl std::fmt::Debug for ResponseMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseMonitor")
            .field("sessions", &self.sessions.lock().len())
            .field("timers", &self.timers.lock().len())
            .finish()
    }
}

/// Listener body shared by every `watch*` registration.
async fn handle_response(
    context: &NetworkContext,
    state: &MonitorSession,
    patterns: &[UrlPattern],
    response: Arc<dyn NetworkResponse>,
) -> Result<()> {
    context.check_and_throw_pending_failure()?;

    if state.is_stopped() {
        tracing::trace!(
            "Session '{}' stopped; ignoring {}",
            state.session_id(),
            response.url()
        );
        return Ok(());
    }
    if !patterns.iter().any(|pattern| pattern.is_match(response.url())) {
        return Ok(());
    }

    let record = capture_response(context, state.session_id(), response.as_ref()).await;
    let record = context.history().append(record);
    tracing::debug!(
        "Captured {} {} -> {:?}",
        record.http_method,
        record.url,
        record.status_code
    );

    if let Some(expectation) = context.expectation_for(&record.url) {
        if let Err(failure) = expectation.validate(&record) {
            context.record_validation_failure();
            tracing::warn!("{}", failure);
            return Err(failure.into());
        }
        tracing::debug!("{} {} passed validation", record.http_method, record.url);
    }
    Ok(())
}

/// Builds a record from a driver response. Body and timing are best effort.
async fn capture_response(
    context: &NetworkContext,
    session_id: &str,
    response: &dyn NetworkResponse,
) -> ExchangeRecord {
    let options = context.options();
    let request = response.request();

    let response_body = if options.captures_bodies() {
        match response.text().await {
            Ok(body) => Some(options.truncate_body(body)),
            Err(e) => {
                tracing::warn!("Could not read response body for {}: {}", response.url(), e);
                None
            }
        }
    } else {
        None
    };

    let response_time_millis = response.timing().and_then(|timing| timing.elapsed_millis());
    if response_time_millis.is_none() {
        tracing::debug!("No timing available for {}", response.url());
    }

    ExchangeRecord {
        request_id: request.id.clone().unwrap_or_else(next_request_id),
        session_id: session_id.to_string(),
        url: response.url().to_string(),
        http_method: request.method.clone(),
        timestamp_millis: now_millis(),
        request_headers: request.headers.clone(),
        request_body: request.post_data.clone(),
        status_code: Some(response.status()),
        response_headers: response.headers().clone(),
        response_body,
        response_time_millis,
        mocked: false,
    }
}

/// Decides whether a timed stop saw what it was waiting for.
fn evaluate_timed_stop(
    context: &NetworkContext,
    state: &MonitorSession,
    cursor: usize,
    after: Duration,
    target: Option<&UrlPattern>,
) {
    let captured: Vec<_> = context
        .history()
        .since(cursor)
        .into_iter()
        .filter(|record| record.session_id == state.session_id())
        .collect();

    let (wanted, matched) = match target {
        Some(pattern) => (
            format!("pattern '{pattern}'"),
            captured
                .iter()
                .filter(|record| pattern.is_match(&record.url))
                .count(),
        ),
        None => {
            let expectations = context.expectations();
            if expectations.is_empty() {
                ("any URL".to_string(), captured.len())
            } else {
                (
                    "registered expectations".to_string(),
                    captured
                        .iter()
                        .filter(|record| expectations.iter().any(|e| e.applies_to(&record.url)))
                        .count(),
                )
            }
        }
    };

    if matched > 0 {
        let message = format!(
            "Monitoring of session '{}' stopped after {:?}: captured {} exchange(s) matching {}",
            state.session_id(),
            after,
            matched,
            wanted
        );
        tracing::info!("{}", message);
        context.add_warning(message);
    } else {
        let message = format!(
            "Monitoring of session '{}' stopped after {:?}: no exchange matching {} was captured",
            state.session_id(),
            after,
            wanted
        );
        tracing::warn!("{}", message);
        context.add_warning(message.clone());
        context.set_pending_failure(message);
    }
}

fn current_runtime(operation: &str) -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        Error::InvalidArgument(format!("{operation} requires a running Tokio runtime"))
    })
}

fn describe_patterns(patterns: &[UrlPattern]) -> String {
    patterns
        .iter()
        .map(UrlPattern::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
