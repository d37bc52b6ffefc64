// Interception manager
//
// Active intervention: route handlers attached to a session suspend matching
// requests and either answer them from a rule (mock), fail them (abort) or
// forward them, optionally rewritten. Every intercepted request is recorded in the shared
// history before it is answered or forwarded.

use crate::context::NetworkContext;
use crate::driver::{
    BrowserSession, ContinueOptions, FulfillOptions, InterceptedRoute, RequestInfo, route_handler,
};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeRecord, next_request_id, now_millis};
use crate::pattern::UrlPattern;
use crate::rule::{InterceptionRule, InterceptionRuleBuilder, RequestOverride};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Explicit handle to one registered rule.
///
/// Returned by every registration call so a rule can be toggled or removed
/// without relying on registration order.
#[derive(Debug, Clone)]
pub struct RuleHandle {
    name: String,
    context: NetworkContext,
}

impl RuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The live rule, or `None` once it has been removed.
    pub fn rule(&self) -> Option<Arc<InterceptionRule>> {
        self.context.rule(&self.name)
    }

    pub fn is_enabled(&self) -> bool {
        self.rule().is_some_and(|rule| rule.is_enabled())
    }

    pub fn enable(&self) -> Result<()> {
        set_enabled(&self.context, &self.name, true)
    }

    pub fn disable(&self) -> Result<()> {
        set_enabled(&self.context, &self.name, false)
    }

    /// Unregisters the rule. Attached route handlers forward from now on.
    pub fn remove(&self) -> Result<()> {
        remove_rule(&self.context, &self.name)
    }

    /// Number of recorded exchanges this rule's patterns match.
    pub fn intercept_count(&self) -> usize {
        self.rule()
            .map(|rule| intercepted_by(&self.context, &rule).len())
            .unwrap_or(0)
    }
}

/// Registers interception rules and attaches them to browser sessions.
///
/// # Example
///
/// ```ignore
/// use netwatch::{InterceptionManager, NetworkContext};
///
/// let manager = InterceptionManager::new(NetworkContext::new());
/// manager.mock_response(".*/users.*", 201, r#"{"status":"mocked"}"#)?;
/// manager.apply_to(&page).await?;
/// ```
#[derive(Debug, Clone)]
pub struct InterceptionManager {
    context: NetworkContext,
}

impl InterceptionManager {
    pub fn new(context: NetworkContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    /// Registers `rule`, replacing any rule with the same name.
    pub fn register_rule(&self, rule: InterceptionRule) -> RuleHandle {
        let name = rule.name().to_string();
        tracing::info!(
            "Registered interception rule '{}' for {}",
            name,
            rule.pattern()
        );
        if self.context.insert_rule(Arc::new(rule)).is_some() {
            tracing::warn!("Interception rule '{}' replaced an existing rule", name);
        }
        self.handle(name)
    }

    /// Builds (with the configured default content type) and registers a rule.
    pub fn register(&self, builder: InterceptionRuleBuilder) -> Result<RuleHandle> {
        let rule = builder.build_with_content_type(self.context.options().content_type())?;
        Ok(self.register_rule(rule))
    }

    /// Unregisters the rule called `name`.
    pub fn remove_rule(&self, name: &str) -> Result<()> {
        remove_rule(&self.context, name)
    }

    pub fn clear_all_rules(&self) {
        tracing::info!("Clearing all interception rules");
        self.context.clear_rules();
    }

    pub fn enable_rule(&self, name: &str) -> Result<()> {
        set_enabled(&self.context, name, true)
    }

    pub fn disable_rule(&self, name: &str) -> Result<()> {
        set_enabled(&self.context, name, false)
    }

    pub fn rule(&self, name: &str) -> Option<RuleHandle> {
        self.context.rule(name).map(|_| self.handle(name.to_string()))
    }

    pub fn rules(&self) -> Vec<Arc<InterceptionRule>> {
        self.context.rules()
    }

    /// Attaches a route handler for every enabled rule. Returns how many were attached.
    ///
    /// Rules disabled at this point are skipped; a rule disabled later keeps
    /// its handler, which then forwards requests untouched.
    pub async fn apply_to(&self, session: &dyn BrowserSession) -> Result<usize> {
        let mut attached = 0;
        for rule in self.context.rules() {
            if !rule.is_enabled() {
                tracing::debug!("Skipping disabled rule '{}'", rule.name());
                continue;
            }
            attach_rule(&self.context, session, &rule).await?;
            attached += 1;
        }
        tracing::info!(
            "Applied {} interception rule(s) to session '{}'",
            attached,
            session.session_id()
        );
        Ok(attached)
    }

    /// Attaches a route handler for the single rule called `name`.
    pub async fn apply_rule_to(&self, session: &dyn BrowserSession, name: &str) -> Result<()> {
        let rule = self
            .context
            .rule(name)
            .ok_or_else(|| Error::RuleNotFound(name.to_string()))?;
        attach_rule(&self.context, session, &rule).await
    }

    /// Recorded exchanges matching the patterns of rule `name`.
    pub fn intercepted_exchanges(&self, name: &str) -> Result<Vec<Arc<ExchangeRecord>>> {
        let rule = self
            .context
            .rule(name)
            .ok_or_else(|| Error::RuleNotFound(name.to_string()))?;
        Ok(intercepted_by(&self.context, &rule))
    }

    /// True if any recorded exchange matches `pattern`.
    pub fn was_intercepted(&self, pattern: &str) -> Result<bool> {
        let pattern = UrlPattern::new(pattern)?;
        Ok(self.context.history().count_matching(&pattern) > 0)
    }

    // ---- one-line rules ----

    /// Answers matching requests with `status` and `body`.
    pub fn mock_response(&self, pattern: &str, status: u16, body: &str) -> Result<RuleHandle> {
        self.register(
            InterceptionRule::builder(format!("mock:{pattern}"), pattern)
                .status(status)
                .body(body),
        )
    }

    /// Answers matching requests with 200 and `body`.
    pub fn mock_success(&self, pattern: &str, body: &str) -> Result<RuleHandle> {
        self.mock_response(pattern, 200, body)
    }

    /// Answers matching requests with an error `status` and `body`.
    ///
    /// Registered under its own name, so it can coexist with a
    /// [`mock_response`](Self::mock_response) for the same pattern.
    pub fn mock_error(&self, pattern: &str, status: u16, body: &str) -> Result<RuleHandle> {
        self.register(
            InterceptionRule::builder(format!("error:{pattern}"), pattern)
                .status(status)
                .body(body),
        )
    }

    /// Answers matching requests with 408 after `delay`.
    pub fn simulate_timeout(&self, pattern: &str, delay: Duration) -> Result<RuleHandle> {
        self.register(
            InterceptionRule::builder(format!("timeout:{pattern}"), pattern)
                .status(408)
                .delay(delay)
                .body(r#"{"error":"Request Timeout"}"#),
        )
    }

    /// Fails matching requests as if the client blocked them.
    pub fn block_request(&self, pattern: &str) -> Result<RuleHandle> {
        self.register(
            InterceptionRule::builder(format!("block:{pattern}"), pattern).abort("blockedbyclient"),
        )
    }

    /// Answers matching requests with a body computed from the request.
    pub fn mock_dynamic<F>(&self, pattern: &str, generator: F) -> Result<RuleHandle>
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        self.register(
            InterceptionRule::builder(format!("dynamic:{pattern}"), pattern).generator(generator),
        )
    }

    /// Forwards matching requests with header `name` set to `value`.
    pub fn modify_request_header(
        &self,
        pattern: &str,
        name: &str,
        value: &str,
    ) -> Result<RuleHandle> {
        let (name, value) = (name.to_string(), value.to_string());
        self.register(
            InterceptionRule::builder(format!("header:{name}:{pattern}"), pattern)
                .request_interceptor(move |request| {
                    let mut headers = request.headers.clone();
                    headers.insert(name.clone(), value.clone());
                    Some(RequestOverride {
                        headers: Some(headers),
                        ..Default::default()
                    })
                }),
        )
    }

    /// Forwards matching requests with `body` as their POST data.
    pub fn modify_request_body(&self, pattern: &str, body: &str) -> Result<RuleHandle> {
        let body = body.to_string();
        self.register(
            InterceptionRule::builder(format!("body:{pattern}"), pattern).request_interceptor(
                move |_request| {
                    Some(RequestOverride {
                        body: Some(body.clone()),
                        ..Default::default()
                    })
                },
            ),
        )
    }

    /// Forwards matching requests with `name=value` appended to the query string.
    pub fn add_query_parameter(
        &self,
        pattern: &str,
        name: &str,
        value: &str,
    ) -> Result<RuleHandle> {
        let (name, value) = (name.to_string(), value.to_string());
        self.register(
            InterceptionRule::builder(format!("query:{name}:{pattern}"), pattern)
                .request_interceptor(move |request| {
                    match url::Url::parse(&request.url) {
                        Ok(mut url) => {
                            url.query_pairs_mut().append_pair(&name, &value);
                            Some(RequestOverride {
                                url: Some(url.to_string()),
                                ..Default::default()
                            })
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Cannot add query parameter to '{}': {}",
                                request.url,
                                e
                            );
                            None
                        }
                    }
                }),
        )
    }

    /// Forwards matching requests with their method replaced by `method`.
    pub fn modify_request_method(&self, pattern: &str, method: &str) -> Result<RuleHandle> {
        let method = method.to_uppercase();
        self.register(
            InterceptionRule::builder(format!("method:{pattern}"), pattern).request_interceptor(
                move |_request| {
                    Some(RequestOverride {
                        method: Some(method.clone()),
                        ..Default::default()
                    })
                },
            ),
        )
    }

    pub(crate) fn handle(&self, name: String) -> RuleHandle {
        RuleHandle {
            name,
            context: self.context.clone(),
        }
    }
}

/// What a rule does with one intercepted request.
enum RouteDecision {
    Forward,
    Rewrite(ContinueOptions),
    Abort(String),
    Mock(FulfillOptions),
}

pub(crate) async fn attach_rule(
    context: &NetworkContext,
    session: &dyn BrowserSession,
    rule: &InterceptionRule,
) -> Result<()> {
    let context = context.clone();
    let rule_name = rule.name().to_string();
    let attached = rule.pattern().clone();
    let session_id = session.session_id().to_string();

    tracing::debug!(
        "Attaching rule '{}' ({}) to session '{}'",
        rule_name,
        rule.pattern(),
        session_id
    );

    session
        .route(
            rule.pattern().clone(),
            route_handler(move |route| {
                let context = context.clone();
                let rule_name = rule_name.clone();
                let attached = attached.clone();
                let session_id = session_id.clone();
                async move {
                    handle_route(&context, &rule_name, &attached, &session_id, route).await
                }
            }),
        )
        .await
}

/// Route handler body shared by every attached rule.
///
/// The handler stays scoped to the pattern it was attached with: once the
/// rule is re-registered under a different pattern, it forwards untouched.
async fn handle_route(
    context: &NetworkContext,
    rule_name: &str,
    attached: &UrlPattern,
    session_id: &str,
    route: Arc<dyn InterceptedRoute>,
) -> Result<()> {
    let request = route.request().clone();

    let Some(rule) = context.rule(rule_name) else {
        tracing::debug!("Rule '{}' was removed; forwarding {}", rule_name, request.url);
        return route.continue_(None).await;
    };
    if !rule.is_enabled() {
        tracing::debug!("Rule '{}' is disabled; forwarding {}", rule_name, request.url);
        return route.continue_(None).await;
    }
    if rule.pattern() != attached || !rule.pattern().is_match(&request.url) {
        tracing::debug!(
            "Rule '{}' now targets {}; stale handler for {} forwards {}",
            rule_name,
            rule.pattern(),
            attached,
            request.url
        );
        return route.continue_(None).await;
    }

    let decision = decide(&rule, &request).await;
    context
        .history()
        .append(intercept_record(session_id, &request, &rule, &decision));

    match decision {
        RouteDecision::Rewrite(overrides) => {
            tracing::debug!("Rule '{}' rewrote {} {}", rule_name, request.method, request.url);
            route.continue_(Some(overrides)).await
        }
        RouteDecision::Abort(code) => {
            if !rule.delay().is_zero() {
                tokio::time::sleep(rule.delay()).await;
            }
            tracing::debug!(
                "Rule '{}' aborted {} {} with '{}'",
                rule_name,
                request.method,
                request.url,
                code
            );
            route.abort(Some(code.as_str())).await
        }
        RouteDecision::Mock(response) => {
            if !rule.delay().is_zero() {
                tokio::time::sleep(rule.delay()).await;
            }
            tracing::debug!(
                "Rule '{}' fulfilled {} {} with {}",
                rule_name,
                request.method,
                request.url,
                response.status
            );
            route.fulfill(response).await
        }
        RouteDecision::Forward => {
            if rule.matches_method(&request.method) && !rule.delay().is_zero() {
                tokio::time::sleep(rule.delay()).await;
            }
            tracing::debug!("Rule '{}' forwarded {} {}", rule_name, request.method, request.url);
            route.continue_(None).await
        }
    }
}

/// Method filter, then request rewrite, then abort, then mock payload.
///
/// A rewrite that changes nothing forwards the request as is.
async fn decide(rule: &InterceptionRule, request: &RequestInfo) -> RouteDecision {
    if !rule.matches_method(&request.method) {
        return RouteDecision::Forward;
    }
    if let Some(replacement) = rule.intercept_request(request) {
        let overrides = replacement.into_continue_options();
        if overrides.is_empty() {
            return RouteDecision::Forward;
        }
        return RouteDecision::Rewrite(overrides);
    }
    if let Some(code) = rule.abort_code() {
        return RouteDecision::Abort(code.to_string());
    }
    match rule.resolve_body(request).await {
        Some(body) => RouteDecision::Mock(
            FulfillOptions::builder()
                .status(rule.status())
                .headers(rule.headers().clone())
                .body_string(body)
                .build(),
        ),
        None => RouteDecision::Forward,
    }
}

fn intercept_record(
    session_id: &str,
    request: &RequestInfo,
    rule: &InterceptionRule,
    decision: &RouteDecision,
) -> ExchangeRecord {
    let (status_code, response_headers, response_body, response_time_millis, mocked) =
        match decision {
            RouteDecision::Mock(response) => (
                Some(response.status),
                response.headers.clone(),
                response.body_text(),
                Some(rule.delay().as_millis() as u64),
                true,
            ),
            _ => (None, HashMap::new(), None, None, false),
        };

    ExchangeRecord {
        request_id: request.id.clone().unwrap_or_else(next_request_id),
        session_id: session_id.to_string(),
        url: request.url.clone(),
        http_method: request.method.clone(),
        timestamp_millis: now_millis(),
        request_headers: request.headers.clone(),
        request_body: request.post_data.clone(),
        status_code,
        response_headers,
        response_body,
        response_time_millis,
        mocked,
    }
}

fn intercepted_by(context: &NetworkContext, rule: &InterceptionRule) -> Vec<Arc<ExchangeRecord>> {
    context
        .history()
        .by_url_pattern(rule.pattern())
        .into_iter()
        .filter(|record| rule.matches_method(&record.http_method))
        .collect()
}

fn set_enabled(context: &NetworkContext, name: &str, enabled: bool) -> Result<()> {
    let rule = context
        .rule(name)
        .ok_or_else(|| Error::RuleNotFound(name.to_string()))?;
    rule.set_enabled(enabled);
    tracing::info!(
        "Interception rule '{}' {}",
        name,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn remove_rule(context: &NetworkContext, name: &str) -> Result<()> {
    context
        .remove_rule(name)
        .ok_or_else(|| Error::RuleNotFound(name.to_string()))?;
    tracing::info!("Removed interception rule '{}'", name);
    Ok(())
}
