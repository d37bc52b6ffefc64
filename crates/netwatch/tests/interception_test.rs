// Integration tests for request interception
//
// Tests cover:
// - Mocked responses (static, dynamic, file-backed, delayed)
// - Request rewriting (headers, body, query, method)
// - Enabling, disabling and removing rules after they are attached
// - Exchange records written for intercepted requests


use netwatch::driver::RequestInfo;
use netwatch::driver::simulated::RouteOutcome;
use netwatch::{Error, InterceptionRule, expect_exchanges};
use std::io::Write;
use std::time::{Duration, Instant};
use test_support::Harness;

// ============================================================================
// Mocking
// ============================================================================

#[tokio::test]
async fn test_mock_users_fulfills_and_records() {
    let h = Harness::new();
    h.manager
        .register(
            InterceptionRule::builder("users", ".*/users.*")
                .status(201)
                .body(r#"{"status":"mocked"}"#),
        )
        .unwrap();
    assert_eq!(h.manager.apply_to(&h.page).await.unwrap(), 1);

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/users"))
        .await
        .unwrap();

    let RouteOutcome::Fulfilled(response) = outcome else {
        panic!("expected a fulfilled route, got {outcome:?}");
    };
    assert_eq!(response.status, 201);
    assert_eq!(response.body_text().as_deref(), Some(r#"{"status":"mocked"}"#));
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );

    let records = h.context.history().snapshot();
    assert_eq!(records.len(), 1);
    assert!(records[0].mocked);
    assert_eq!(records[0].status_code, Some(201));
    assert_eq!(records[0].response_body.as_deref(), Some(r#"{"status":"mocked"}"#));
    assert_eq!(h.manager.intercepted_exchanges("users").unwrap().len(), 1);
}

#[tokio::test]
async fn test_mock_dynamic_uses_request() {
    let h = Harness::new();
    h.manager
        .mock_dynamic("/api/echo", |request| {
            format!(r#"{{"method":"{}"}}"#, request.method)
        })
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("PATCH", "https://app.test/api/echo"))
        .await
        .unwrap();
    let RouteOutcome::Fulfilled(response) = outcome else {
        panic!("expected a fulfilled route");
    };
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text().as_deref(), Some(r#"{"method":"PATCH"}"#));
}

#[tokio::test]
async fn test_body_file_is_read_per_request() {
    let h = Harness::new();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"[{{"id":1}}]"#).unwrap();

    h.manager
        .register(InterceptionRule::builder("fixture", "/api/items").body_file(file.path()))
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/items"))
        .await
        .unwrap();
    let RouteOutcome::Fulfilled(response) = outcome else {
        panic!("expected a fulfilled route");
    };
    assert_eq!(response.body_text().as_deref(), Some(r#"[{"id":1}]"#));
}

#[tokio::test]
async fn test_missing_body_file_forwards() {
    let h = Harness::new();
    h.manager
        .register(
            InterceptionRule::builder("fixture", "/api/items")
                .body_file("/nonexistent/netwatch/fixture.json"),
        )
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/items"))
        .await
        .unwrap();
    assert!(matches!(outcome, RouteOutcome::Continued { .. }));
    assert!(!h.context.history().snapshot()[0].mocked);
}

#[tokio::test]
async fn test_simulate_timeout_delays_then_answers_408() {
    let h = Harness::new();
    h.manager
        .simulate_timeout("/api/slow", Duration::from_millis(60))
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let started = Instant::now();
    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/slow"))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));

    let RouteOutcome::Fulfilled(response) = outcome else {
        panic!("expected a fulfilled route");
    };
    assert_eq!(response.status, 408);
    assert_eq!(
        h.context.history().snapshot()[0].response_time_millis,
        Some(60)
    );
}

#[tokio::test]
async fn test_mock_error() {
    let h = Harness::new();
    h.manager
        .mock_error("/api/pay", 503, r#"{"error":"unavailable"}"#)
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    h.page
        .dispatch_request(RequestInfo::new("POST", "https://app.test/api/pay"))
        .await
        .unwrap();

    expect_exchanges(&h.context, "/api/pay")
        .unwrap()
        .to_have_status(503)
        .await
        .unwrap();
    expect_exchanges(&h.context, "/api/pay")
        .unwrap()
        .to_be_mocked()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_block_request_aborts_matching_requests() {
    let h = Harness::new();
    h.manager.block_request("/analytics").unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("POST", "https://app.test/analytics/event"))
        .await
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Aborted("blockedbyclient".to_string()));

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/users"))
        .await
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Unhandled);

    assert!(h.manager.was_intercepted("/analytics").unwrap());
    assert!(h.context.history().mocked().is_empty());
}

// ============================================================================
// Request rewriting
// ============================================================================

#[tokio::test]
async fn test_header_injection_leaves_request_otherwise_untouched() {
    let h = Harness::new();
    h.manager
        .modify_request_header(".*/users.*", "Authorization", "Bearer X")
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let original = RequestInfo::new("POST", "https://app.test/api/users")
        .with_id("req-original")
        .with_header("Accept", "application/json")
        .with_post_data(r#"{"name":"ada"}"#);
    let outcome = h.page.dispatch_request(original.clone()).await.unwrap();

    let forwarded = outcome.forwarded_request().expect("request was forwarded");
    assert_eq!(
        forwarded.headers.get("Authorization").map(String::as_str),
        Some("Bearer X")
    );
    assert_eq!(
        forwarded.headers.get("Accept").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(forwarded.headers.len(), 2);
    assert_eq!(forwarded.url, original.url);
    assert_eq!(forwarded.method, original.method);
    assert_eq!(forwarded.post_data, original.post_data);

    let records = h.context.history().snapshot();
    assert_eq!(records[0].request_id, "req-original");
    assert!(!records[0].mocked);
    assert_eq!(records[0].status_code, None);
}

#[tokio::test]
async fn test_add_query_parameter() {
    let h = Harness::new();
    h.manager
        .add_query_parameter("/api/search", "debug", "true")
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/search?q=rust"))
        .await
        .unwrap();
    assert_eq!(
        outcome.forwarded_request().unwrap().url,
        "https://app.test/api/search?q=rust&debug=true"
    );
}

#[tokio::test]
async fn test_modify_method_and_body() {
    let h = Harness::new();
    h.manager.modify_request_method("/api/legacy", "put").unwrap();
    h.manager
        .modify_request_body("/api/form", r#"{"patched":true}"#)
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("POST", "https://app.test/api/legacy"))
        .await
        .unwrap();
    assert_eq!(outcome.forwarded_request().unwrap().method, "PUT");

    let outcome = h
        .page
        .dispatch_request(
            RequestInfo::new("POST", "https://app.test/api/form").with_post_data("{}"),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome.forwarded_request().unwrap().post_data.as_deref(),
        Some(r#"{"patched":true}"#)
    );
}

#[tokio::test]
async fn test_interceptor_declining_falls_through_to_mock() {
    let h = Harness::new();
    h.manager
        .register(
            InterceptionRule::builder("admin-only", "/api/")
                .request_interceptor(|request| {
                    request.url.contains("/admin").then(|| netwatch::RequestOverride {
                        headers: Some(
                            [("X-Role".to_string(), "admin".to_string())]
                                .into_iter()
                                .collect(),
                        ),
                        ..Default::default()
                    })
                })
                .body("{}"),
        )
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let admin = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/admin"))
        .await
        .unwrap();
    assert!(admin.forwarded_request().is_some());

    let other = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/other"))
        .await
        .unwrap();
    assert!(other.is_fulfilled());
}

// ============================================================================
// Rule lifecycle
// ============================================================================

#[tokio::test]
async fn test_disable_and_remove_take_effect_on_attached_handlers() {
    let h = Harness::new();
    let handle = h.manager.mock_success("/api/users", "[]").unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    handle.disable().unwrap();
    assert!(!handle.is_enabled());
    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/users"))
        .await
        .unwrap();
    assert!(matches!(outcome, RouteOutcome::Continued { overrides: None, .. }));

    handle.enable().unwrap();
    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/users"))
        .await
        .unwrap();
    assert!(outcome.is_fulfilled());

    handle.remove().unwrap();
    assert!(handle.rule().is_none());
    assert!(matches!(handle.remove(), Err(Error::RuleNotFound(_))));
    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/users"))
        .await
        .unwrap();
    assert!(!outcome.is_fulfilled());

    // only the enabled dispatch was recorded as an intercept
    assert_eq!(h.context.history().len(), 1);
}

#[tokio::test]
async fn test_clear_all_rules() {
    let h = Harness::new();
    h.manager.mock_success("/a", "{}").unwrap();
    h.manager.mock_success("/b", "{}").unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    h.manager.clear_all_rules();
    assert!(h.manager.rules().is_empty());

    let outcome = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/a"))
        .await
        .unwrap();
    assert!(!outcome.is_fulfilled());
    assert!(!h.manager.was_intercepted("/a").unwrap());
}

#[tokio::test]
async fn test_last_registered_route_wins() {
    let h = Harness::new();
    h.manager
        .register(InterceptionRule::builder("broad", "/api/").status(500).body("broad"))
        .unwrap();
    h.manager
        .register(
            InterceptionRule::builder("narrow", "/api/users")
                .status(200)
                .body("narrow"),
        )
        .unwrap();
    h.manager.apply_to(&h.page).await.unwrap();

    let RouteOutcome::Fulfilled(response) = h
        .page
        .dispatch_request(RequestInfo::new("GET", "https://app.test/api/users"))
        .await
        .unwrap()
    else {
        panic!("expected a fulfilled route");
    };
    assert_eq!(response.body_text().as_deref(), Some("narrow"));
}
