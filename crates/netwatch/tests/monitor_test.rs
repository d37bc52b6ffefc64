// Integration tests for response monitoring
//
// Tests cover:
// - History clearing and re-appending
// - Stopping sessions (explicit, by count, by time)
// - Pending failures raised off the dispatch path
// - Validation failures surfacing from the dispatch call
// - End-of-scenario summaries


use netwatch::driver::simulated::SimulatedResponse;
use netwatch::{Error, Expectation};
use std::time::Duration;
use test_support::{Harness, api_response};

// ============================================================================
// History lifecycle
// ============================================================================

#[tokio::test]
async fn test_clear_history_then_capture_again() {
    let h = Harness::new();
    h.monitor.watch(&h.page, "/api/").await.unwrap();

    h.page
        .dispatch_response(api_response("GET", "https://app.test/api/a", 200, "{}", 5))
        .await
        .unwrap();
    assert_eq!(h.context.history().len(), 1);

    h.monitor.clear_history();
    assert!(h.context.history().is_empty());

    h.page
        .dispatch_response(api_response("GET", "https://app.test/api/b", 200, "{}", 5))
        .await
        .unwrap();
    let records = h.context.history().snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, "https://app.test/api/b");
    assert_eq!(records[0].session_id, "page-1");
}

// ============================================================================
// Stopping
// ============================================================================

#[tokio::test]
async fn test_stop_then_dispatch_has_no_side_effects() {
    let h = Harness::new();
    h.context
        .register_expectation(Expectation::builder("/api/").status_code(200).build().unwrap());
    h.monitor.watch(&h.page, "/api/").await.unwrap();

    h.monitor.stop(&h.page);
    assert!(h.monitor.is_stopped(&h.page));

    // would fail validation if the listener were still live
    h.page
        .dispatch_response(api_response("GET", "https://app.test/api/a", 500, "{}", 5))
        .await
        .unwrap();

    assert!(h.context.history().is_empty());
    assert_eq!(h.context.validation_failure_count(), 0);
    assert_eq!(h.page.response_listener_count(), 1);
}

#[tokio::test]
async fn test_stop_after_count_one() {
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    h.monitor
        .stop_after_count(&h.page, "/users", 1, None)
        .await
        .unwrap();

    h.page
        .dispatch_response(api_response("GET", "https://app.test/users", 200, "[]", 5))
        .await
        .unwrap();
    assert!(h.monitor.is_stopped(&h.page));
    assert_eq!(h.context.history().len(), 1);

    h.page
        .dispatch_response(api_response("GET", "https://app.test/users", 200, "[]", 5))
        .await
        .unwrap();
    assert_eq!(h.context.history().len(), 1);
}

#[tokio::test]
async fn test_stop_after_count_timeout_sets_pending_failure() {
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    h.monitor
        .stop_after_count(&h.page, "/users", 1, Some(Duration::from_millis(50)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = h.monitor.check_and_throw_pending_failure().unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, Error::PendingFailure(_)));
    assert!(message.contains("Expected 1 response(s) matching '.*users.*'"));
    assert!(message.contains("observed 0"));

    // drained by the first poll
    assert!(h.monitor.check_and_throw_pending_failure().is_ok());
}

#[tokio::test]
async fn test_pending_failure_surfaces_on_next_dispatch() {
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    h.context.set_pending_failure("login never completed");

    let err = h
        .page
        .dispatch_response(api_response("GET", "https://app.test/home", 200, "", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PendingFailure(ref m) if m == "login never completed"));
    assert!(h.context.history().is_empty());
}

#[tokio::test]
async fn test_stop_after_seconds_without_target_traffic() {
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    h.monitor
        .stop_after_seconds(&h.page, Duration::from_millis(30), Some("/checkout"))
        .unwrap();

    h.page
        .dispatch_response(api_response("GET", "https://app.test/home", 200, "", 5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(h.monitor.is_stopped(&h.page));
    assert_eq!(h.monitor.pending_timer_count(), 0);
    let err = h.monitor.check_and_throw_pending_failure().unwrap_err();
    assert!(err.to_string().contains("no exchange matching pattern '.*checkout.*' was captured"));
}

#[tokio::test]
async fn test_cancel_timers_prevents_stop() {
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    h.monitor
        .stop_after_seconds(&h.page, Duration::from_millis(30), None)
        .unwrap();
    h.monitor.cancel_timers();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!h.monitor.is_stopped(&h.page));
    assert!(h.monitor.check_and_throw_pending_failure().is_ok());
}

// ============================================================================
// End-to-end validation
// ============================================================================

#[tokio::test]
async fn test_login_status_success_summary() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect_status(".*\\/login.*", 200)
        .build()
        .await
        .unwrap();

    h.page
        .dispatch_response(api_response("GET", "https://app.test/auth/login", 200, "{}", 40))
        .await
        .unwrap();

    let summary = h.monitor.log_monitoring_result();
    assert!(summary.success);
    assert_eq!(summary.captured, 1);
    assert!(h.monitor.assert_monitoring_result().is_ok());
}

#[tokio::test]
async fn test_login_status_mismatch_fails_dispatch() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect_status(".*\\/login.*", 200)
        .build()
        .await
        .unwrap();

    let err = h
        .page
        .dispatch_response(api_response(
            "GET",
            "https://app.test/auth/login",
            500,
            r#"{"error":"boom"}"#,
            40,
        ))
        .await
        .unwrap_err();

    assert!(err.is_assertion());
    let message = err.to_string();
    assert!(message.contains("Status Code Mismatch: Expected 200, Actual 500"));
    assert!(message.contains(r#"Actual response body: {"error":"boom"}"#));

    // the failing exchange is still recorded
    assert_eq!(h.context.history().len(), 1);
    let summary = h.monitor.log_monitoring_result();
    assert!(!summary.success);
    assert_eq!(summary.validation_failures, 1);
    assert!(h.monitor.assert_monitoring_result().is_err());
}

#[tokio::test]
async fn test_response_time_and_body_checks() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect("/api/search", |e| {
            e.status_code(200)
                .max_response_time(Duration::from_millis(2000))
                .body_contains("results")
        })
        .build()
        .await
        .unwrap();

    let err = h
        .page
        .dispatch_response(api_response(
            "GET",
            "https://app.test/api/search?q=rust",
            200,
            "[]",
            2500,
        ))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Response Time Exceeded: Expected < 2000ms, Actual 2500ms"));
    assert!(message.contains("Body Content Mismatch"));
    assert!(!message.contains("Status Code Mismatch"));
}

#[tokio::test]
async fn test_missing_timing_skips_latency_check() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect_response_time("/api/slow", Duration::from_millis(10))
        .build()
        .await
        .unwrap();

    h.page
        .dispatch_response(SimulatedResponse::new("GET", "https://app.test/api/slow", 200))
        .await
        .unwrap();

    let records = h.context.history().snapshot();
    assert_eq!(records[0].response_time_millis, None);
    assert_eq!(h.context.validation_failure_count(), 0);
}

#[tokio::test]
async fn test_unmet_expectation_fails_summary() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect_status("/api/orders", 201)
        .watch("/api/")
        .build()
        .await
        .unwrap();

    h.page
        .dispatch_response(api_response("GET", "https://app.test/api/cart", 200, "{}", 5))
        .await
        .unwrap();

    let err = h.monitor.assert_monitoring_result().unwrap_err();
    assert!(matches!(err, Error::MonitoringFailed(_)));
    assert!(err.to_string().contains("no exchange matched '.*api/orders.*'"));
}

#[tokio::test]
async fn test_builder_auto_stop_after_count() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .watch("/api/")
        .stop_after_count("/api/", 2, None)
        .build()
        .await
        .unwrap();

    for path in ["a", "b", "c"] {
        h.page
            .dispatch_response(api_response(
                "GET",
                &format!("https://app.test/api/{path}"),
                200,
                "{}",
                5,
            ))
            .await
            .unwrap();
    }
    assert_eq!(h.context.history().len(), 2);
    assert!(h.monitor.is_stopped(&h.page));
}

#[tokio::test]
async fn test_counter_before_watch_adds_warning() {
    let h = Harness::new();
    h.monitor
        .stop_after_count(&h.page, "/users", 1, None)
        .await
        .unwrap();

    let warnings = h.context.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("attached before any watch"));

    // watch first, as the builder does: no warning and the response is kept
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    h.monitor
        .stop_after_count(&h.page, "/users", 1, None)
        .await
        .unwrap();
    assert!(h.context.warnings().is_empty());
}

// ============================================================================
// Reconfiguration
// ============================================================================

#[tokio::test]
async fn test_rebuild_does_not_duplicate_captures() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect_status("/api/users", 200)
        .build()
        .await
        .unwrap();
    h.monitor
        .builder(&h.page)
        .expect_status("/api/", 200)
        .build()
        .await
        .unwrap();

    h.page
        .dispatch_response(api_response("GET", "https://app.test/api/users", 200, "[]", 5))
        .await
        .unwrap();

    assert_eq!(h.context.history().len(), 1);
    assert_eq!(h.monitor.session_state("page-1").unwrap().listener_count(), 1);
    assert_eq!(h.page.response_listener_count(), 2);
}

#[tokio::test]
async fn test_rebuild_forgets_previous_validation_failures() {
    let h = Harness::new();
    h.monitor
        .builder(&h.page)
        .expect_status("/login", 200)
        .build()
        .await
        .unwrap();
    let err = h
        .page
        .dispatch_response(api_response("POST", "https://app.test/login", 500, "{}", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    h.monitor.stop(&h.page);

    h.monitor
        .builder(&h.page)
        .expect_status("/login", 200)
        .build()
        .await
        .unwrap();
    h.page
        .dispatch_response(api_response("POST", "https://app.test/login", 200, "{}", 5))
        .await
        .unwrap();

    let summary = h.monitor.assert_monitoring_result().unwrap();
    assert_eq!(summary.validation_failures, 0);
    assert_eq!(summary.captured, 1);
}

#[tokio::test]
async fn test_timed_stop_counts_captures_after_clear() {
    let h = Harness::new();
    h.monitor.watch_all(&h.page).await.unwrap();
    for path in ["a", "b", "c"] {
        h.page
            .dispatch_response(api_response(
                "GET",
                &format!("https://app.test/{path}"),
                200,
                "",
                5,
            ))
            .await
            .unwrap();
    }
    h.monitor
        .stop_after_seconds(&h.page, Duration::from_millis(60), Some("/login"))
        .unwrap();

    h.monitor.clear_history();
    for path in ["login", "x", "y", "z"] {
        h.page
            .dispatch_response(api_response(
                "GET",
                &format!("https://app.test/{path}"),
                200,
                "",
                5,
            ))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(h.monitor.is_stopped(&h.page));
    assert!(h.monitor.check_and_throw_pending_failure().is_ok());
    assert!(h.context.warnings()[0].contains("captured 1 exchange(s) matching pattern"));
}
