//! Outbound call tracking against a live mock backend.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use latency_doctor::analyzer::LogAnalyzer;
use latency_doctor::caller;
use latency_doctor::observability::{Event, Tag};
use latency_doctor::upstream::{CallError, CallOptions, Caller, HttpMethod, RequestContext};

use common::{authed, closed_port, start_mock_backend, start_programmable_backend, tracker_for, wait_until};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_tracks_live_calls_in_completion_order() {
    let mut senders = HashMap::new();
    let mut receivers = HashMap::new();
    for path in ["/a", "/b", "/c"] {
        let (tx, rx) = watch::channel(false);
        senders.insert(path, tx);
        receivers.insert(path.to_string(), rx);
    }
    let receivers = Arc::new(receivers);

    let addr = start_programmable_backend(move |req| {
        let receivers = receivers.clone();
        async move {
            if let Some(rx) = receivers.get(&req.path) {
                let mut rx = rx.clone();
                loop {
                    let open = *rx.borrow();
                    if open || rx.changed().await.is_err() {
                        break;
                    }
                }
            }
            (200, "ok".to_string())
        }
    })
    .await;

    let (tracker, sink) = tracker_for(addr);
    let tracker = Arc::new(tracker);

    let mut handles = HashMap::new();
    for path in ["/a", "/b", "/c"] {
        let tracker = tracker.clone();
        handles.insert(
            path,
            tokio::spawn(async move {
                tracker
                    .get(&authed(), Caller::unknown(), path, CallOptions::default())
                    .await
            }),
        );
    }

    assert!(wait_until(|| tracker.active_count() == 3).await);

    for (path, remaining) in [("/c", 2), ("/a", 1), ("/b", 0)] {
        senders[path].send(true).unwrap();
        let response = handles.remove(path).unwrap().await.unwrap().unwrap();
        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(tracker.active_count(), remaining);
    }
    assert!(tracker.in_flight().is_empty());

    let mut start_counts = Vec::new();
    let mut end_counts = Vec::new();
    for event in sink.events() {
        match event {
            Event::ReqStart { active_count, .. } => start_counts.push(active_count),
            Event::ReqEnd { active_count, .. } => end_counts.push(active_count),
            _ => {}
        }
    }
    start_counts.sort();
    assert_eq!(start_counts, vec![0, 1, 2]);
    assert_eq!(end_counts, vec![2, 1, 0]);
}

#[tokio::test]
async fn every_start_has_exactly_one_end() {
    let addr = start_mock_backend("pong").await;
    let (tracker, sink) = tracker_for(addr);

    for _ in 0..5 {
        tracker
            .get(&authed(), Caller::unknown(), "/ping", CallOptions::default())
            .await
            .unwrap();
    }

    let tags = sink.tags();
    assert_eq!(tags.iter().filter(|t| **t == Tag::ReqStart).count(), 5);
    assert_eq!(tags.iter().filter(|t| **t == Tag::ReqEnd).count(), 5);

    let ids: Vec<u64> = sink
        .events()
        .iter()
        .filter(|e| e.tag() == Tag::ReqStart)
        .filter_map(Event::call_id)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn timeout_is_logged_and_returned() {
    let addr = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, "late".to_string())
    })
    .await;
    let (tracker, sink) = tracker_for(addr);

    let err = tracker
        .get(
            &authed(),
            caller!(),
            "/api/v1/graph",
            CallOptions::default().timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {:?}", err);
    assert_eq!(sink.tags(), vec![Tag::ReqStart, Tag::ReqTimeout, Tag::ReqEnd]);
    match &sink.events()[1] {
        Event::ReqTimeout { caller, elapsed, .. } => {
            assert!(caller.ends_with(":timeout_is_logged_and_returned"));
            assert!(*elapsed >= Duration::from_millis(200));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(tracker.active_count(), 0);
}

#[tokio::test]
async fn connection_failure_is_classified() {
    let addr = closed_port().await;
    let (tracker, sink) = tracker_for(addr);

    let err = tracker
        .post(&authed(), Caller::unknown(), "/api/v1/team", CallOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_connect(), "unexpected error: {:?}", err);
    assert_eq!(sink.tags(), vec![Tag::ReqStart, Tag::ReqConnError, Tag::ReqEnd]);
    assert_eq!(tracker.active_count(), 0);
}

#[tokio::test]
async fn missing_token_never_reaches_backend() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = start_programmable_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { (200, "ok".to_string()) }
    })
    .await;
    let (tracker, sink) = tracker_for(addr);

    let err = tracker
        .get(&RequestContext::detached(), Caller::unknown(), "/api/v1/user", CallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::NoApiToken));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(sink.tags(), vec![Tag::ReqStart, Tag::ReqException, Tag::ReqEnd]);
}

#[tokio::test]
async fn slow_success_emits_req_slow() {
    let addr = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        (200, "[]".to_string())
    })
    .await;
    let (tracker, sink) = tracker_for(addr);
    let tracker = tracker.with_slow_threshold(Duration::from_millis(50));

    let response = tracker
        .get(&authed(), Caller::unknown(), "/api/v1/dashboard", CallOptions::default())
        .await
        .unwrap();

    let body: Vec<serde_json::Value> = response.json().unwrap();
    assert!(body.is_empty());
    assert_eq!(sink.tags(), vec![Tag::ReqStart, Tag::ReqSuccess, Tag::ReqSlow, Tag::ReqEnd]);
}

#[tokio::test]
async fn server_error_status_is_still_success() {
    let addr = start_programmable_backend(|_| async { (500, "oops".to_string()) }).await;
    let (tracker, sink) = tracker_for(addr);

    let response = tracker
        .call(&authed(), Caller::unknown(), HttpMethod::Delete, "/api/v1/team/3", CallOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(response.text(), "oops");
    assert_eq!(sink.tags(), vec![Tag::ReqStart, Tag::ReqSuccess, Tag::ReqEnd]);
}

#[tokio::test]
async fn credential_header_and_options_are_sent() {
    let addr = start_programmable_backend(|req| async move { (200, req.head) }).await;
    let (tracker, _) = tracker_for(addr);

    let response = tracker
        .get(
            &authed(),
            Caller::unknown(),
            "/api/v1/user",
            CallOptions::default().header("X-Trace", "1").query("page", "2"),
        )
        .await
        .unwrap();

    let head = response.text();
    assert!(head.starts_with("get /api/v1/user?page=2 http/1.1"), "{}", head);
    assert!(head.contains(r#"apitoken: {"name":"alice","sig":"s1"}"#), "{}", head);
    assert!(head.contains("x-trace: 1"), "{}", head);
}

#[tokio::test]
async fn caller_headers_override_credential() {
    let addr = start_programmable_backend(|req| async move { (200, req.head) }).await;
    let (tracker, _) = tracker_for(addr);

    let response = tracker
        .get(
            &authed(),
            Caller::unknown(),
            "/api/v1/user",
            CallOptions::default().header("Apitoken", "service"),
        )
        .await
        .unwrap();

    let head = response.text();
    assert!(head.contains("apitoken: service"), "{}", head);
    assert!(!head.contains("alice"), "{}", head);
}

#[tokio::test]
async fn emitted_lines_feed_the_analyzer() {
    let addr = start_programmable_backend(|req| async move {
        if req.path == "/slow" {
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        (200, "ok".to_string())
    })
    .await;
    let (tracker, sink) = tracker_for(addr);
    let tracker = tracker.with_slow_threshold(Duration::from_millis(100));

    for path in ["/fast", "/slow", "/fast"] {
        tracker
            .get(&authed(), caller!(), path, CallOptions::default())
            .await
            .unwrap();
    }

    let mut analyzer = LogAnalyzer::new();
    for line in sink.lines() {
        analyzer.analyze_line(&line);
    }
    let report = analyzer.report();

    assert_eq!(report.totals.api_calls, 3);
    assert_eq!(report.totals.slow_calls, 1);
    assert_eq!(report.totals.concurrency_peak, 0);
    assert_eq!(report.endpoints.len(), 2);
    assert_eq!(report.slow_calls[0].url.as_deref(), Some("/slow"));
    assert!(report.slow_calls[0].caller.ends_with(":emitted_lines_feed_the_analyzer"));
}
