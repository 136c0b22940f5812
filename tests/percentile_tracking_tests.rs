//! Integration tests for trend percentiles, thresholds and the end-of-run report.

use login_loadtest::metrics::{Counter, MetricsSink, RecordingSink, Trend};
use login_loadtest::percentiles::PercentileTracker;
use login_loadtest::report::RunReport;
use login_loadtest::thresholds::{evaluate_all, parse_threshold_list, stress_thresholds};
use std::time::Duration;

#[test]
fn test_percentile_tracker_basic() {
    let tracker = PercentileTracker::new();

    // 10ms, 20ms, ..., 100ms
    for i in 1..=10 {
        tracker.record_ms(i * 10);
    }

    let stats = tracker.stats().expect("Should have stats");

    assert_eq!(stats.count, 10);
    assert_eq!(stats.min, 10);
    assert_eq!(stats.max, 100);
    assert!((stats.mean - 55.0).abs() < 0.5, "mean {} should be 55", stats.mean);
    assert_eq!(stats.p50, 50);
    assert_eq!(stats.p90, 90);
    assert_eq!(stats.p99, 100);
}

#[test]
fn test_percentile_tracker_empty() {
    let tracker = PercentileTracker::new();
    assert!(tracker.stats().is_none());
    assert!(tracker.value_at_percentile(95.0).is_none());
}

#[test]
fn test_slow_logins_are_kept() {
    let tracker = PercentileTracker::new();
    tracker.record_ms(59_999);
    tracker.record_ms(60_000);
    tracker.record_ms(95_000);

    let stats = tracker.stats().unwrap();
    assert_eq!(stats.count, 3);
    // 3 significant digits
    assert!(stats.max >= 94_950 && stats.max <= 95_050, "max {}", stats.max);
}

fn healthy_run() -> RecordingSink {
    let sink = RecordingSink::new();
    for i in 0..100u64 {
        sink.increment(Counter::HttpReqs);
        sink.increment(Counter::HttpReqs);
        sink.increment(Counter::LoginSuccess);
        sink.observe(Trend::HttpReqDuration, 100 + i);
        sink.observe(Trend::HttpReqDuration, 200 + i);
        sink.observe(Trend::Latency, 200 + i);
    }
    sink.increment(Counter::HttpReqFailed);
    sink
}

#[test]
fn test_stress_thresholds_pass_on_a_healthy_run() {
    let sink = healthy_run();
    let results = evaluate_all(&stress_thresholds(), &sink.snapshot());

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.passed), "{:?}", results);
    assert_eq!(results[1].observed, Some(1.0 / 200.0));
}

#[test]
fn test_thresholds_fail_on_slow_or_failing_runs() {
    let sink = healthy_run();
    for _ in 0..100 {
        sink.increment(Counter::HttpReqs);
        sink.increment(Counter::HttpReqFailed);
        sink.observe(Trend::HttpReqDuration, 5_000);
    }

    let results = evaluate_all(&stress_thresholds(), &sink.snapshot());
    assert!(results.iter().all(|r| !r.passed), "{:?}", results);
}

#[test]
fn test_thresholds_on_missing_metrics_pass() {
    let sink = RecordingSink::new();
    let thresholds = parse_threshold_list("latency:p(99)<100;logout_fail:rate<0.1").unwrap();

    let results = evaluate_all(&thresholds, &sink.snapshot());
    assert!(results.iter().all(|r| r.passed && r.observed.is_none()));
}

#[test]
fn test_report_renders_and_exports() {
    let sink = healthy_run();
    let snapshot = sink.snapshot();
    let thresholds = parse_threshold_list("latency:max<250;login_success:count>=100").unwrap();
    let results = evaluate_all(&thresholds, &snapshot);

    let report = RunReport::new(Duration::from_secs(120), 100, snapshot, results);
    assert!(!report.thresholds_passed(), "max latency is 299ms");

    let text = report.render();
    assert!(text.contains("peak vus: 100"));
    assert!(text.contains("login_success"));
    assert!(text.contains("http_req_duration"));
    assert!(text.contains("[FAILED] latency max<250"));
    assert!(text.contains("[ok] login_success count>=100"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    report.export_json(&path).unwrap();

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(exported["peak_vus"], 100);
    assert_eq!(exported["metrics"]["counters"]["login_success"], 100);
    assert_eq!(exported["metrics"]["trends"]["latency"]["count"], 100);
    assert_eq!(exported["thresholds"][0]["passed"], false);
}
