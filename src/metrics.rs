//! Workflow metrics: the sink capability handed to every iteration and its
//! Prometheus-backed and in-memory implementations.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{error, info};

use crate::percentiles::PercentileTracker;
use crate::report::MetricsSnapshot;

/// Monotonic counters emitted by the workflow and the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Counter {
    LoginSuccess,
    LoginFail,
    RequestSuccess,
    RequestFail,
    Under1Min,
    Over1Min,
    LogoutSuccess,
    LogoutFail,
    /// Every HTTP request issued.
    HttpReqs,
    /// HTTP requests answered outside 2xx/3xx, or not answered at all.
    HttpReqFailed,
    /// Completed iterations, whatever their outcome.
    Iterations,
}

impl Counter {
    pub const ALL: [Counter; 11] = [
        Counter::LoginSuccess,
        Counter::LoginFail,
        Counter::RequestSuccess,
        Counter::RequestFail,
        Counter::Under1Min,
        Counter::Over1Min,
        Counter::LogoutSuccess,
        Counter::LogoutFail,
        Counter::HttpReqs,
        Counter::HttpReqFailed,
        Counter::Iterations,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Counter::LoginSuccess => "login_success",
            Counter::LoginFail => "login_fail",
            Counter::RequestSuccess => "request_success",
            Counter::RequestFail => "request_fail",
            Counter::Under1Min => "under_1min",
            Counter::Over1Min => "over_1min",
            Counter::LogoutSuccess => "logout_success",
            Counter::LogoutFail => "logout_fail",
            Counter::HttpReqs => "http_reqs",
            Counter::HttpReqFailed => "http_req_failed",
            Counter::Iterations => "iterations",
        }
    }

    pub fn from_name(name: &str) -> Option<Counter> {
        Counter::ALL.iter().copied().find(|c| c.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Timing distributions, recorded in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Trend {
    /// Round trip of the credential POST.
    Latency,
    /// Round trip of every HTTP request.
    HttpReqDuration,
}

impl Trend {
    pub const ALL: [Trend; 2] = [Trend::Latency, Trend::HttpReqDuration];

    pub fn name(&self) -> &'static str {
        match self {
            Trend::Latency => "latency",
            Trend::HttpReqDuration => "http_req_duration",
        }
    }

    pub fn from_name(name: &str) -> Option<Trend> {
        Trend::ALL.iter().copied().find(|t| t.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Destination for workflow metrics.
///
/// Implementations must tolerate concurrent calls from any number of virtual
/// users; no ordering between callers is required.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, counter: Counter);

    fn observe(&self, trend: Trend, value_ms: u64);

    /// Point-in-time copy of everything recorded so far.
    fn snapshot(&self) -> MetricsSnapshot;
}

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "login_loadtest".to_string());

    pub static ref LOGIN_SUCCESS: IntCounter = counter("login_success_total", "Logins answered with 200 or 302");
    pub static ref LOGIN_FAIL: IntCounter = counter("login_fail_total", "Login attempts that failed at any step");
    pub static ref REQUEST_SUCCESS: IntCounter = counter("request_success_total", "Workflow requests that succeeded");
    pub static ref REQUEST_FAIL: IntCounter = counter("request_fail_total", "Workflow requests that failed");
    pub static ref UNDER_1MIN: IntCounter = counter("under_1min_total", "Credential submissions faster than one minute");
    pub static ref OVER_1MIN: IntCounter = counter("over_1min_total", "Credential submissions taking one minute or more");
    pub static ref LOGOUT_SUCCESS: IntCounter = counter("logout_success_total", "Logouts answered with 200 or 302");
    pub static ref LOGOUT_FAIL: IntCounter = counter("logout_fail_total", "Logouts that failed");
    pub static ref HTTP_REQS: IntCounter = counter("http_reqs_total", "Total number of HTTP requests made");
    pub static ref HTTP_REQ_FAILED: IntCounter = counter("http_req_failed_total", "HTTP requests without a 2xx/3xx answer");
    pub static ref ITERATIONS: IntCounter = counter("iterations_total", "Completed workflow iterations");

    pub static ref LATENCY_MS: Histogram = histogram("latency_ms", "Credential POST round trip in milliseconds");
    pub static ref HTTP_REQ_DURATION_MS: Histogram = histogram("http_req_duration_ms", "HTTP request round trip in milliseconds");

    pub static ref ACTIVE_VUS: IntGauge =
        IntGauge::with_opts(
            Opts::new("vus", "Number of virtual users currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help).namespace(METRIC_NAMESPACE.as_str())).unwrap()
}

fn histogram(name: &str, help: &str) -> Histogram {
    Histogram::with_opts(
        HistogramOpts::new(name, help)
            .namespace(METRIC_NAMESPACE.as_str())
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0, 30_000.0,
                60_000.0, 120_000.0,
            ]),
    )
    .unwrap()
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    for counter in Counter::ALL {
        registry.register(Box::new(prometheus_counter(counter).clone()))?;
    }
    registry.register(Box::new(LATENCY_MS.clone()))?;
    registry.register(Box::new(HTTP_REQ_DURATION_MS.clone()))?;
    registry.register(Box::new(ACTIVE_VUS.clone()))?;

    Ok(())
}

fn prometheus_counter(counter: Counter) -> &'static IntCounter {
    match counter {
        Counter::LoginSuccess => &LOGIN_SUCCESS,
        Counter::LoginFail => &LOGIN_FAIL,
        Counter::RequestSuccess => &REQUEST_SUCCESS,
        Counter::RequestFail => &REQUEST_FAIL,
        Counter::Under1Min => &UNDER_1MIN,
        Counter::Over1Min => &OVER_1MIN,
        Counter::LogoutSuccess => &LOGOUT_SUCCESS,
        Counter::LogoutFail => &LOGOUT_FAIL,
        Counter::HttpReqs => &HTTP_REQS,
        Counter::HttpReqFailed => &HTTP_REQ_FAILED,
        Counter::Iterations => &ITERATIONS,
    }
}

fn prometheus_histogram(trend: Trend) -> &'static Histogram {
    match trend {
        Trend::Latency => &LATENCY_MS,
        Trend::HttpReqDuration => &HTTP_REQ_DURATION_MS,
    }
}

/// Sink backed by the process-wide Prometheus metrics.
///
/// Trends are mirrored into HDR histograms so percentiles can be reported and
/// checked against thresholds at the end of the run.
pub struct PrometheusSink {
    trends: [PercentileTracker; 2],
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            trends: [PercentileTracker::new(), PercentileTracker::new()],
        }
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusSink {
    fn increment(&self, counter: Counter) {
        prometheus_counter(counter).inc();
    }

    fn observe(&self, trend: Trend, value_ms: u64) {
        prometheus_histogram(trend).observe(value_ms as f64);
        self.trends[trend.index()].record_ms(value_ms);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let counters = Counter::ALL
            .iter()
            .map(|c| (c.name().to_string(), prometheus_counter(*c).get()))
            .collect();
        let trends = Trend::ALL
            .iter()
            .filter_map(|t| {
                self.trends[t.index()]
                    .stats()
                    .map(|s| (t.name().to_string(), s))
            })
            .collect();

        MetricsSnapshot { counters, trends }
    }
}

/// In-memory sink that keeps every sample.
///
/// Used for tests and whenever a run should not touch the global registry.
pub struct RecordingSink {
    counters: [AtomicU64; 11],
    samples: Mutex<BTreeMap<Trend, Vec<u64>>>,
    trends: [PercentileTracker; 2],
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            samples: Mutex::new(BTreeMap::new()),
            trends: [PercentileTracker::new(), PercentileTracker::new()],
        }
    }

    pub fn count(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn samples(&self, trend: Trend) -> Vec<u64> {
        match self.samples.lock() {
            Ok(samples) => samples.get(&trend).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(&trend).cloned().unwrap_or_default(),
        }
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for RecordingSink {
    fn increment(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn observe(&self, trend: Trend, value_ms: u64) {
        let mut samples = match self.samples.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        samples.entry(trend).or_default().push(value_ms);
        self.trends[trend.index()].record_ms(value_ms);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let counters = Counter::ALL
            .iter()
            .map(|c| (c.name().to_string(), self.count(*c)))
            .collect();
        let trends = Trend::ALL
            .iter()
            .filter_map(|t| {
                self.trends[t.index()]
                    .stats()
                    .map(|s| (t.name().to_string(), s))
            })
            .collect();

        MetricsSnapshot { counters, trends }
    }
}

/// Encodes every metric family of the registry in the text exposition format.
fn encode_registry(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode_registry(&registry) {
        Ok(buffer) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", TextEncoder::new().format_type())
            .body(Body::from(buffer)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("failed to encode metrics"))
        }
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry = registry.clone();
                async move { metrics_handler(req, registry).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Registry) -> String {
    encode_registry(registry)
        .map_err(|e| e.to_string())
        .and_then(|buffer| String::from_utf8(buffer).map_err(|e| e.to_string()))
        .unwrap_or_else(|e| {
            error!(error = %e, "Error encoding metrics");
            String::from("# ERROR ENCODING METRICS")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_names_round_trip() {
        for counter in Counter::ALL {
            assert_eq!(Counter::from_name(counter.name()), Some(counter));
        }
        assert_eq!(Counter::from_name("nope"), None);
    }

    #[test]
    fn trend_names() {
        assert_eq!(Trend::from_name("latency"), Some(Trend::Latency));
        assert_eq!(
            Trend::from_name("http_req_duration"),
            Some(Trend::HttpReqDuration)
        );
    }

    #[test]
    fn recording_sink_counts_and_samples() {
        let sink = RecordingSink::new();
        sink.increment(Counter::LoginSuccess);
        sink.increment(Counter::LoginSuccess);
        sink.increment(Counter::Over1Min);
        sink.observe(Trend::Latency, 120);
        sink.observe(Trend::Latency, 80);

        assert_eq!(sink.count(Counter::LoginSuccess), 2);
        assert_eq!(sink.count(Counter::Over1Min), 1);
        assert_eq!(sink.count(Counter::LoginFail), 0);
        assert_eq!(sink.samples(Trend::Latency), vec![120, 80]);
        assert!(sink.samples(Trend::HttpReqDuration).is_empty());

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter("login_success"), 2);
        assert_eq!(snapshot.trend("latency").unwrap().count, 2);
        assert!(snapshot.trend("http_req_duration").is_none());
    }

    #[test]
    fn recording_sink_is_safe_under_concurrency() {
        let sink = Arc::new(RecordingSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        sink.increment(Counter::RequestSuccess);
                        sink.observe(Trend::HttpReqDuration, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.count(Counter::RequestSuccess), 8000);
        assert_eq!(sink.samples(Trend::HttpReqDuration).len(), 8000);
    }

    #[test]
    fn encode_custom_registry() {
        let registry = Registry::new();
        let c = IntCounter::new("scrapes_total", "scrapes").unwrap();
        c.inc();
        registry.register(Box::new(c)).unwrap();

        let text = gather_metrics_string(&registry);
        assert!(text.contains("scrapes_total 1"), "{}", text);
    }
}
