//! Pass/fail thresholds evaluated against the end-of-run metrics.
//!
//! Expressions follow the familiar load-testing notation: an aggregation on
//! the left, a comparison and a numeric bound on the right, e.g.
//! `p(95)<2000` on `http_req_duration` or `rate<0.05` on `http_req_failed`.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::{Counter, Trend};
use crate::report::MetricsSnapshot;

/// Errors produced while parsing threshold definitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("Unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("Invalid threshold expression '{0}': expected <aggregation><op><number>")]
    InvalidExpression(String),

    #[error("Unknown aggregation '{0}'")]
    UnknownAggregation(String),

    #[error("Unsupported percentile {0}; use 50, 90, 95, 99 or 99.9")]
    UnsupportedPercentile(f64),

    #[error("Aggregation '{aggregation}' cannot be applied to metric '{metric}'")]
    IncompatibleAggregation { metric: String, aggregation: String },

    #[error("Invalid threshold bound '{0}'")]
    InvalidBound(String),
}

/// Statistic a threshold is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Count,
    /// Counter divided by its natural denominator (e.g. failed / all requests).
    Rate,
}

impl Aggregation {
    fn parse(s: &str) -> Result<Self, ThresholdParseError> {
        let s = s.trim();
        match s {
            "avg" => return Ok(Aggregation::Avg),
            "min" => return Ok(Aggregation::Min),
            "max" => return Ok(Aggregation::Max),
            "med" => return Ok(Aggregation::Med),
            "count" => return Ok(Aggregation::Count),
            "rate" => return Ok(Aggregation::Rate),
            _ => {}
        }

        let inner = s
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| ThresholdParseError::UnknownAggregation(s.to_string()))?;
        let percentile: f64 = inner
            .trim()
            .parse()
            .map_err(|_| ThresholdParseError::UnknownAggregation(s.to_string()))?;

        if [50.0, 90.0, 95.0, 99.0, 99.9].contains(&percentile) {
            Ok(Aggregation::Percentile(percentile))
        } else {
            Err(ThresholdParseError::UnsupportedPercentile(percentile))
        }
    }

    fn applies_to_trend(&self) -> bool {
        !matches!(self, Aggregation::Count | Aggregation::Rate)
    }
}

/// Comparison operator of a threshold expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
        }
    }
}

/// The metric a threshold targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMetric {
    Counter(Counter),
    Trend(Trend),
}

impl ThresholdMetric {
    fn parse(name: &str) -> Result<Self, ThresholdParseError> {
        let name = name.trim();
        Trend::from_name(name)
            .map(ThresholdMetric::Trend)
            .or_else(|| Counter::from_name(name).map(ThresholdMetric::Counter))
            .ok_or_else(|| ThresholdParseError::UnknownMetric(name.to_string()))
    }

    fn name(&self) -> &'static str {
        match self {
            ThresholdMetric::Counter(c) => c.name(),
            ThresholdMetric::Trend(t) => t.name(),
        }
    }
}

/// Denominator used by `rate` for a counter.
fn rate_denominator(counter: Counter) -> Option<&'static [Counter]> {
    match counter {
        Counter::HttpReqFailed => Some(&[Counter::HttpReqs]),
        Counter::LoginSuccess | Counter::LoginFail => {
            Some(&[Counter::LoginSuccess, Counter::LoginFail])
        }
        Counter::RequestSuccess | Counter::RequestFail => {
            Some(&[Counter::RequestSuccess, Counter::RequestFail])
        }
        Counter::LogoutSuccess | Counter::LogoutFail => {
            Some(&[Counter::LogoutSuccess, Counter::LogoutFail])
        }
        Counter::Under1Min | Counter::Over1Min => Some(&[Counter::Under1Min, Counter::Over1Min]),
        Counter::HttpReqs | Counter::Iterations => None,
    }
}

/// A single parsed threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: ThresholdMetric,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
    expression: String,
}

/// Outcome of evaluating one threshold.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    /// Observed value, or None when the metric has no data yet.
    pub observed: Option<f64>,
}

impl Threshold {
    /// Parses `expression` (e.g. `p(95)<2000`) for the named metric.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let metric = ThresholdMetric::parse(metric)?;
        let expression = expression.trim().to_string();

        let op_start = expression
            .find(|c: char| c == '<' || c == '>' || c == '=')
            .ok_or_else(|| ThresholdParseError::InvalidExpression(expression.clone()))?;
        let (lhs, rest) = expression.split_at(op_start);

        let (comparison, bound_str) = if let Some(b) = rest.strip_prefix("<=") {
            (Comparison::Le, b)
        } else if let Some(b) = rest.strip_prefix(">=") {
            (Comparison::Ge, b)
        } else if let Some(b) = rest.strip_prefix("==") {
            (Comparison::Eq, b)
        } else if let Some(b) = rest.strip_prefix('<') {
            (Comparison::Lt, b)
        } else if let Some(b) = rest.strip_prefix('>') {
            (Comparison::Gt, b)
        } else {
            return Err(ThresholdParseError::InvalidExpression(expression.clone()));
        };

        let bound: f64 = bound_str
            .trim()
            .parse()
            .map_err(|_| ThresholdParseError::InvalidBound(bound_str.trim().to_string()))?;
        let aggregation = Aggregation::parse(lhs)?;

        let compatible = match metric {
            ThresholdMetric::Trend(_) => aggregation.applies_to_trend(),
            ThresholdMetric::Counter(c) => match aggregation {
                Aggregation::Count => true,
                Aggregation::Rate => rate_denominator(c).is_some(),
                _ => false,
            },
        };
        if !compatible {
            return Err(ThresholdParseError::IncompatibleAggregation {
                metric: metric.name().to_string(),
                aggregation: lhs.trim().to_string(),
            });
        }

        Ok(Self {
            metric,
            aggregation,
            comparison,
            bound,
            expression,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn observe(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        match self.metric {
            ThresholdMetric::Trend(trend) => {
                let stats = snapshot.trend(trend.name())?;
                let value = match self.aggregation {
                    Aggregation::Avg => stats.mean,
                    Aggregation::Min => stats.min as f64,
                    Aggregation::Max => stats.max as f64,
                    Aggregation::Med => stats.p50 as f64,
                    Aggregation::Percentile(p) if p == 50.0 => stats.p50 as f64,
                    Aggregation::Percentile(p) if p == 90.0 => stats.p90 as f64,
                    Aggregation::Percentile(p) if p == 95.0 => stats.p95 as f64,
                    Aggregation::Percentile(p) if p == 99.0 => stats.p99 as f64,
                    Aggregation::Percentile(_) => stats.p99_9 as f64,
                    Aggregation::Count | Aggregation::Rate => return None,
                };
                Some(value)
            }
            ThresholdMetric::Counter(counter) => match self.aggregation {
                Aggregation::Count => Some(snapshot.counter(counter.name()) as f64),
                Aggregation::Rate => {
                    let total: u64 = rate_denominator(counter)?
                        .iter()
                        .map(|c| snapshot.counter(c.name()))
                        .sum();
                    if total == 0 {
                        return None;
                    }
                    Some(snapshot.counter(counter.name()) as f64 / total as f64)
                }
                _ => None,
            },
        }
    }

    /// Evaluates the threshold. Metrics without data pass.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdResult {
        let observed = self.observe(snapshot);
        let passed = observed
            .map(|value| self.comparison.holds(value, self.bound))
            .unwrap_or(true);

        ThresholdResult {
            metric: self.metric.name().to_string(),
            expression: self.expression.clone(),
            passed,
            observed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric.name(), self.expression)
    }
}

/// Parses `metric:expr;metric:expr` as used by the THRESHOLDS variable.
pub fn parse_threshold_list(s: &str) -> Result<Vec<Threshold>, ThresholdParseError> {
    s.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (metric, expr) = part
                .split_once(':')
                .ok_or_else(|| ThresholdParseError::InvalidExpression(part.to_string()))?;
            Threshold::parse(metric, expr)
        })
        .collect()
}

/// Thresholds used with the stress profile: p95 under 2 s, under 5% failures.
pub fn stress_thresholds() -> Vec<Threshold> {
    vec![
        Threshold::parse("http_req_duration", "p(95)<2000")
            .expect("built-in threshold must parse"),
        Threshold::parse("http_req_failed", "rate<0.05").expect("built-in threshold must parse"),
    ]
}

/// Evaluates every threshold and logs the outcome.
pub fn evaluate_all(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|threshold| {
            let result = threshold.evaluate(snapshot);
            if result.passed {
                info!(
                    metric = %result.metric,
                    expression = %result.expression,
                    observed = ?result.observed,
                    "Threshold passed"
                );
            } else {
                warn!(
                    metric = %result.metric,
                    expression = %result.expression,
                    observed = ?result.observed,
                    "Threshold crossed"
                );
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSink, RecordingSink};

    #[test]
    fn parses_percentile_expression() {
        let t = Threshold::parse("http_req_duration", "p(95)<2000").unwrap();
        assert_eq!(t.metric, ThresholdMetric::Trend(Trend::HttpReqDuration));
        assert_eq!(t.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(t.comparison, Comparison::Lt);
        assert_eq!(t.bound, 2000.0);
    }

    #[test]
    fn parses_rate_expression() {
        let t = Threshold::parse("http_req_failed", "rate < 0.05").unwrap();
        assert_eq!(t.aggregation, Aggregation::Rate);
        assert_eq!(t.bound, 0.05);
    }

    #[test]
    fn parses_two_char_operators() {
        assert_eq!(
            Threshold::parse("latency", "avg<=10").unwrap().comparison,
            Comparison::Le
        );
        assert_eq!(
            Threshold::parse("login_success", "count>=500")
                .unwrap()
                .comparison,
            Comparison::Ge
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            Threshold::parse("bogus", "avg<1"),
            Err(ThresholdParseError::UnknownMetric(_))
        ));
        assert!(matches!(
            Threshold::parse("latency", "avg"),
            Err(ThresholdParseError::InvalidExpression(_))
        ));
        assert!(matches!(
            Threshold::parse("latency", "p(42)<1"),
            Err(ThresholdParseError::UnsupportedPercentile(_))
        ));
        assert!(matches!(
            Threshold::parse("latency", "rate<1"),
            Err(ThresholdParseError::IncompatibleAggregation { .. })
        ));
        assert!(matches!(
            Threshold::parse("http_reqs", "rate<1"),
            Err(ThresholdParseError::IncompatibleAggregation { .. })
        ));
        assert!(matches!(
            Threshold::parse("latency", "avg<fast"),
            Err(ThresholdParseError::InvalidBound(_))
        ));
    }

    #[test]
    fn stress_thresholds_pass_and_fail() {
        let sink = RecordingSink::new();
        for _ in 0..100 {
            sink.increment(Counter::HttpReqs);
            sink.observe(Trend::HttpReqDuration, 150);
        }
        for _ in 0..3 {
            sink.increment(Counter::HttpReqFailed);
        }

        let results = evaluate_all(&stress_thresholds(), &sink.snapshot());
        assert!(results.iter().all(|r| r.passed), "{:?}", results);

        for _ in 0..10 {
            sink.increment(Counter::HttpReqFailed);
        }
        let results = evaluate_all(&stress_thresholds(), &sink.snapshot());
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].observed, Some(0.13));
    }

    #[test]
    fn slow_requests_fail_percentile() {
        let sink = RecordingSink::new();
        for i in 0..100 {
            sink.observe(Trend::HttpReqDuration, if i < 90 { 100 } else { 5000 });
        }
        let t = Threshold::parse("http_req_duration", "p(95)<2000").unwrap();
        assert!(!t.evaluate(&sink.snapshot()).passed);
    }

    #[test]
    fn login_fail_rate_uses_login_attempts() {
        let sink = RecordingSink::new();
        for _ in 0..3 {
            sink.increment(Counter::LoginSuccess);
        }
        sink.increment(Counter::LoginFail);
        let t = Threshold::parse("login_fail", "rate<0.5").unwrap();
        let result = t.evaluate(&sink.snapshot());
        assert_eq!(result.observed, Some(0.25));
        assert!(result.passed);
    }

    #[test]
    fn no_data_passes() {
        let sink = RecordingSink::new();
        let result = stress_thresholds()[0].evaluate(&sink.snapshot());
        assert!(result.passed);
        assert_eq!(result.observed, None);
    }

    #[test]
    fn threshold_list_from_env_string() {
        let list =
            parse_threshold_list("http_req_duration:p(95)<2000; http_req_failed:rate<0.05;")
                .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].to_string(), "http_req_failed: rate<0.05");

        assert!(parse_threshold_list("p(95)<2000").is_err());
    }
}
