//! End-of-run summary: metric snapshots, the text report and JSON export.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::percentiles::PercentileStats;
use crate::thresholds::ThresholdResult;

/// Point-in-time copy of the recorded counters and trend statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub trends: BTreeMap<String, PercentileStats>,
}

impl MetricsSnapshot {
    /// Counter value by name; unknown names read as zero.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn trend(&self, name: &str) -> Option<&PercentileStats> {
        self.trends.get(name)
    }

    /// `numerator / denominator`, or None when the denominator is zero.
    pub fn ratio(&self, numerator: &str, denominator: &str) -> Option<f64> {
        let total = self.counter(denominator);
        if total == 0 {
            return None;
        }
        Some(self.counter(numerator) as f64 / total as f64)
    }
}

/// Everything reported once the scheduler has finished.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub elapsed_secs: f64,
    pub peak_vus: u64,
    pub metrics: MetricsSnapshot,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunReport {
    pub fn new(
        elapsed: Duration,
        peak_vus: u64,
        metrics: MetricsSnapshot,
        thresholds: Vec<ThresholdResult>,
    ) -> Self {
        Self {
            elapsed_secs: elapsed.as_secs_f64(),
            peak_vus,
            metrics,
            thresholds,
        }
    }

    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    /// Renders the summary table printed at the end of a run.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "run duration: {:.1}s, peak vus: {}\n\n",
            self.elapsed_secs, self.peak_vus
        ));

        for (name, value) in &self.metrics.counters {
            out.push_str(&format!("  {:<20} {:>10}\n", name, value));
        }
        if let Some(rate) = self.metrics.ratio("http_req_failed", "http_reqs") {
            out.push_str(&format!("  {:<20} {:>9.2}%\n", "http_req_failed_rate", rate * 100.0));
        }

        if !self.metrics.trends.is_empty() {
            out.push('\n');
        }
        for (name, stats) in &self.metrics.trends {
            out.push_str(&format!("  {:<20} {}\n", name, stats.format()));
        }

        if !self.thresholds.is_empty() {
            out.push_str("\nthresholds:\n");
            for result in &self.thresholds {
                let mark = if result.passed { "ok" } else { "FAILED" };
                let observed = result
                    .observed
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "n/a".to_string());
                out.push_str(&format!(
                    "  [{}] {} {} (observed {})\n",
                    mark, result.metric, result.expression, observed
                ));
            }
        }

        out
    }

    /// Writes the report as pretty-printed JSON.
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricsSnapshot {
        let mut counters = BTreeMap::new();
        counters.insert("http_reqs".to_string(), 200);
        counters.insert("http_req_failed".to_string(), 5);
        counters.insert("login_success".to_string(), 95);
        MetricsSnapshot {
            counters,
            trends: BTreeMap::new(),
        }
    }

    #[test]
    fn ratio_and_missing_counter() {
        let s = snapshot();
        assert_eq!(s.ratio("http_req_failed", "http_reqs"), Some(0.025));
        assert_eq!(s.ratio("http_req_failed", "iterations"), None);
        assert_eq!(s.counter("logout_fail"), 0);
    }

    #[test]
    fn render_lists_counters() {
        let report = RunReport::new(Duration::from_secs(120), 100, snapshot(), vec![]);
        let text = report.render();
        assert!(text.contains("login_success"));
        assert!(text.contains("peak vus: 100"));
        assert!(text.contains("2.50%"), "{}", text);
        assert!(report.thresholds_passed());
    }

    #[test]
    fn export_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let report = RunReport::new(Duration::from_secs(1), 1, snapshot(), vec![]);
        report.export_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["metrics"]["counters"]["login_success"], 95);
        assert_eq!(value["peak_vus"], 1);
    }
}
