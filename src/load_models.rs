use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Duration;

use crate::utils::parse_duration_string;

/// One window of the ramp schedule.
///
/// Over `duration` the number of virtual users moves linearly from the
/// previous stage's target to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s->{}", self.duration.as_secs_f64(), self.target)
    }
}

/// Named ramp schedules, selectable with `PROFILE` or `load.profile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilePreset {
    Smoke,
    Stress,
}

impl ProfilePreset {
    pub fn ramp_profile(self) -> RampProfile {
        match self {
            ProfilePreset::Smoke => RampProfile::smoke(),
            ProfilePreset::Stress => RampProfile::stress(),
        }
    }
}

impl FromStr for ProfilePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smoke" => Ok(ProfilePreset::Smoke),
            "stress" => Ok(ProfilePreset::Stress),
            other => Err(format!(
                "Unknown profile '{}'. Expected 'smoke' or 'stress'.",
                other
            )),
        }
    }
}

/// Ordered virtual-user ramp schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    pub stages: Vec<Stage>,
    /// VU count before the first stage starts ramping.
    pub start_vus: u64,
}

impl RampProfile {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            start_vus: 0,
        }
    }

    /// 30s ramp to 100 VUs, 1m hold at 100, 30s ramp down.
    pub fn smoke() -> Self {
        Self::new(vec![
            Stage::new(Duration::from_secs(30), 100),
            Stage::new(Duration::from_secs(60), 100),
            Stage::new(Duration::from_secs(30), 0),
        ])
    }

    /// 1m to 500 VUs (each account once), 2m to 5k, 2m to 10k, 2m ramp down.
    pub fn stress() -> Self {
        Self::new(vec![
            Stage::new(Duration::from_secs(60), 500),
            Stage::new(Duration::from_secs(120), 5_000),
            Stage::new(Duration::from_secs(120), 10_000),
            Stage::new(Duration::from_secs(120), 0),
        ])
    }

    /// Parses a stage list such as `"30s:100,1m:100,30s:0"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut stages = Vec::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (duration_str, target_str) = part.split_once(':').ok_or_else(|| {
                format!(
                    "Invalid stage '{}'. Expected 'duration:target', e.g. '30s:100'.",
                    part
                )
            })?;
            let duration = parse_duration_string(duration_str)?;
            let target: u64 = target_str.trim().parse().map_err(|_| {
                format!(
                    "Invalid stage target '{}' in '{}'. Must be a non-negative integer.",
                    target_str.trim(),
                    part
                )
            })?;
            stages.push(Stage::new(duration, target));
        }

        if stages.is_empty() {
            return Err("At least one stage must be defined".to_string());
        }

        let profile = Self::new(stages);
        if profile.checked_total_duration().is_none() {
            return Err(format!("Total duration of '{}' is too large", s.trim()));
        }
        Ok(profile)
    }

    /// Sum of all stage durations, or `None` if it does not fit a `Duration`.
    pub fn checked_total_duration(&self) -> Option<Duration> {
        self.stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
    }

    /// Sum of all stage durations, saturating at `Duration::MAX`.
    pub fn total_duration(&self) -> Duration {
        self.checked_total_duration().unwrap_or(Duration::MAX)
    }

    /// Highest VU count the schedule ever asks for.
    pub fn peak_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_vus)
    }

    /// Target number of virtual users `elapsed` into the run.
    ///
    /// Interpolates linearly inside the active stage, rounding down. Past the
    /// end of the schedule the last target holds.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let mut stage_start = Duration::ZERO;
        let mut previous = self.start_vus;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - previous as f64;
                return (previous as f64 + diff * progress).floor() as u64;
            }
            stage_start = stage_end;
            previous = stage.target;
        }

        previous
    }
}
