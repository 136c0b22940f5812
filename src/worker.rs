use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::load_models::RampProfile;
use crate::metrics::{MetricsSink, ACTIVE_VUS};
use crate::workflow::LoginWorkflow;

/// Default interval at which the controller re-evaluates the VU target.
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Default time in-flight iterations get once the schedule has ended.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Scheduling parameters for a run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub profile: RampProfile,
    pub tick: Duration,
    pub graceful_stop: Duration,
}

impl RunnerConfig {
    pub fn new(profile: RampProfile) -> Self {
        Self {
            profile,
            tick: DEFAULT_TICK,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }
}

/// What the scheduler observed over a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub peak_vus: u64,
    pub iterations: u64,
    /// VUs still busy when the graceful stop ran out.
    pub aborted_vus: usize,
}

/// State shared between the controller and its virtual users.
struct VuControl {
    target: AtomicU64,
    stopped: AtomicBool,
    iterations: AtomicU64,
}

/// Runs the login workflow following the ramp profile.
///
/// The controller wakes every `tick`, computes the current VU target and
/// spawns a task for each index below it that is not running. A VU keeps
/// iterating until the run ends or its index is no longer below the target;
/// the check happens between iterations, so scaling down never cuts a login
/// short. Once the schedule is over, in-flight iterations get `graceful_stop`
/// to finish before they are aborted.
pub async fn run_profile(
    workflow: Arc<LoginWorkflow>,
    sink: Arc<dyn MetricsSink>,
    config: RunnerConfig,
) -> RunSummary {
    let control = Arc::new(VuControl {
        target: AtomicU64::new(0),
        stopped: AtomicBool::new(false),
        iterations: AtomicU64::new(0),
    });
    let total_duration = config.profile.total_duration();

    info!(
        stages = config.profile.stages.len(),
        total_duration_secs = total_duration.as_secs_f64(),
        peak_target = config.profile.peak_target(),
        "Starting ramp schedule"
    );

    let start_time = Instant::now();
    let mut vus: HashMap<u64, JoinHandle<()>> = HashMap::new();
    let mut peak_vus = 0u64;
    let mut last_target = None;

    let mut ticker = time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let elapsed = start_time.elapsed();
        if elapsed >= total_duration {
            break;
        }

        let target = config.profile.target_at(elapsed);
        control.target.store(target, Ordering::Relaxed);
        if last_target != Some(target) {
            debug!(
                elapsed_secs = elapsed.as_secs_f64(),
                target_vus = target,
                "VU target changed"
            );
            last_target = Some(target);
        }

        vus.retain(|_, handle| !handle.is_finished());

        for vu_index in 0..target {
            if vus.contains_key(&vu_index) {
                continue;
            }
            let handle = tokio::spawn(run_vu(
                vu_index,
                workflow.clone(),
                sink.clone(),
                control.clone(),
            ));
            vus.insert(vu_index, handle);
        }

        peak_vus = peak_vus.max(vus.len() as u64);
        ACTIVE_VUS.set(vus.len() as i64);
    }

    control.stopped.store(true, Ordering::Relaxed);
    control.target.store(0, Ordering::Relaxed);

    let in_flight = vus.values().filter(|h| !h.is_finished()).count();
    info!(
        in_flight_vus = in_flight,
        graceful_stop_secs = config.graceful_stop.as_secs_f64(),
        "Schedule finished, waiting for in-flight iterations"
    );

    // No deadline when the graceful stop is too long to represent.
    let deadline = Instant::now().checked_add(config.graceful_stop);
    let mut aborted_vus = 0;
    for (vu_index, mut handle) in vus.drain() {
        let joined = match deadline {
            Some(deadline) => time::timeout_at(deadline, &mut handle).await,
            None => Ok((&mut handle).await),
        };
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(vu = vu_index, error = %e, "Virtual user task ended abnormally");
            }
            Err(_) => {
                handle.abort();
                aborted_vus += 1;
            }
        }
    }
    ACTIVE_VUS.set(0);

    if aborted_vus > 0 {
        warn!(
            aborted_vus,
            "Graceful stop expired, aborted in-flight iterations"
        );
    }

    let summary = RunSummary {
        elapsed: start_time.elapsed(),
        peak_vus,
        iterations: control.iterations.load(Ordering::Relaxed),
        aborted_vus,
    };

    info!(
        elapsed_secs = summary.elapsed.as_secs_f64(),
        peak_vus = summary.peak_vus,
        iterations = summary.iterations,
        "Run complete"
    );

    summary
}

async fn run_vu(
    vu_index: u64,
    workflow: Arc<LoginWorkflow>,
    sink: Arc<dyn MetricsSink>,
    control: Arc<VuControl>,
) {
    debug!(vu = vu_index, "Virtual user starting");

    while !control.stopped.load(Ordering::Relaxed)
        && vu_index < control.target.load(Ordering::Relaxed)
    {
        workflow.run_iteration(vu_index, sink.as_ref()).await;
        control.iterations.fetch_add(1, Ordering::Relaxed);
    }

    debug!(vu = vu_index, "Virtual user stopping");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_defaults() {
        let config = RunnerConfig::new(RampProfile::smoke());
        assert_eq!(config.tick, Duration::from_millis(250));
        assert_eq!(config.graceful_stop, Duration::from_secs(30));
    }
}
