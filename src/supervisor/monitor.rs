//! Hashrate Health Monitor
//!
//! Samples the live worker's hashrate on a fixed period and reports when it
//! has stayed at (or near) zero for too many consecutive samples.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::SupervisorConfig;

/// Anything that can report the current productivity of a worker
pub trait HealthProbe: Send + Sync + 'static {
    fn current_health_metric(&self) -> f64;
}

/// Consecutive unhealthy sample counter
///
/// Lives as long as the monitor, across worker restarts.
#[derive(Debug, Default)]
pub struct HealthState {
    consecutive_unhealthy_samples: AtomicU32,
}

impl HealthState {
    pub fn consecutive_unhealthy_samples(&self) -> u32 {
        self.consecutive_unhealthy_samples.load(Ordering::SeqCst)
    }

    /// Record one sample. Returns true when the streak is reached; the
    /// counter is reset at that point.
    pub fn record(&self, healthy: bool, streak: u32) -> bool {
        if healthy {
            self.consecutive_unhealthy_samples.store(0, Ordering::SeqCst);
            return false;
        }

        let count = self.consecutive_unhealthy_samples.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= streak {
            self.consecutive_unhealthy_samples.store(0, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// Periodic hashrate sampler
pub struct HealthMonitor {
    period: Duration,
    threshold: f64,
    streak: u32,
    state: Arc<HealthState>,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            period: config.health_check_interval(),
            threshold: config.unhealthy_threshold,
            streak: config.unhealthy_streak.max(1),
            state: Arc::new(HealthState::default()),
            active: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Start sampling `probe`; the first sample is taken one period from now.
    ///
    /// `on_unhealthy_streak` runs each time the streak is reached. A monitor
    /// that is already running is stopped first.
    pub fn start<P, F>(&mut self, probe: P, on_unhealthy_streak: F)
    where
        P: HealthProbe,
        F: Fn() + Send + Sync + 'static,
    {
        self.stop();

        let active = Arc::new(AtomicBool::new(true));
        self.active = active.clone();

        let state = self.state.clone();
        let period = self.period;
        let threshold = self.threshold;
        let streak = self.streak;
        let first_sample = Instant::now() + period;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_sample, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !active.load(Ordering::SeqCst) {
                    break;
                }

                let hashrate = probe.current_health_metric();
                let healthy = hashrate > threshold;
                if !healthy {
                    warn!(
                        "Hashrate is zero ({}/{})",
                        state.consecutive_unhealthy_samples() + 1,
                        streak
                    );
                } else {
                    debug!("Hashrate sample: {:.2}", hashrate);
                }

                if state.record(healthy, streak) {
                    on_unhealthy_streak();
                }
            }
        }));

        debug!("Health monitor started (period: {}s)", self.period.as_secs());
    }

    /// Stop sampling.
    ///
    /// Aborting is asynchronous: on a multi-threaded runtime a sample already
    /// in progress may still invoke the callback once after this returns.
    /// Callers tag callbacks with the worker generation to discard those.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn consecutive_unhealthy(&self) -> u32 {
        self.state.consecutive_unhealthy_samples()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
