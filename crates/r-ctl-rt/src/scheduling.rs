//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Periodic cycle driver."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_ctl_common::time::{duration_to_micros, monotonic_now};
use r_ctl_common::LoopTimingReporter;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Async rate limiter keeping a fixed loop period. Late ticks shift the
/// schedule instead of bursting to catch up.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Work executed once per period. `cycle` must not block.
pub trait PeriodicActivity: Send + 'static {
    fn cycle(&mut self);

    /// Name used in log events.
    fn name(&self) -> &str {
        "activity"
    }
}

/// When a periodic task stops on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

/// Drive `activity` every `period` until `shutdown` fires or the limits are
/// reached. The activity is handed back when the task ends.
pub fn spawn_periodic<A: PeriodicActivity>(
    mut activity: A,
    period: Duration,
    limits: RunLimits,
    mut shutdown: broadcast::Receiver<()>,
    reporter: Arc<LoopTimingReporter>,
) -> JoinHandle<A> {
    tokio::spawn(async move {
        let mut limiter = RateLimiter::new(period);
        let mut cycles = 0u64;
        info!(activity = %activity.name(), period_us = duration_to_micros(period), "periodic activity started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(activity = %activity.name(), "shutdown requested");
                    break;
                }
                _ = limiter.tick() => {
                    reporter.record_tick();
                    let started = monotonic_now();
                    activity.cycle();
                    let elapsed = started.elapsed();
                    if elapsed > period {
                        warn!(
                            activity = %activity.name(),
                            overrun_us = duration_to_micros(elapsed - period),
                            "cycle overran its period"
                        );
                    }
                    cycles += 1;
                    if limits.max_cycles.is_some_and(|max| cycles >= max) {
                        break;
                    }
                }
            }
        }
        info!(activity = %activity.name(), cycles, "periodic activity stopped");
        activity
    })
}
