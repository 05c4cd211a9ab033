//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Shared primitives and utilities for the core runtime."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::time::abs_diff;

/// Samples kept by [`JitterHistogram::default`].
pub const DEFAULT_JITTER_WINDOW: usize = 10_000;

/// Sliding window of cycle jitter samples.
#[derive(Debug)]
pub struct JitterHistogram {
    samples: Mutex<VecDeque<f64>>,
    window: usize,
}

impl Default for JitterHistogram {
    fn default() -> Self {
        Self::with_window(DEFAULT_JITTER_WINDOW)
    }
}

impl JitterHistogram {
    /// Storage for `window` samples is reserved up front; older samples are
    /// dropped once it is full.
    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    pub fn record(&self, jitter: Duration) {
        let nanos = jitter.as_secs_f64() * 1_000_000_000.0;
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = if samples.len() > 1 {
            samples
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>()
                / (count - 1.0)
        } else {
            0.0
        };
        Some(JitterSummary {
            mean_ns: mean,
            std_dev_ns: variance.sqrt(),
            max_ns: samples.iter().copied().fold(f64::MIN, f64::max),
            min_ns: samples.iter().copied().fold(f64::MAX, f64::min),
            samples: samples.len() as u64,
        })
    }

    /// Write the summary as pretty JSON. Nothing is written without samples.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(summary) = self.summary() {
            let mut file = File::create(path)?;
            let json = serde_json::to_vec_pretty(&summary).map_err(std::io::Error::other)?;
            file.write_all(&json)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JitterSummary {
    pub mean_ns: f64,
    pub std_dev_ns: f64,
    pub max_ns: f64,
    pub min_ns: f64,
    pub samples: u64,
}

/// Measures tick intervals against a target period.
#[derive(Debug)]
pub struct LoopTimingReporter {
    target_interval: Duration,
    last_tick: Mutex<Option<Instant>>,
    histogram: JitterHistogram,
}

impl LoopTimingReporter {
    pub fn new(target_interval: Duration) -> Self {
        Self {
            target_interval,
            last_tick: Mutex::new(None),
            histogram: JitterHistogram::default(),
        }
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    pub fn record_tick(&self) {
        self.record_tick_at(Instant::now());
    }

    /// Record a tick observed at `now`.
    pub fn record_tick_at(&self, now: Instant) {
        let mut last_tick = self.last_tick.lock();
        if let Some(previous) = *last_tick {
            let actual = now.saturating_duration_since(previous);
            self.histogram
                .record(abs_diff(actual, self.target_interval));
        }
        *last_tick = Some(now);
    }

    pub fn histogram(&self) -> &JitterHistogram {
        &self.histogram
    }
}
