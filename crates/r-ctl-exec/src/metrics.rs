//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Metrics published by an execution engine, labelled by engine name.
#[derive(Clone)]
pub struct EngineMetrics {
    engine: String,
    cycles: IntCounterVec,
    cycle_duration: HistogramVec,
    unit_faults: IntCounterVec,
    commands_finished: IntCounterVec,
    pending_commands: IntGaugeVec,
    registry: Arc<Registry>,
}

impl EngineMetrics {
    /// Register all engine metrics with the provided registry.
    pub fn new(registry: Arc<Registry>, engine: impl Into<String>) -> prometheus::Result<Self> {
        let cycles = IntCounterVec::new(
            Opts::new("r_ctl_engine_cycles_total", "Execution engine cycles run"),
            &["engine"],
        )?;
        registry.register(Box::new(cycles.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "r_ctl_engine_cycle_duration_seconds",
            "Time spent inside one execution engine cycle",
        )
        .buckets(prometheus::exponential_buckets(0.000_001, 2.0, 16)?);
        let cycle_duration = HistogramVec::new(histogram_opts, &["engine"])?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let unit_faults = IntCounterVec::new(
            Opts::new(
                "r_ctl_engine_unit_faults_total",
                "Programs and state machines that entered the error state",
            ),
            &["engine", "kind"],
        )?;
        registry.register(Box::new(unit_faults.clone()))?;

        let commands_finished = IntCounterVec::new(
            Opts::new(
                "r_ctl_engine_commands_finished_total",
                "Commands that completed or failed",
            ),
            &["engine", "outcome"],
        )?;
        registry.register(Box::new(commands_finished.clone()))?;

        let pending_commands = IntGaugeVec::new(
            Opts::new(
                "r_ctl_engine_pending_commands",
                "Dispatched commands awaiting completion",
            ),
            &["engine"],
        )?;
        registry.register(Box::new(pending_commands.clone()))?;

        Ok(Self {
            engine: engine.into(),
            cycles,
            cycle_duration,
            unit_faults,
            commands_finished,
            pending_commands,
            registry,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn observe_cycle(&self, seconds: f64, pending: usize) {
        self.cycles.with_label_values(&[self.engine.as_str()]).inc();
        self.cycle_duration
            .with_label_values(&[self.engine.as_str()])
            .observe(seconds);
        self.pending_commands
            .with_label_values(&[self.engine.as_str()])
            .set(pending as i64);
    }

    pub(crate) fn record_fault(&self, kind: &str) {
        self.unit_faults
            .with_label_values(&[self.engine.as_str(), kind])
            .inc();
    }

    pub(crate) fn record_commands(&self, done: usize, failed: usize) {
        if done > 0 {
            self.commands_finished
                .with_label_values(&[self.engine.as_str(), "done"])
                .inc_by(done as u64);
        }
        if failed > 0 {
            self.commands_finished
                .with_label_values(&[self.engine.as_str(), "failed"])
                .inc_by(failed as u64);
        }
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
