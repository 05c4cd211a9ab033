//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Shared primitives and utilities for the core runtime."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Core shared primitives for the R-CTL workspace: configuration loading,
//! tracing initialisation, and cycle timing statistics.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AppConfig, EngineConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, PropertiesConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{JitterHistogram, JitterSummary, LoopTimingReporter};
