//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Periodic cycle driver."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Real-time scheduling helpers: a fixed-period rate limiter and a task
//! that drives a [`PeriodicActivity`] until shutdown.

pub mod scheduling;

pub use scheduling::{spawn_periodic, PeriodicActivity, RateLimiter, RunLimits};
