//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Shared primitives and utilities for the core runtime."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_engine_name() -> String {
    "controller".to_owned()
}

fn default_period() -> Duration {
    Duration::from_millis(10)
}

fn default_max_pending_commands() -> usize {
    64
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the R-CTL daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub properties: PropertiesConfig,
    /// Program and state machine script files, loaded in order.
    #[serde(default)]
    pub scripts: Vec<PathBuf>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl LoadedAppConfig {
    /// Resolve a path from the configuration relative to the file it was
    /// read from.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.source.parent() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_CTL_CONFIG";

    /// Load configuration from disk, respecting the `R_CTL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path. The
    /// first existing candidate wins.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        let mut seen = HashSet::new();
        for script in &self.scripts {
            if !seen.insert(script) {
                return Err(anyhow!(
                    "script {} is listed more than once",
                    script.display()
                ));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings of the execution engine and its cycle.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_name")]
    pub name: String,
    #[serde(default = "default_period", rename = "period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub period: Duration,
    /// Bound of both the external request queue and the pending command list.
    #[serde(default = "default_max_pending_commands")]
    pub max_pending_commands: usize,
    /// Default completion timeout for commands that declare none.
    #[serde(default)]
    pub command_timeout_cycles: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            period: default_period(),
            max_pending_commands: default_max_pending_commands(),
            command_timeout_cycles: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!("engine '{}' must have a non-zero period", self.name));
        }
        if self.max_pending_commands == 0 {
            return Err(anyhow!(
                "engine '{}' must allow at least one pending command",
                self.name
            ));
        }
        if self.command_timeout_cycles == Some(0) {
            return Err(anyhow!(
                "engine '{}' command timeout must be at least one cycle",
                self.name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Prometheus text exposition written when the daemon exits.
    #[serde(default)]
    pub export_path: Option<PathBuf>,
    /// JSON summary of cycle jitter written when the daemon exits.
    #[serde(default)]
    pub jitter_report: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            export_path: None,
            jitter_report: None,
        }
    }
}

/// Property file handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertiesConfig {
    /// CPF file loaded before scripts are compiled.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Where to write the current property values on exit.
    #[serde(default)]
    pub save_to: Option<PathBuf>,
}
