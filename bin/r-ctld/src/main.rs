//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "binary"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Binary entrypoint for the R-CTL daemon."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
mod objects;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use r_ctl_common::config::{AppConfig, LoadedAppConfig};
use r_ctl_common::logging::init_tracing;
use r_ctl_common::LoopTimingReporter;
use r_ctl_exec::{
    load_script_file, EngineMetrics, EngineSettings, ExecutionEngine, ENGINE_OBJECT,
};
use r_ctl_expr::{ExpressionComposer, Scope, Value};
use r_ctl_marshal::{read_cpf_file, write_cpf_file, PropertyBag};
use r_ctl_rt::{spawn_periodic, RunLimits};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::objects::Daemon;

#[derive(Debug, Parser)]
#[command(author, version, about = "R-CTL control daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Load scripts and run the execution engine")]
    Run {
        #[arg(long, value_name = "UNIT", help = "Program or state machine to start")]
        start: Vec<String>,

        #[arg(long, help = "Stop after this many cycles")]
        cycles: Option<u64>,
    },
    #[command(about = "Compile the configured scripts without running them")]
    Check,
}

struct Setup {
    engine: ExecutionEngine<Daemon>,
    properties: PropertyBag,
    globals: Scope,
    registry: Option<Arc<Registry>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    init_tracing("r-ctld", &loaded.config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run {
        start: Vec::new(),
        cycles: None,
    }) {
        Commands::Run { start, cycles } => run_daemon(&loaded, &start, cycles).await,
        Commands::Check => {
            let setup = build(&loaded)?;
            let context = setup.engine.context();
            for program in context.programs() {
                println!("program {} ({} instructions)", program.name(), program.len());
            }
            for machine in context.state_machines() {
                let states = machine.state_names().collect::<Vec<_>>().join(", ");
                println!("state machine {} [{}]", machine.name(), states);
            }
            Ok(())
        }
    }
}

/// Load properties and scripts into a fresh engine.
fn build(loaded: &LoadedAppConfig) -> Result<Setup> {
    let config = &loaded.config;
    let properties = match &config.properties.file {
        Some(file) => {
            let path = loaded.resolve(file);
            read_cpf_file(&path)
                .with_context(|| format!("failed to load properties from {}", path.display()))?
        }
        None => PropertyBag::new(),
    };
    let globals = properties.to_scope();

    let settings = EngineSettings {
        name: config.engine.name.clone(),
        max_pending_commands: config.engine.max_pending_commands,
        command_timeout_cycles: config.engine.command_timeout_cycles,
    };
    let mut engine = ExecutionEngine::new(Daemon::default(), settings);
    let registry = if config.metrics.enabled {
        let registry = Arc::new(Registry::new());
        let metrics = EngineMetrics::new(registry.clone(), config.engine.name.clone())?;
        engine = engine.with_metrics(metrics);
        Some(registry)
    } else {
        info!("metrics disabled by configuration");
        None
    };
    engine.add_object(objects::clock());
    engine.add_object(objects::log());

    let composer = ExpressionComposer::default();
    for script in &config.scripts {
        let path = loaded.resolve(script);
        let document = load_script_file(&path)?;
        let units = engine
            .load_script(&document, &composer, &globals)
            .with_context(|| format!("failed to load script {}", path.display()))?;
        info!(script = %path.display(), ?units, "script loaded");
    }

    Ok(Setup {
        engine,
        properties,
        globals,
        registry,
    })
}

async fn run_daemon(loaded: &LoadedAppConfig, start: &[String], cycles: Option<u64>) -> Result<()> {
    let Setup {
        mut engine,
        mut properties,
        globals,
        registry,
    } = build(loaded)?;
    let config = &loaded.config;

    for unit in start {
        start_unit(&mut engine, unit)?;
    }

    let period = config.engine.period;
    let reporter = Arc::new(LoopTimingReporter::new(period));
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let mut task = spawn_periodic(
        engine,
        period,
        RunLimits { max_cycles: cycles },
        shutdown_rx,
        reporter.clone(),
    );

    info!(engine = %config.engine.name, "daemon running; waiting for termination signal");
    let engine = tokio::select! {
        joined = &mut task => joined?,
        signal = signal::ctrl_c() => {
            signal?;
            info!("ctrl-c received; shutting down");
            let _ = shutdown.send(());
            task.await?
        }
    };

    for program in engine.context().programs() {
        match program.fault() {
            Some(fault) => warn!(program = %program.name(), %fault, "program ended in error"),
            None => info!(program = %program.name(), status = %program.status(), "final program status"),
        }
    }
    for machine in engine.context().state_machines() {
        info!(
            machine = %machine.name(),
            status = %machine.status(),
            state = machine.current_state().unwrap_or("-"),
            "final state machine status"
        );
    }

    if let (Some(registry), Some(path)) = (&registry, &config.metrics.export_path) {
        let path = loaded.resolve(path);
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        fs::write(&path, buffer)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "metrics exported");
    }
    if let Some(path) = &config.metrics.jitter_report {
        let path = loaded.resolve(path);
        reporter.histogram().write_json(&path)?;
        info!(path = %path.display(), "jitter report written");
    }
    if let Some(path) = &config.properties.save_to {
        let path = loaded.resolve(path);
        let updated = properties.refresh_from_scope(&globals);
        write_cpf_file(&properties, &path)?;
        info!(path = %path.display(), updated, "properties saved");
    }
    Ok(())
}

/// Start a program, or activate and start a state machine, through the
/// engine's control surface.
fn start_unit(engine: &mut ExecutionEngine<Daemon>, unit: &str) -> Result<()> {
    let args = || vec![Value::from(unit)];
    let commands: &[&str] = if engine.context().program(unit).is_some() {
        &["startProgram"][..]
    } else if engine.context().state_machine(unit).is_some() {
        &["activateStateMachine", "startStateMachine"][..]
    } else {
        bail!("no program or state machine named '{unit}'");
    };
    for command in commands {
        let handle = engine.dispatch_command(ENGINE_OBJECT, command, args())?;
        if handle.status().is_failed() {
            bail!("{command} '{unit}' was refused");
        }
    }
    info!(%unit, "unit started");
    Ok(())
}
