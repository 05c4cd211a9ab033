//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Cycle-driven execution of commands, programs and state machines.
//!
//! Components expose [`OperationInterface`]s of commands (asynchronous,
//! completion polled once per cycle) and methods (synchronous). Programs
//! and state machines are compiled from TOML scripts and advanced by the
//! [`ExecutionEngine`], at most one instruction per unit per cycle.

pub mod command;
pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod instruction;
pub mod interface;
pub mod metrics;
pub mod program;
pub mod script;
pub mod state_machine;

pub use command::{
    Command, CommandHandle, CommandStatus, Completion, PendingCommands, PollSummary,
};
pub use context::ExecutionContext;
pub use control::{engine_interface, ENGINE_OBJECT};
pub use engine::{CycleReport, EngineHandle, EngineSettings, ExecutionEngine, ObjectRegistry};
pub use error::{InvocationError, LifecycleError, LoadError, MethodError};
pub use instruction::{CommandCall, Instruction, MethodCall};
pub use interface::{ArgumentDescriptor, CommandSpec, MethodSpec, OperationInterface};
pub use metrics::EngineMetrics;
pub use program::{Program, ProgramStatus};
pub use script::{load_script_file, parse_script, ScriptCompiler, ScriptDocument};
pub use state_machine::{MachineStatus, StateDefinition, StateMachine};
