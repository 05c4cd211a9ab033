//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::path::PathBuf;

use r_ctl_expr::{CompileError, TypeTag};
use thiserror::Error;

/// Rejections reported synchronously to the caller of a command or method.
/// Nothing has been dispatched or mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    #[error("no object named '{0}'")]
    UnknownObject(String),
    #[error("object '{object}' has no operation '{operation}'")]
    UnknownOperation { object: String, operation: String },
    #[error("'{operation}' takes {expected} argument(s), got {found}")]
    WrongArity {
        operation: String,
        expected: usize,
        found: usize,
    },
    #[error("'{operation}' argument {index} ('{name}') must be {expected}, got {found}")]
    WrongType {
        operation: String,
        index: usize,
        name: String,
        expected: TypeTag,
        found: TypeTag,
    },
    #[error("request queue is full")]
    QueueFull,
    #[error("execution engine is no longer running")]
    EngineStopped,
    #[error(transparent)]
    Method(#[from] MethodError),
}

/// Failure reported by a method body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MethodError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// A lifecycle request that does not hold for the unit's current state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("no program named '{0}'")]
    UnknownProgram(String),
    #[error("no state machine named '{0}'")]
    UnknownStateMachine(String),
    #[error("a unit named '{0}' is already loaded")]
    AlreadyLoaded(String),
    #[error("cannot {action} '{unit}' while {state}")]
    InvalidTransition {
        unit: String,
        action: &'static str,
        state: &'static str,
    },
    #[error("state machine '{machine}' has no state '{state}'")]
    UnknownState { machine: String, state: String },
    #[error("state machine '{machine}' cannot reach '{target}' from '{from}' now")]
    NoTransition {
        machine: String,
        from: String,
        target: String,
    },
}

/// Errors raised while loading or compiling a script.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse script {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{unit}: {source}")]
    Compile {
        unit: String,
        #[source]
        source: CompileError,
    },
    #[error("{unit}: {source}")]
    Invocation {
        unit: String,
        #[source]
        source: InvocationError,
    },
    #[error("{unit}: variable '{variable}' is not declared")]
    UndeclaredVariable { unit: String, variable: String },
    #[error("{unit}: cannot assign {found} to '{variable}' of type {expected}")]
    AssignmentType {
        unit: String,
        variable: String,
        expected: TypeTag,
        found: TypeTag,
    },
    #[error("{unit}: state '{state}' is not defined")]
    UnknownState { unit: String, state: String },
    #[error("{unit}: state '{state}' is defined twice")]
    DuplicateState { unit: String, state: String },
    #[error("{unit}: a state machine needs at least one state")]
    NoStates { unit: String },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_name_the_unit() {
        let err = LifecycleError::InvalidTransition {
            unit: "homing".into(),
            action: "start",
            state: "running",
        };
        assert_eq!(err.to_string(), "cannot start 'homing' while running");
    }

    #[test]
    fn method_lifecycle_errors_pass_through() {
        let err = InvocationError::from(MethodError::from(LifecycleError::UnknownProgram(
            "p".into(),
        )));
        assert_eq!(err.to_string(), "no program named 'p'");
    }
}
