//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Compiled instructions and the sequential executor shared by programs and
//! state machine phases.

use std::fmt;
use std::sync::Arc;

use r_ctl_expr::{AnyDataSource, AnyVariable, Ds, EvalError, Value};
use tracing::trace;

use crate::command::{Command, CommandHandle, CommandStatus};
use crate::interface::{CommandSpec, MethodSpec};

/// A command resolved and type-checked at load time. Argument sources are
/// evaluated when the instruction executes.
pub struct CommandCall<C> {
    pub object: String,
    pub spec: Arc<CommandSpec<C>>,
    pub args: Vec<AnyDataSource>,
}

/// A method resolved at load time, optionally storing its result.
pub struct MethodCall<C> {
    pub object: String,
    pub spec: Arc<MethodSpec<C>>,
    pub args: Vec<AnyDataSource>,
    pub into: Option<AnyVariable>,
}

/// One step of a program or state machine phase.
pub enum Instruction<C> {
    /// Completes when the condition holds; a false condition faults the unit.
    Evaluate(Ds<bool>),
    /// Stays in flight until the condition holds.
    Wait(Ds<bool>),
    /// Dispatches a command and stays in flight until it finishes.
    Dispatch(CommandCall<C>),
    Assign {
        variable: AnyVariable,
        value: AnyDataSource,
    },
    Call(MethodCall<C>),
}

impl<C> Instruction<C> {
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Evaluate(_) => "evaluate",
            Instruction::Wait(_) => "wait",
            Instruction::Dispatch(_) => "dispatch",
            Instruction::Assign { .. } => "assign",
            Instruction::Call(_) => "call",
        }
    }
}

impl<C: 'static> fmt::Debug for Instruction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Dispatch(call) => {
                write!(f, "dispatch {}.{}", call.object, call.spec.name())
            }
            Instruction::Call(call) => write!(f, "call {}.{}", call.object, call.spec.name()),
            Instruction::Assign { variable, .. } => write!(f, "assign {}", variable.tag()),
            other => f.write_str(other.kind()),
        }
    }
}

/// Work a unit hands to the engine because it needs the execution context.
pub enum Effect<C> {
    Dispatch(Command<C>),
    Call {
        spec: Arc<MethodSpec<C>>,
        args: Vec<Value>,
        into: Option<AnyVariable>,
    },
}

impl<C> fmt::Debug for Effect<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Dispatch(command) => write!(f, "dispatch {}", command.name()),
            Effect::Call { spec, .. } => write!(f, "call {}", spec.name()),
        }
    }
}

/// Result of advancing a sequence by one cycle.
#[derive(Debug)]
pub enum Step<C> {
    /// In-flight work has not finished yet.
    Blocked,
    /// One instruction ran to completion without engine involvement.
    Executed,
    /// One instruction ran and needs the engine to apply its effect.
    Effect(Effect<C>),
    /// Nothing left to execute.
    Finished,
    Fault(String),
}

#[derive(Default)]
enum InFlight {
    #[default]
    Idle,
    Waiting(Ds<bool>),
    Command(CommandHandle),
}

/// Executes a list of instructions strictly in order, at most one per
/// cycle.
pub struct Sequence<C> {
    instructions: Vec<Instruction<C>>,
    pointer: usize,
    in_flight: InFlight,
}

impl<C: 'static> Sequence<C> {
    pub fn new(instructions: Vec<Instruction<C>>) -> Self {
        Self {
            instructions,
            pointer: 0,
            in_flight: InFlight::Idle,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Index of the next instruction to execute.
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.in_flight, InFlight::Idle)
    }

    pub fn is_finished(&self) -> bool {
        self.pointer >= self.instructions.len() && !self.is_busy()
    }

    /// Resolve in-flight work, then execute at most one instruction.
    pub fn step(&mut self) -> Step<C> {
        match self.resolve_in_flight() {
            Ok(true) => {}
            Ok(false) => return Step::Blocked,
            Err(reason) => return Step::Fault(reason),
        }
        let Some(instruction) = self.instructions.get(self.pointer) else {
            return Step::Finished;
        };
        trace!(pointer = self.pointer, ?instruction, "executing instruction");
        self.pointer += 1;
        match instruction {
            Instruction::Evaluate(condition) => match check(condition) {
                Ok(true) => Step::Executed,
                Ok(false) => Step::Fault(format!(
                    "condition of instruction {} is false",
                    self.pointer - 1
                )),
                Err(err) => Step::Fault(err.to_string()),
            },
            Instruction::Wait(condition) => match check(condition) {
                Ok(true) => Step::Executed,
                Ok(false) => {
                    self.in_flight = InFlight::Waiting(condition.clone());
                    Step::Executed
                }
                Err(err) => Step::Fault(err.to_string()),
            },
            Instruction::Dispatch(call) => match evaluate_all(&call.args) {
                Ok(args) => {
                    let command = call.spec.bind(args);
                    self.in_flight = InFlight::Command(command.handle());
                    Step::Effect(Effect::Dispatch(command))
                }
                Err(err) => Step::Fault(err.to_string()),
            },
            Instruction::Assign { variable, value } => {
                value.invalidate();
                match value.evaluate_value() {
                    Ok(result) => match variable.set(result) {
                        Ok(()) => Step::Executed,
                        Err(found) => Step::Fault(format!(
                            "cannot assign {found} to a variable of type {}",
                            variable.tag()
                        )),
                    },
                    Err(err) => Step::Fault(err.to_string()),
                }
            }
            Instruction::Call(call) => match evaluate_all(&call.args) {
                Ok(args) => Step::Effect(Effect::Call {
                    spec: call.spec.clone(),
                    args,
                    into: call.into.clone(),
                }),
                Err(err) => Step::Fault(err.to_string()),
            },
        }
    }

    /// Drop in-flight work. A dispatched command is abandoned, not undone.
    pub fn abort(&mut self) {
        if let InFlight::Command(handle) = &self.in_flight {
            handle.abandon();
        }
        self.in_flight = InFlight::Idle;
    }

    /// Abort and return to the first instruction.
    pub fn rewind(&mut self) {
        self.abort();
        self.pointer = 0;
    }

    /// `Ok(true)` when nothing is in flight any more.
    fn resolve_in_flight(&mut self) -> Result<bool, String> {
        let finished = match &self.in_flight {
            InFlight::Idle => return Ok(true),
            InFlight::Waiting(condition) => {
                check(condition).map_err(|err| err.to_string())?
            }
            InFlight::Command(handle) => match handle.status() {
                CommandStatus::Done => true,
                CommandStatus::Failed(reason) => {
                    return Err(format!("command '{}' failed: {reason}", handle.name()))
                }
                CommandStatus::Idle | CommandStatus::Dispatched => false,
            },
        };
        if finished {
            self.in_flight = InFlight::Idle;
        }
        Ok(finished)
    }
}

impl<C> fmt::Debug for Sequence<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("len", &self.instructions.len())
            .field("pointer", &self.pointer)
            .finish_non_exhaustive()
    }
}

/// Fresh evaluation of a condition for this cycle.
fn check(condition: &Ds<bool>) -> Result<bool, EvalError> {
    condition.invalidate();
    condition.evaluate()
}

fn evaluate_all(sources: &[AnyDataSource]) -> Result<Vec<Value>, EvalError> {
    sources
        .iter()
        .map(|source| {
            source.invalidate();
            source.evaluate_value()
        })
        .collect()
}
