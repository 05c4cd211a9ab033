//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::fmt;

use tracing::{debug, warn};

use crate::error::LifecycleError;
use crate::instruction::{Effect, Instruction, Sequence, Step};

/// Lifecycle of a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramStatus {
    Loaded,
    Running,
    Paused,
    Stopped,
    Error,
}

impl ProgramStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramStatus::Loaded => "loaded",
            ProgramStatus::Running => "running",
            ProgramStatus::Paused => "paused",
            ProgramStatus::Stopped => "stopped",
            ProgramStatus::Error => "in error",
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named instruction list with a run/pause/step lifecycle.
pub struct Program<C> {
    name: String,
    sequence: Sequence<C>,
    status: ProgramStatus,
    step_requested: bool,
    fault: Option<String>,
}

impl<C: 'static> Program<C> {
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction<C>>) -> Self {
        Self {
            name: name.into(),
            sequence: Sequence::new(instructions),
            status: ProgramStatus::Loaded,
            step_requested: false,
            fault: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProgramStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == ProgramStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == ProgramStatus::Paused
    }

    pub fn in_error(&self) -> bool {
        self.status == ProgramStatus::Error
    }

    /// Reason of the last fault, kept until reset.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Index of the next instruction.
    pub fn pointer(&self) -> usize {
        self.sequence.pointer()
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn step_pending(&self) -> bool {
        self.step_requested
    }

    /// Run from the first instruction, or resume when paused.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        match self.status {
            ProgramStatus::Loaded | ProgramStatus::Stopped => self.sequence.rewind(),
            ProgramStatus::Paused => self.step_requested = false,
            ProgramStatus::Running | ProgramStatus::Error => return Err(self.refuse("start")),
        }
        self.enter(ProgramStatus::Running);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), LifecycleError> {
        if self.status != ProgramStatus::Running {
            return Err(self.refuse("pause"));
        }
        self.enter(ProgramStatus::Paused);
        Ok(())
    }

    /// Request a single instruction on the next cycle. At most one step may
    /// be pending.
    pub fn step(&mut self) -> Result<(), LifecycleError> {
        match (self.status, self.step_requested) {
            (ProgramStatus::Paused, false) => {
                self.step_requested = true;
                Ok(())
            }
            (ProgramStatus::Paused, true) => Err(LifecycleError::InvalidTransition {
                unit: self.name.clone(),
                action: "step",
                state: "a step is pending",
            }),
            _ => Err(self.refuse("step")),
        }
    }

    /// Abort the in-flight instruction and stop.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        match self.status {
            ProgramStatus::Running | ProgramStatus::Paused => {
                self.sequence.abort();
                self.step_requested = false;
                self.enter(ProgramStatus::Stopped);
                Ok(())
            }
            _ => Err(self.refuse("stop")),
        }
    }

    /// Back to `Loaded`; the only way out of `Error`.
    pub fn reset(&mut self) -> Result<(), LifecycleError> {
        if self.status == ProgramStatus::Running {
            return Err(self.refuse("reset"));
        }
        self.sequence.rewind();
        self.step_requested = false;
        self.fault = None;
        self.enter(ProgramStatus::Loaded);
        Ok(())
    }

    /// Advance by at most one instruction.
    pub(crate) fn cycle(&mut self) -> Option<Effect<C>> {
        match self.status {
            ProgramStatus::Running => self.advance(),
            ProgramStatus::Paused if self.step_requested => {
                self.step_requested = false;
                self.advance()
            }
            _ => None,
        }
    }

    pub(crate) fn fail(&mut self, reason: String) {
        warn!(program = %self.name, pointer = self.sequence.pointer(), %reason, "program fault");
        self.sequence.abort();
        self.step_requested = false;
        self.fault = Some(reason);
        self.status = ProgramStatus::Error;
    }

    fn advance(&mut self) -> Option<Effect<C>> {
        let effect = match self.sequence.step() {
            Step::Blocked | Step::Executed | Step::Finished => None,
            Step::Effect(effect) => Some(effect),
            Step::Fault(reason) => {
                self.fail(reason);
                return None;
            }
        };
        if self.sequence.is_finished() {
            debug!(program = %self.name, "program reached its end");
            self.enter(ProgramStatus::Stopped);
        }
        effect
    }

    fn enter(&mut self, status: ProgramStatus) {
        if self.status != status {
            debug!(program = %self.name, from = %self.status, to = %status, "program state change");
            self.status = status;
        }
    }

    fn refuse(&self, action: &'static str) -> LifecycleError {
        LifecycleError::InvalidTransition {
            unit: self.name.clone(),
            action,
            state: self.status.name(),
        }
    }
}

impl<C> fmt::Debug for Program<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("sequence", &self.sequence)
            .field("fault", &self.fault)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_ctl_expr::{AnyDataSource, AnyVariable, Ds, Value, ValueDataSource};
    use std::sync::Arc;

    struct Ctx;

    fn counter_program(steps: i64) -> (Program<Ctx>, AnyVariable) {
        let counter = AnyVariable::new(Value::Int(0));
        let instructions = (1..=steps)
            .map(|n| Instruction::Assign {
                variable: counter.clone(),
                value: AnyDataSource::constant(Value::Int(n)),
            })
            .collect();
        (Program::new("count", instructions), counter)
    }

    #[test]
    fn running_program_executes_one_instruction_per_cycle() {
        let (mut program, counter) = counter_program(3);
        program.start().unwrap();
        program.cycle();
        assert_eq!(counter.get(), Value::Int(1));
        program.cycle();
        program.cycle();
        assert_eq!(counter.get(), Value::Int(3));
        assert_eq!(program.status(), ProgramStatus::Stopped);
    }

    #[test]
    fn paused_program_moves_only_on_step() {
        let (mut program, counter) = counter_program(3);
        program.start().unwrap();
        program.cycle();
        program.pause().unwrap();
        for _ in 0..5 {
            program.cycle();
        }
        assert_eq!(program.pointer(), 1);

        program.step().unwrap();
        assert!(program.step().is_err());
        program.cycle();
        program.cycle();
        assert_eq!(program.pointer(), 2);
        assert_eq!(counter.get(), Value::Int(2));
        assert!(program.is_paused());
    }

    #[test]
    fn start_is_refused_while_running() {
        let (mut program, _) = counter_program(2);
        program.start().unwrap();
        let err = program.start().unwrap_err();
        assert_eq!(err.to_string(), "cannot start 'count' while running");
        assert!(program.is_running());
    }

    #[test]
    fn fault_holds_until_reset() {
        let no: Ds<bool> = Arc::new(ValueDataSource::new(false));
        let mut program: Program<Ctx> = Program::new("check", vec![Instruction::Evaluate(no)]);
        program.start().unwrap();
        program.cycle();
        assert!(program.in_error());
        assert!(program.fault().is_some());
        assert!(program.start().is_err());
        program.reset().unwrap();
        assert_eq!(program.status(), ProgramStatus::Loaded);
        assert!(program.fault().is_none());
    }

    #[test]
    fn stopped_program_restarts_from_the_top() {
        let (mut program, counter) = counter_program(3);
        program.start().unwrap();
        program.cycle();
        program.stop().unwrap();
        program.start().unwrap();
        assert_eq!(program.pointer(), 0);
        program.cycle();
        assert_eq!(counter.get(), Value::Int(1));
    }
}
