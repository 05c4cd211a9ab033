//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Scripted state machines.
//!
//! A machine owns named states, each with `entry`, `run` and `exit`
//! instruction lists and an ordered list of guarded transitions. Entering a
//! state runs its entry list, then its run list (only while `Running`).
//! Guards of the current state are checked once per cycle after the
//! instruction advance, in declaration order; the first that holds starts
//! the exit list, after which the target state is entered.

use std::fmt;

use indexmap::IndexMap;
use r_ctl_expr::Ds;
use tracing::{debug, warn};

use crate::error::{LifecycleError, LoadError};
use crate::instruction::{Effect, Instruction, Sequence, Step};

/// Phase hops allowed in one cycle, so exit -> entry -> run can chain
/// through empty lists without executing more than one instruction.
const PHASE_HOPS: usize = 3;

/// Lifecycle of a [`StateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineStatus {
    Loaded,
    Active,
    Running,
    Paused,
    Stopped,
    Error,
}

impl MachineStatus {
    pub fn name(&self) -> &'static str {
        match self {
            MachineStatus::Loaded => "loaded",
            MachineStatus::Active => "active",
            MachineStatus::Running => "running",
            MachineStatus::Paused => "paused",
            MachineStatus::Stopped => "stopped",
            MachineStatus::Error => "in error",
        }
    }

    /// Statuses in which a current named state is tracked.
    pub fn is_activated(&self) -> bool {
        matches!(
            self,
            MachineStatus::Active | MachineStatus::Running | MachineStatus::Paused
        )
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Uncompiled description of one named state.
pub struct StateDefinition<C> {
    pub name: String,
    pub entry: Vec<Instruction<C>>,
    pub run: Vec<Instruction<C>>,
    pub exit: Vec<Instruction<C>>,
    /// Guard and target state name, in priority order.
    pub transitions: Vec<(Ds<bool>, String)>,
}

impl<C> StateDefinition<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: Vec::new(),
            run: Vec::new(),
            exit: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn entry(mut self, instructions: Vec<Instruction<C>>) -> Self {
        self.entry = instructions;
        self
    }

    pub fn run(mut self, instructions: Vec<Instruction<C>>) -> Self {
        self.run = instructions;
        self
    }

    pub fn exit(mut self, instructions: Vec<Instruction<C>>) -> Self {
        self.exit = instructions;
        self
    }

    pub fn transition(mut self, guard: Ds<bool>, target: impl Into<String>) -> Self {
        self.transitions.push((guard, target.into()));
        self
    }
}

struct Transition {
    guard: Ds<bool>,
    target: usize,
}

struct State<C> {
    name: String,
    entry: Sequence<C>,
    run: Sequence<C>,
    exit: Sequence<C>,
    transitions: Vec<Transition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Entry,
    Run,
    Exit { target: usize },
}

pub struct StateMachine<C> {
    name: String,
    states: Vec<State<C>>,
    initial: usize,
    current: usize,
    phase: Phase,
    status: MachineStatus,
    fault: Option<String>,
}

impl<C: 'static> StateMachine<C> {
    /// Build a machine, resolving transition targets by name. Without an
    /// explicit `initial` state the first definition is used.
    pub fn new(
        name: impl Into<String>,
        definitions: Vec<StateDefinition<C>>,
        initial: Option<&str>,
    ) -> Result<Self, LoadError> {
        let name = name.into();
        if definitions.is_empty() {
            return Err(LoadError::NoStates { unit: name });
        }
        let mut index = IndexMap::with_capacity(definitions.len());
        for (position, definition) in definitions.iter().enumerate() {
            if index.insert(definition.name.clone(), position).is_some() {
                return Err(LoadError::DuplicateState {
                    unit: name,
                    state: definition.name.clone(),
                });
            }
        }
        let resolve = |state: &str| {
            index.get(state).copied().ok_or_else(|| LoadError::UnknownState {
                unit: name.clone(),
                state: state.to_string(),
            })
        };
        let initial = match initial {
            Some(state) => resolve(state)?,
            None => 0,
        };
        let mut states = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let transitions = definition
                .transitions
                .into_iter()
                .map(|(guard, target)| {
                    Ok(Transition {
                        guard,
                        target: resolve(&target)?,
                    })
                })
                .collect::<Result<Vec<_>, LoadError>>()?;
            states.push(State {
                name: definition.name,
                entry: Sequence::new(definition.entry),
                run: Sequence::new(definition.run),
                exit: Sequence::new(definition.exit),
                transitions,
            });
        }
        Ok(Self {
            name,
            states,
            initial,
            current: initial,
            phase: Phase::Entry,
            status: MachineStatus::Loaded,
            fault: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_activated()
    }

    pub fn is_running(&self) -> bool {
        self.status == MachineStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == MachineStatus::Paused
    }

    pub fn in_error(&self) -> bool {
        self.status == MachineStatus::Error
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|state| state.name.as_str())
    }

    pub fn initial_state(&self) -> &str {
        &self.states[self.initial].name
    }

    /// Current named state while activated.
    pub fn current_state(&self) -> Option<&str> {
        self.status
            .is_activated()
            .then(|| self.states[self.current].name.as_str())
    }

    /// In `state` with its exit list not yet started.
    pub fn in_state(&self, state: &str) -> bool {
        self.current_state() == Some(state) && !self.is_transitioning()
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.phase, Phase::Exit { .. })
    }

    /// Enter the initial state.
    pub fn activate(&mut self) -> Result<(), LifecycleError> {
        if self.status != MachineStatus::Loaded {
            return Err(self.refuse("activate"));
        }
        self.current = self.initial;
        self.phase = Phase::Entry;
        self.rewind_current();
        self.enter(MachineStatus::Active);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), LifecycleError> {
        match self.status {
            MachineStatus::Active | MachineStatus::Paused => {
                self.enter(MachineStatus::Running);
                Ok(())
            }
            _ => Err(self.refuse("start")),
        }
    }

    pub fn pause(&mut self) -> Result<(), LifecycleError> {
        if self.status != MachineStatus::Running {
            return Err(self.refuse("pause"));
        }
        self.enter(MachineStatus::Paused);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if !self.status.is_activated() {
            return Err(self.refuse("stop"));
        }
        self.abort_current();
        self.enter(MachineStatus::Stopped);
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<(), LifecycleError> {
        match self.status {
            MachineStatus::Active | MachineStatus::Stopped => {
                self.abort_current();
                self.enter(MachineStatus::Loaded);
                Ok(())
            }
            _ => Err(self.refuse("deactivate")),
        }
    }

    /// Back to `Loaded`; the only way out of `Error`.
    pub fn reset(&mut self) -> Result<(), LifecycleError> {
        match self.status {
            MachineStatus::Stopped | MachineStatus::Error => {
                self.abort_current();
                self.current = self.initial;
                self.phase = Phase::Entry;
                self.fault = None;
                self.enter(MachineStatus::Loaded);
                Ok(())
            }
            _ => Err(self.refuse("reset")),
        }
    }

    /// Start a transition to `target` if a guard leading there holds now.
    ///
    /// Requesting the current state succeeds without a transition. Only one
    /// hop is considered and the current state must not be entering or
    /// leaving.
    pub fn request_state(&mut self, target: &str) -> Result<(), LifecycleError> {
        if !matches!(self.status, MachineStatus::Active | MachineStatus::Running) {
            return Err(self.refuse("request a state of"));
        }
        let Some(target_index) = self.states.iter().position(|state| state.name == target)
        else {
            return Err(LifecycleError::UnknownState {
                machine: self.name.clone(),
                state: target.to_string(),
            });
        };
        if target_index == self.current && self.phase == Phase::Run {
            return Ok(());
        }
        let from = self.states[self.current].name.clone();
        let reachable = self.phase == Phase::Run
            && self.states[self.current]
                .transitions
                .iter()
                .filter(|transition| transition.target == target_index)
                .any(|transition| {
                    transition.guard.invalidate();
                    matches!(transition.guard.evaluate(), Ok(true))
                });
        if !reachable {
            return Err(LifecycleError::NoTransition {
                machine: self.name.clone(),
                from,
                target: target.to_string(),
            });
        }
        self.begin_transition(target_index);
        Ok(())
    }

    /// Advance the current phase by at most one instruction, then check
    /// guards.
    pub(crate) fn cycle(&mut self) -> Option<Effect<C>> {
        if !matches!(self.status, MachineStatus::Active | MachineStatus::Running) {
            return None;
        }
        let effect = match self.advance() {
            Ok(effect) => effect,
            Err(reason) => {
                self.fail(reason);
                return None;
            }
        };
        if self.phase == Phase::Run {
            if let Err(reason) = self.check_guards() {
                self.fail(reason);
                return None;
            }
        }
        effect
    }

    pub(crate) fn fail(&mut self, reason: String) {
        let state = self.states[self.current].name.as_str();
        warn!(machine = %self.name, %state, %reason, "state machine fault");
        self.abort_current();
        self.fault = Some(reason);
        self.status = MachineStatus::Error;
    }

    fn advance(&mut self) -> Result<Option<Effect<C>>, String> {
        let running = self.status == MachineStatus::Running;
        for _ in 0..PHASE_HOPS {
            let state = &mut self.states[self.current];
            let sequence = match self.phase {
                Phase::Entry => &mut state.entry,
                Phase::Run if running => &mut state.run,
                Phase::Run => return Ok(None),
                Phase::Exit { .. } => &mut state.exit,
            };
            match sequence.step() {
                Step::Blocked => return Ok(None),
                Step::Fault(reason) => return Err(reason),
                Step::Finished => {
                    if !self.finish_phase() {
                        return Ok(None);
                    }
                }
                Step::Executed => {
                    if sequence.is_finished() {
                        self.finish_phase();
                    }
                    return Ok(None);
                }
                Step::Effect(effect) => return Ok(Some(effect)),
            }
        }
        Ok(None)
    }

    /// Move past a completed phase. Returns whether another phase follows.
    fn finish_phase(&mut self) -> bool {
        match self.phase {
            Phase::Entry => {
                self.phase = Phase::Run;
                true
            }
            Phase::Run => false,
            Phase::Exit { target } => {
                debug!(
                    machine = %self.name,
                    from = %self.states[self.current].name,
                    to = %self.states[target].name,
                    "state transition"
                );
                self.current = target;
                self.phase = Phase::Entry;
                self.rewind_current();
                true
            }
        }
    }

    fn check_guards(&mut self) -> Result<(), String> {
        let state = &self.states[self.current];
        let mut target = None;
        for transition in &state.transitions {
            transition.guard.invalidate();
            match transition.guard.evaluate() {
                Ok(true) => {
                    target = Some(transition.target);
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    return Err(format!("guard of state '{}' failed: {err}", state.name));
                }
            }
        }
        if let Some(target) = target {
            self.begin_transition(target);
        }
        Ok(())
    }

    fn begin_transition(&mut self, target: usize) {
        let state = &mut self.states[self.current];
        state.run.abort();
        state.entry.abort();
        state.exit.rewind();
        self.phase = Phase::Exit { target };
    }

    fn rewind_current(&mut self) {
        let state = &mut self.states[self.current];
        state.entry.rewind();
        state.run.rewind();
        state.exit.rewind();
    }

    fn abort_current(&mut self) {
        let state = &mut self.states[self.current];
        state.entry.abort();
        state.run.abort();
        state.exit.abort();
    }

    fn enter(&mut self, status: MachineStatus) {
        if self.status != status {
            debug!(machine = %self.name, from = %self.status, to = %status, "state machine status change");
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

impl<C> fmt::Debug for StateMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("current", &self.states.get(self.current).map(|s| &s.name))
            .field("phase", &self.phase)
            .field("fault", &self.fault)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use r_ctl_expr::{AnyDataSource, AnyVariable, Value, ValueDataSource};

    use super::*;

    struct Ctx;

    fn flag(value: bool) -> (Arc<ValueDataSource<bool>>, Ds<bool>) {
        let source = Arc::new(ValueDataSource::new(value));
        (source.clone(), source as Ds<bool>)
    }

    fn log(into: &AnyVariable, text: &str) -> Instruction<Ctx> {
        Instruction::Assign {
            variable: into.clone(),
            value: AnyDataSource::constant(Value::from(text)),
        }
    }

    struct Shuttle {
        machine: StateMachine<Ctx>,
        go: Arc<ValueDataSource<bool>>,
        arrived: Arc<ValueDataSource<bool>>,
        trace: AnyVariable,
    }

    /// idle -(go)-> moving -(arrived)-> idle
    fn shuttle() -> Shuttle {
        let (go, go_guard) = flag(false);
        let (arrived, arrived_guard) = flag(false);
        let trace = AnyVariable::new(Value::from(""));
        let machine = StateMachine::new(
            "shuttle",
            vec![
                StateDefinition::new("idle")
                    .entry(vec![log(&trace, "idle entered")])
                    .transition(go_guard, "moving"),
                StateDefinition::new("moving")
                    .entry(vec![log(&trace, "moving entered")])
                    .exit(vec![log(&trace, "moving left")])
                    .transition(arrived_guard, "idle"),
            ],
            None,
        )
        .unwrap();
        Shuttle {
            machine,
            go,
            arrived,
            trace,
        }
    }

    #[test]
    fn activation_enters_the_initial_state() {
        let Shuttle {
            mut machine, trace, ..
        } = shuttle();
        assert_eq!(machine.current_state(), None);
        machine.activate().unwrap();
        assert_eq!(machine.current_state(), Some("idle"));
        machine.cycle();
        assert_eq!(trace.get(), Value::from("idle entered"));
    }

    #[test]
    fn satisfied_guard_runs_exit_before_the_next_entry() {
        let Shuttle {
            mut machine,
            go,
            arrived,
            trace,
        } = shuttle();
        machine.activate().unwrap();
        machine.start().unwrap();
        machine.cycle();
        go.set(true);
        machine.cycle();
        assert!(machine.is_transitioning());
        machine.cycle();
        assert_eq!(machine.current_state(), Some("moving"));
        assert_eq!(trace.get(), Value::from("moving entered"));

        arrived.set(true);
        machine.cycle();
        assert!(machine.is_transitioning());
        go.set(false);
        machine.cycle();
        assert_eq!(machine.current_state(), Some("idle"));
        assert_eq!(trace.get(), Value::from("moving left"));
    }

    #[test]
    fn first_satisfied_guard_in_declaration_order_wins() {
        let (_, first) = flag(true);
        let (_, second) = flag(true);
        let mut machine: StateMachine<Ctx> = StateMachine::new(
            "fork",
            vec![
                StateDefinition::new("start")
                    .transition(first, "left")
                    .transition(second, "right"),
                StateDefinition::new("left"),
                StateDefinition::new("right"),
            ],
            None,
        )
        .unwrap();
        machine.activate().unwrap();
        machine.cycle();
        machine.cycle();
        assert!(machine.in_state("left"));
    }

    #[test]
    fn request_state_needs_a_satisfied_guard() {
        let Shuttle {
            mut machine, go, ..
        } = shuttle();
        machine.activate().unwrap();
        machine.cycle();
        assert!(matches!(
            machine.request_state("moving"),
            Err(LifecycleError::NoTransition { .. })
        ));
        assert!(machine.in_state("idle"));

        go.set(true);
        machine.request_state("moving").unwrap();
        machine.cycle();
        assert!(machine.in_state("moving"));
    }

    #[test]
    fn request_for_the_current_state_is_trivially_met() {
        let Shuttle { mut machine, .. } = shuttle();
        machine.activate().unwrap();
        machine.cycle();
        machine.request_state("idle").unwrap();
        assert!(machine.in_state("idle"));
        assert!(matches!(
            machine.request_state("nowhere"),
            Err(LifecycleError::UnknownState { .. })
        ));
    }

    #[test]
    fn failing_guard_faults_the_machine() {
        let failing: Ds<bool> = Arc::new(r_ctl_expr::SampledDataSource::<bool>::new(|| {
            Err(r_ctl_expr::EvalError::Unavailable("sensor".into()))
        }));
        let mut machine: StateMachine<Ctx> = StateMachine::new(
            "guarded",
            vec![
                StateDefinition::new("a").transition(failing, "b"),
                StateDefinition::new("b"),
            ],
            None,
        )
        .unwrap();
        machine.activate().unwrap();
        machine.cycle();
        assert!(machine.in_error());
        assert!(machine.start().is_err());
        assert_eq!(machine.current_state(), None);
        machine.reset().unwrap();
        assert_eq!(machine.status(), MachineStatus::Loaded);
    }

    #[test]
    fn lifecycle_preconditions_are_enforced() {
        let Shuttle { mut machine, .. } = shuttle();
        assert!(machine.start().is_err());
        machine.activate().unwrap();
        assert!(machine.activate().is_err());
        machine.start().unwrap();
        assert!(machine.deactivate().is_err());
        machine.stop().unwrap();
        machine.deactivate().unwrap();
        assert_eq!(machine.status(), MachineStatus::Loaded);
    }

    #[test]
    fn unknown_targets_are_load_errors() {
        let (_, always) = flag(true);
        let result: Result<StateMachine<Ctx>, _> = StateMachine::new(
            "broken",
            vec![StateDefinition::new("a").transition(always, "missing")],
            None,
        );
        assert!(matches!(result, Err(LoadError::UnknownState { .. })));
        let result: Result<StateMachine<Ctx>, _> = StateMachine::new(
            "twice",
            vec![StateDefinition::new("a"), StateDefinition::new("a")],
            None,
        );
        assert!(matches!(result, Err(LoadError::DuplicateState { .. })));
    }
}
