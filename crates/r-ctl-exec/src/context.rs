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

use indexmap::IndexMap;

use crate::program::Program;
use crate::state_machine::StateMachine;

/// Everything commands and methods may touch: the component state `S` and
/// the loaded units. Only the engine's cycle holds it mutably.
pub struct ExecutionContext<S> {
    pub component: S,
    pub(crate) programs: IndexMap<String, Program<ExecutionContext<S>>>,
    pub(crate) machines: IndexMap<String, StateMachine<ExecutionContext<S>>>,
    pub(crate) cycle: u64,
}

impl<S: 'static> ExecutionContext<S> {
    pub fn new(component: S) -> Self {
        Self {
            component,
            programs: IndexMap::new(),
            machines: IndexMap::new(),
            cycle: 0,
        }
    }

    /// Number of completed or running cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn component(&self) -> &S {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut S {
        &mut self.component
    }

    pub fn program(&self, name: &str) -> Option<&Program<Self>> {
        self.programs.get(name)
    }

    pub fn program_mut(&mut self, name: &str) -> Option<&mut Program<Self>> {
        self.programs.get_mut(name)
    }

    pub fn programs(&self) -> impl Iterator<Item = &Program<Self>> {
        self.programs.values()
    }

    pub fn state_machine(&self, name: &str) -> Option<&StateMachine<Self>> {
        self.machines.get(name)
    }

    pub fn state_machine_mut(&mut self, name: &str) -> Option<&mut StateMachine<Self>> {
        self.machines.get_mut(name)
    }

    pub fn state_machines(&self) -> impl Iterator<Item = &StateMachine<Self>> {
        self.machines.values()
    }

    /// Whether a program or state machine already uses `name`.
    pub fn has_unit(&self, name: &str) -> bool {
        self.programs.contains_key(name) || self.machines.contains_key(name)
    }
}

impl<S: fmt::Debug> fmt::Debug for ExecutionContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("component", &self.component)
            .field("programs", &self.programs.keys().collect::<Vec<_>>())
            .field("machines", &self.machines.keys().collect::<Vec<_>>())
            .field("cycle", &self.cycle)
            .finish()
    }
}
