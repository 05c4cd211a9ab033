//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! The execution engine and its external handle.
//!
//! One call to [`ExecutionEngine::step`] is one cycle:
//!
//! 1. queued external requests are served: methods run and reply, commands
//!    are dispatched and join the pending list;
//! 2. every pending command's completion condition is evaluated once;
//! 3. every program advances by at most one instruction, in load order;
//! 4. every state machine advances by at most one instruction and then
//!    checks the guards of its current state.
//!
//! Commands dispatched by instructions in steps 3 and 4 are first polled in
//! the next cycle. A unit that faults is put in its error state; the cycle
//! carries on with the other units.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard};
use r_ctl_expr::{ExpressionComposer, Scope, Value};
use r_ctl_registry::NameServer;
use r_ctl_rt::PeriodicActivity;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::command::{Command, CommandHandle, PendingCommands};
use crate::context::ExecutionContext;
use crate::control::{engine_interface, ENGINE_OBJECT};
use crate::error::{InvocationError, LifecycleError, LoadError};
use crate::instruction::Effect;
use crate::interface::{CommandSpec, MethodSpec, OperationInterface};
use crate::metrics::EngineMetrics;
use crate::program::Program;
use crate::script::{ScriptCompiler, ScriptDocument};
use crate::state_machine::StateMachine;

type Ctx<S> = ExecutionContext<S>;

/// Objects reachable by name from scripts and external callers.
pub type ObjectRegistry<S> = NameServer<Arc<OperationInterface<ExecutionContext<S>>>>;

/// Tunables of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub name: String,
    /// Bound of the external request queue and of the pending command list.
    pub max_pending_commands: usize,
    /// Timeout applied to commands that declare none.
    pub command_timeout_cycles: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: "engine".to_owned(),
            max_pending_commands: 64,
            command_timeout_cycles: None,
        }
    }
}

/// Counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub requests: usize,
    pub commands_done: usize,
    pub commands_failed: usize,
    /// Units that entered their error state during this cycle.
    pub faults: usize,
}

enum Request<S> {
    Command(Command<Ctx<S>>),
    Method {
        spec: Arc<MethodSpec<Ctx<S>>>,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Value, InvocationError>>,
    },
}

/// Drives programs, state machines and commands of one component.
pub struct ExecutionEngine<S> {
    settings: EngineSettings,
    context: ExecutionContext<S>,
    objects: Arc<RwLock<ObjectRegistry<S>>>,
    pending: PendingCommands<Ctx<S>>,
    requests: mpsc::Receiver<Request<S>>,
    sender: mpsc::Sender<Request<S>>,
    metrics: Option<EngineMetrics>,
}

impl<S: Send + 'static> ExecutionEngine<S> {
    pub fn new(component: S, settings: EngineSettings) -> Self {
        let capacity = settings.max_pending_commands.max(1);
        let (sender, requests) = mpsc::channel(capacity);
        let mut objects = NameServer::new();
        objects.register_object(Arc::new(engine_interface::<S>()), ENGINE_OBJECT);
        info!(engine = %settings.name, max_pending_commands = capacity, "execution engine created");
        Self {
            context: ExecutionContext::new(component),
            objects: Arc::new(RwLock::new(objects)),
            pending: PendingCommands::new(capacity),
            requests,
            sender,
            metrics: None,
            settings,
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn handle(&self) -> EngineHandle<S> {
        EngineHandle {
            engine: Arc::from(self.settings.name.as_str()),
            objects: self.objects.clone(),
            requests: self.sender.clone(),
        }
    }

    pub fn context(&self) -> &Ctx<S> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Ctx<S> {
        &mut self.context
    }

    pub fn component(&self) -> &S {
        &self.context.component
    }

    pub fn component_mut(&mut self) -> &mut S {
        &mut self.context.component
    }

    pub fn cycle(&self) -> u64 {
        self.context.cycle
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Expose an object to scripts and callers. The first object registered
    /// under a name wins.
    pub fn add_object(&self, object: OperationInterface<Ctx<S>>) -> bool {
        let name = object.name().to_string();
        let added = self.objects.write().register_object(Arc::new(object), name.clone());
        if added {
            debug!(engine = %self.settings.name, object = %name, "object registered");
        }
        added
    }

    /// Scripts already compiled against the object keep their references.
    pub fn remove_object(&self, name: &str) -> bool {
        self.objects.write().unregister_name(name).is_some()
    }

    pub fn object(&self, name: &str) -> Option<Arc<OperationInterface<Ctx<S>>>> {
        self.objects.read().get_object(name).cloned()
    }

    pub fn objects(&self) -> RwLockReadGuard<'_, ObjectRegistry<S>> {
        self.objects.read()
    }

    pub fn load_program(&mut self, program: Program<Ctx<S>>) -> Result<(), LifecycleError> {
        if self.context.has_unit(program.name()) {
            return Err(LifecycleError::AlreadyLoaded(program.name().to_string()));
        }
        info!(engine = %self.settings.name, program = %program.name(), instructions = program.len(), "program loaded");
        self.context
            .programs
            .insert(program.name().to_string(), program);
        Ok(())
    }

    /// Remove a program that is neither running nor paused.
    pub fn unload_program(&mut self, name: &str) -> Result<Program<Ctx<S>>, LifecycleError> {
        let program = self
            .context
            .programs
            .get(name)
            .ok_or_else(|| LifecycleError::UnknownProgram(name.to_string()))?;
        if program.is_running() || program.is_paused() {
            return Err(LifecycleError::InvalidTransition {
                unit: name.to_string(),
                action: "unload",
                state: program.status().name(),
            });
        }
        let program = self
            .context
            .programs
            .shift_remove(name)
            .ok_or_else(|| LifecycleError::UnknownProgram(name.to_string()))?;
        info!(engine = %self.settings.name, program = %name, "program unloaded");
        Ok(program)
    }

    pub fn load_state_machine(
        &mut self,
        machine: StateMachine<Ctx<S>>,
    ) -> Result<(), LifecycleError> {
        if self.context.has_unit(machine.name()) {
            return Err(LifecycleError::AlreadyLoaded(machine.name().to_string()));
        }
        info!(engine = %self.settings.name, machine = %machine.name(), initial = %machine.initial_state(), "state machine loaded");
        self.context
            .machines
            .insert(machine.name().to_string(), machine);
        Ok(())
    }

    /// Remove a state machine that is not activated.
    pub fn unload_state_machine(
        &mut self,
        name: &str,
    ) -> Result<StateMachine<Ctx<S>>, LifecycleError> {
        let machine = self
            .context
            .machines
            .get(name)
            .ok_or_else(|| LifecycleError::UnknownStateMachine(name.to_string()))?;
        if machine.is_active() {
            return Err(LifecycleError::InvalidTransition {
                unit: name.to_string(),
                action: "unload",
                state: machine.status().name(),
            });
        }
        let machine = self
            .context
            .machines
            .shift_remove(name)
            .ok_or_else(|| LifecycleError::UnknownStateMachine(name.to_string()))?;
        info!(engine = %self.settings.name, machine = %name, "state machine unloaded");
        Ok(machine)
    }

    /// Compile every unit of `document` and load them. Nothing is loaded
    /// when any unit fails to compile or clashes with a loaded name.
    pub fn load_script(
        &mut self,
        document: &ScriptDocument,
        composer: &ExpressionComposer,
        globals: &Scope,
    ) -> Result<Vec<String>, LoadError> {
        let (programs, machines) = {
            let objects = self.objects.read();
            let compiler = ScriptCompiler::new(composer, &objects, globals);
            compiler.compile(document)?
        };
        for name in programs
            .iter()
            .map(Program::name)
            .chain(machines.iter().map(StateMachine::name))
        {
            if self.context.has_unit(name) {
                return Err(LifecycleError::AlreadyLoaded(name.to_string()).into());
            }
        }
        let mut loaded = Vec::with_capacity(programs.len() + machines.len());
        for program in programs {
            loaded.push(program.name().to_string());
            self.load_program(program)?;
        }
        for machine in machines {
            loaded.push(machine.name().to_string());
            self.load_state_machine(machine)?;
        }
        Ok(loaded)
    }

    /// Call a method on the owning thread, outside of the request queue.
    pub fn call_method(
        &mut self,
        object: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Value, InvocationError> {
        let spec = method_spec(&self.objects.read(), object, method)?;
        spec.call(&mut self.context, args)
    }

    /// Dispatch a command right away on the owning thread. Its completion
    /// is first evaluated in the next cycle.
    pub fn dispatch_command(
        &mut self,
        object: &str,
        command: &str,
        args: Vec<Value>,
    ) -> Result<CommandHandle, InvocationError> {
        let spec = command_spec(&self.objects.read(), object, command)?;
        let command = spec.instantiate(args)?;
        if !self.pending.has_room() {
            return Err(InvocationError::QueueFull);
        }
        let handle = command.handle();
        // A rejection is reported through the handle.
        let _ = self.start_command(command);
        Ok(handle)
    }

    /// Run one cycle.
    pub fn step(&mut self) -> CycleReport {
        let started = Instant::now();
        self.context.cycle += 1;
        let mut report = CycleReport {
            cycle: self.context.cycle,
            ..CycleReport::default()
        };

        report.requests = self.serve_requests();

        let polled = self.pending.poll_all(&self.context);
        report.commands_done = polled.done;
        report.commands_failed = polled.failed;

        report.faults += self.cycle_programs();
        report.faults += self.cycle_machines();

        if let Some(metrics) = &self.metrics {
            metrics.record_commands(polled.done, polled.failed);
            metrics.observe_cycle(started.elapsed().as_secs_f64(), self.pending.len());
        }
        trace!(engine = %self.settings.name, ?report, "cycle complete");
        report
    }

    fn serve_requests(&mut self) -> usize {
        let mut served = 0;
        while served < self.pending.capacity() {
            let Ok(request) = self.requests.try_recv() else {
                break;
            };
            served += 1;
            match request {
                Request::Command(command) => {
                    if let Err(reason) = self.start_command(command) {
                        debug!(engine = %self.settings.name, %reason, "external command not started");
                    }
                }
                Request::Method { spec, args, reply } => {
                    let result = spec
                        .invoke(&mut self.context, &args)
                        .map_err(InvocationError::from);
                    let _ = reply.send(result);
                }
            }
        }
        served
    }

    fn start_command(&mut self, mut command: Command<Ctx<S>>) -> Result<(), String> {
        if command.timeout().is_none() {
            if let Some(cycles) = self.settings.command_timeout_cycles {
                command = command.with_timeout(cycles);
            }
        }
        if !self.pending.has_room() {
            let reason = format!(
                "pending command list is full ({} commands)",
                self.pending.capacity()
            );
            command.reject(reason.clone());
            return Err(reason);
        }
        if !command.dispatch(&mut self.context) {
            return Err(format!("command '{}' was rejected", command.name()));
        }
        if let Err(mut command) = self.pending.push(command) {
            command.reject("pending command list is full");
        }
        Ok(())
    }

    fn apply(&mut self, effect: Effect<Ctx<S>>) -> Result<(), String> {
        match effect {
            Effect::Dispatch(command) => self.start_command(command),
            Effect::Call { spec, args, into } => {
                let value = spec
                    .invoke(&mut self.context, &args)
                    .map_err(|err| format!("method '{}' failed: {err}", spec.name()))?;
                match into {
                    Some(variable) => variable.set(value).map_err(|found| {
                        format!(
                            "cannot store {found} returned by '{}' in a {} variable",
                            spec.name(),
                            variable.tag()
                        )
                    }),
                    None => Ok(()),
                }
            }
        }
    }

    fn cycle_programs(&mut self) -> usize {
        let mut faults = 0;
        for index in 0..self.context.programs.len() {
            let Some((_, program)) = self.context.programs.get_index_mut(index) else {
                break;
            };
            let was_error = program.in_error();
            let effect = program.cycle();
            if let Some(effect) = effect {
                if let Err(reason) = self.apply(effect) {
                    if let Some((_, program)) = self.context.programs.get_index_mut(index) {
                        program.fail(reason);
                    }
                }
            }
            let faulted = self
                .context
                .programs
                .get_index(index)
                .is_some_and(|(_, program)| program.in_error());
            if faulted && !was_error {
                faults += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_fault("program");
                }
            }
        }
        faults
    }

    fn cycle_machines(&mut self) -> usize {
        let mut faults = 0;
        for index in 0..self.context.machines.len() {
            let Some((_, machine)) = self.context.machines.get_index_mut(index) else {
                break;
            };
            let was_error = machine.in_error();
            let effect = machine.cycle();
            if let Some(effect) = effect {
                if let Err(reason) = self.apply(effect) {
                    if let Some((_, machine)) = self.context.machines.get_index_mut(index) {
                        machine.fail(reason);
                    }
                }
            }
            let faulted = self
                .context
                .machines
                .get_index(index)
                .is_some_and(|(_, machine)| machine.in_error());
            if faulted && !was_error {
                faults += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_fault("state_machine");
                }
            }
        }
        faults
    }
}

impl<S: Send + 'static> PeriodicActivity for ExecutionEngine<S> {
    fn cycle(&mut self) {
        self.step();
    }

    fn name(&self) -> &str {
        &self.settings.name
    }
}

impl<S> fmt::Debug for ExecutionEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("settings", &self.settings)
            .field("cycle", &self.context.cycle)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

fn object<S>(
    registry: &ObjectRegistry<S>,
    name: &str,
) -> Result<Arc<OperationInterface<Ctx<S>>>, InvocationError> {
    registry
        .get_object(name)
        .cloned()
        .ok_or_else(|| InvocationError::UnknownObject(name.to_string()))
}

fn command_spec<S: 'static>(
    registry: &ObjectRegistry<S>,
    object_name: &str,
    command: &str,
) -> Result<Arc<CommandSpec<Ctx<S>>>, InvocationError> {
    object(registry, object_name)?
        .require_command(command)
        .cloned()
}

fn method_spec<S: 'static>(
    registry: &ObjectRegistry<S>,
    object_name: &str,
    method: &str,
) -> Result<Arc<MethodSpec<Ctx<S>>>, InvocationError> {
    object(registry, object_name)?
        .require_method(method)
        .cloned()
}

/// Cloneable caller-side access to an engine from other tasks or threads.
///
/// Arguments are checked before anything is queued. Commands are dispatched
/// at the start of the engine's next cycle; methods run there too and their
/// result is sent back.
pub struct EngineHandle<S> {
    engine: Arc<str>,
    objects: Arc<RwLock<ObjectRegistry<S>>>,
    requests: mpsc::Sender<Request<S>>,
}

impl<S> Clone for EngineHandle<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            objects: self.objects.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl<S> fmt::Debug for EngineHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<S: Send + 'static> EngineHandle<S> {
    pub fn engine_name(&self) -> &str {
        &self.engine
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects.read().is_name_registered(name)
    }

    /// Whether the engine has been dropped.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Queue a command. Never waits; a full queue is reported as
    /// [`InvocationError::QueueFull`].
    pub fn command(
        &self,
        object: &str,
        command: &str,
        args: Vec<Value>,
    ) -> Result<CommandHandle, InvocationError> {
        let spec = command_spec(&self.objects.read(), object, command)?;
        let command = spec.instantiate(args)?;
        let handle = command.handle();
        self.requests
            .try_send(Request::Command(command))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => InvocationError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => InvocationError::EngineStopped,
            })?;
        Ok(handle)
    }

    /// Call a method in the engine's next cycle and wait for the result.
    pub async fn call(
        &self,
        object: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        let (request, response) = self.method_request(object, method, args)?;
        self.requests
            .send(request)
            .await
            .map_err(|_| InvocationError::EngineStopped)?;
        response.await.map_err(|_| InvocationError::EngineStopped)?
    }

    /// Blocking variant of [`EngineHandle::call`] for plain threads. Must not
    /// be used from within an async runtime.
    pub fn call_blocking(
        &self,
        object: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        let (request, response) = self.method_request(object, method, args)?;
        self.requests
            .blocking_send(request)
            .map_err(|_| InvocationError::EngineStopped)?;
        response
            .blocking_recv()
            .map_err(|_| InvocationError::EngineStopped)?
    }

    fn method_request(
        &self,
        object: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<
        (
            Request<S>,
            oneshot::Receiver<Result<Value, InvocationError>>,
        ),
        InvocationError,
    > {
        let spec = method_spec(&self.objects.read(), object, method)?;
        spec.check(args.iter().map(Value::tag))?;
        let (reply, response) = oneshot::channel();
        Ok((Request::Method { spec, args, reply }, response))
    }
}
