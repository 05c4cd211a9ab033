//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! The `engine` object: queries and lifecycle commands for every loaded
//! program and state machine, addressed by unit name.
//!
//! Lifecycle commands are accepted only when the unit's precondition holds;
//! a rejected command finishes as failed and changes nothing. Accepted
//! commands complete on their first poll, except `requestStateMachineState`
//! which completes once the machine sits in the requested state.

use r_ctl_expr::{TypeTag, Value};
use tracing::debug;

use crate::command::Completion;
use crate::context::ExecutionContext;
use crate::error::{LifecycleError, MethodError};
use crate::interface::{CommandSpec, MethodSpec, OperationInterface};
use crate::program::Program;
use crate::state_machine::StateMachine;

/// Name under which the control surface is registered.
pub const ENGINE_OBJECT: &str = "engine";

type Ctx<S> = ExecutionContext<S>;
type ProgramAction<S> = fn(&mut Program<Ctx<S>>) -> Result<(), LifecycleError>;
type MachineAction<S> = fn(&mut StateMachine<Ctx<S>>) -> Result<(), LifecycleError>;

/// Build the control surface for an engine over component state `S`.
pub fn engine_interface<S: Send + 'static>() -> OperationInterface<Ctx<S>> {
    let mut object = OperationInterface::new(
        ENGINE_OBJECT,
        "Lifecycle control of the programs and state machines of this engine",
    );

    object.add_method(
        MethodSpec::new(
            "hasProgram",
            "Is a program with this name loaded",
            TypeTag::Bool,
            |ctx: &mut Ctx<S>, args: &[Value]| {
                Ok(Value::Bool(ctx.program(unit_name(args)).is_some()))
            },
        )
        .arg("name", "program name", TypeTag::String),
    );
    object.add_method(program_query("isProgramRunning", "Is the program running", |p| {
        p.is_running()
    }));
    object.add_method(program_query("isProgramPaused", "Is the program paused", |p| {
        p.is_paused()
    }));
    object.add_method(program_query("inProgramError", "Is the program in error", |p| {
        p.in_error()
    }));
    object.add_method(
        MethodSpec::new(
            "getProgramStatus",
            "Lifecycle status of the program",
            TypeTag::String,
            |ctx: &mut Ctx<S>, args: &[Value]| {
                let program = find_program(ctx, args)?;
                Ok(Value::from(program.status().name()))
            },
        )
        .arg("name", "program name", TypeTag::String),
    );
    object.add_method(
        MethodSpec::new(
            "getProgramLine",
            "Index of the next instruction of the program",
            TypeTag::UInt,
            |ctx: &mut Ctx<S>, args: &[Value]| {
                let program = find_program(ctx, args)?;
                Ok(Value::UInt(program.pointer() as u64))
            },
        )
        .arg("name", "program name", TypeTag::String),
    );

    object.add_method(
        MethodSpec::new(
            "hasStateMachine",
            "Is a state machine with this name loaded",
            TypeTag::Bool,
            |ctx: &mut Ctx<S>, args: &[Value]| {
                Ok(Value::Bool(ctx.state_machine(unit_name(args)).is_some()))
            },
        )
        .arg("name", "state machine name", TypeTag::String),
    );
    object.add_method(machine_query(
        "isStateMachineActive",
        "Is the state machine activated",
        |m| m.is_active(),
    ));
    object.add_method(machine_query(
        "isStateMachineRunning",
        "Is the state machine running",
        |m| m.is_running(),
    ));
    object.add_method(machine_query(
        "isStateMachinePaused",
        "Is the state machine paused",
        |m| m.is_paused(),
    ));
    object.add_method(machine_query(
        "inStateMachineError",
        "Is the state machine in error",
        |m| m.in_error(),
    ));
    object.add_method(
        MethodSpec::new(
            "inStateMachineState",
            "Is the state machine in the given state",
            TypeTag::Bool,
            |ctx: &mut Ctx<S>, args: &[Value]| {
                let machine = find_machine(ctx, args)?;
                let state = args.get(1).and_then(Value::as_str).unwrap_or_default();
                Ok(Value::Bool(machine.in_state(state)))
            },
        )
        .arg("name", "state machine name", TypeTag::String)
        .arg("state", "state name", TypeTag::String),
    );
    object.add_method(
        MethodSpec::new(
            "getStateMachineState",
            "Current state of the state machine, empty when not activated",
            TypeTag::String,
            |ctx: &mut Ctx<S>, args: &[Value]| {
                let machine = find_machine(ctx, args)?;
                Ok(Value::from(machine.current_state().unwrap_or_default()))
            },
        )
        .arg("name", "state machine name", TypeTag::String),
    );

    object.add_command(program_command("startProgram", "Start or resume a program", Program::start));
    object.add_command(program_command("stopProgram", "Stop a running or paused program", Program::stop));
    object.add_command(program_command("pauseProgram", "Pause a running program", Program::pause));
    object.add_command(program_command(
        "stepProgram",
        "Execute one instruction of a paused program",
        Program::step,
    ));
    object.add_command(program_command(
        "resetProgram",
        "Return a program that is not running to its loaded state",
        Program::reset,
    ));

    object.add_command(machine_command(
        "activateStateMachine",
        "Activate a loaded state machine in its initial state",
        StateMachine::activate,
    ));
    object.add_command(machine_command(
        "deactivateStateMachine",
        "Deactivate an active or stopped state machine",
        StateMachine::deactivate,
    ));
    object.add_command(machine_command(
        "startStateMachine",
        "Run an active or paused state machine",
        StateMachine::start,
    ));
    object.add_command(machine_command(
        "pauseStateMachine",
        "Pause a running state machine",
        StateMachine::pause,
    ));
    object.add_command(machine_command(
        "stopStateMachine",
        "Stop an activated state machine",
        StateMachine::stop,
    ));
    object.add_command(machine_command(
        "resetStateMachine",
        "Return a stopped or faulted state machine to its loaded state",
        StateMachine::reset,
    ));
    object.add_command(
        CommandSpec::new(
            "requestStateMachineState",
            "Transition to a state reachable through a satisfied guard",
            |ctx: &mut Ctx<S>, args: &[Value]| {
                let unit = unit_name(args);
                let state = args.get(1).and_then(Value::as_str).unwrap_or_default();
                let result = match ctx.state_machine_mut(unit) {
                    Some(machine) => machine.request_state(state),
                    None => Err(LifecycleError::UnknownStateMachine(unit.to_string())),
                };
                accepted("requestStateMachineState", result)
            },
            |ctx: &Ctx<S>, args: &[Value]| {
                let unit = unit_name(args);
                let state = args.get(1).and_then(Value::as_str).unwrap_or_default();
                match ctx.state_machine(unit) {
                    None => Completion::Failed(format!("state machine '{unit}' was unloaded")),
                    Some(machine) if machine.in_error() => {
                        Completion::Failed(format!("state machine '{unit}' is in error"))
                    }
                    Some(machine) if machine.in_state(state) => Completion::Done,
                    Some(machine) if !machine.is_active() => {
                        Completion::Failed(format!("state machine '{unit}' is no longer active"))
                    }
                    Some(_) => Completion::Pending,
                }
            },
        )
        .arg("name", "state machine name", TypeTag::String)
        .arg("state", "target state name", TypeTag::String),
    );

    object
}

fn unit_name(args: &[Value]) -> &str {
    args.first().and_then(Value::as_str).unwrap_or_default()
}

fn find_program<'a, S: 'static>(
    ctx: &'a Ctx<S>,
    args: &[Value],
) -> Result<&'a Program<Ctx<S>>, MethodError> {
    let unit = unit_name(args);
    ctx.program(unit)
        .ok_or_else(|| LifecycleError::UnknownProgram(unit.to_string()).into())
}

fn find_machine<'a, S: 'static>(
    ctx: &'a Ctx<S>,
    args: &[Value],
) -> Result<&'a StateMachine<Ctx<S>>, MethodError> {
    let unit = unit_name(args);
    ctx.state_machine(unit)
        .ok_or_else(|| LifecycleError::UnknownStateMachine(unit.to_string()).into())
}

fn accepted(command: &str, result: Result<(), LifecycleError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            debug!(command, %err, "control command rejected");
            false
        }
    }
}

fn program_query<S: Send + 'static>(
    name: &'static str,
    description: &'static str,
    query: fn(&Program<Ctx<S>>) -> bool,
) -> MethodSpec<Ctx<S>> {
    MethodSpec::new(
        name,
        description,
        TypeTag::Bool,
        move |ctx: &mut Ctx<S>, args: &[Value]| Ok(Value::Bool(query(find_program(ctx, args)?))),
    )
    .arg("name", "program name", TypeTag::String)
}

fn machine_query<S: Send + 'static>(
    name: &'static str,
    description: &'static str,
    query: fn(&StateMachine<Ctx<S>>) -> bool,
) -> MethodSpec<Ctx<S>> {
    MethodSpec::new(
        name,
        description,
        TypeTag::Bool,
        move |ctx: &mut Ctx<S>, args: &[Value]| Ok(Value::Bool(query(find_machine(ctx, args)?))),
    )
    .arg("name", "state machine name", TypeTag::String)
}

fn program_command<S: Send + 'static>(
    name: &'static str,
    description: &'static str,
    action: ProgramAction<S>,
) -> CommandSpec<Ctx<S>> {
    CommandSpec::new(
        name,
        description,
        move |ctx: &mut Ctx<S>, args: &[Value]| {
            let unit = unit_name(args);
            let result = match ctx.program_mut(unit) {
                Some(program) => action(program),
                None => Err(LifecycleError::UnknownProgram(unit.to_string())),
            };
            accepted(name, result)
        },
        |_: &Ctx<S>, _: &[Value]| Completion::Done,
    )
    .arg("name", "program name", TypeTag::String)
}

fn machine_command<S: Send + 'static>(
    name: &'static str,
    description: &'static str,
    action: MachineAction<S>,
) -> CommandSpec<Ctx<S>> {
    CommandSpec::new(
        name,
        description,
        move |ctx: &mut Ctx<S>, args: &[Value]| {
            let unit = unit_name(args);
            let result = match ctx.state_machine_mut(unit) {
                Some(machine) => action(machine),
                None => Err(LifecycleError::UnknownStateMachine(unit.to_string())),
            };
            accepted(name, result)
        },
        |_: &Ctx<S>, _: &[Value]| Completion::Done,
    )
    .arg("name", "state machine name", TypeTag::String)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use crate::instruction::Instruction;

    fn context() -> Ctx<()> {
        let mut ctx = ExecutionContext::new(());
        ctx.programs.insert(
            "idle".into(),
            Program::new("idle", Vec::<Instruction<Ctx<()>>>::new()),
        );
        ctx
    }

    #[test]
    fn surface_carries_every_control_operation() {
        let object = engine_interface::<()>();
        for method in [
            "hasProgram",
            "isProgramRunning",
            "isProgramPaused",
            "inProgramError",
            "hasStateMachine",
            "isStateMachineActive",
            "isStateMachineRunning",
            "isStateMachinePaused",
            "inStateMachineError",
            "inStateMachineState",
            "getStateMachineState",
        ] {
            assert!(object.method(method).is_some(), "missing method {method}");
        }
        for command in [
            "startProgram",
            "stopProgram",
            "pauseProgram",
            "stepProgram",
            "resetProgram",
            "activateStateMachine",
            "deactivateStateMachine",
            "startStateMachine",
            "pauseStateMachine",
            "stopStateMachine",
            "resetStateMachine",
            "requestStateMachineState",
        ] {
            assert!(object.command(command).is_some(), "missing command {command}");
        }
    }

    #[test]
    fn start_is_accepted_once() {
        let object = engine_interface::<()>();
        let mut ctx = context();
        let start = object.command("startProgram").unwrap();

        let mut first = start.instantiate(vec![Value::from("idle")]).unwrap();
        assert!(first.dispatch(&mut ctx));
        assert_eq!(first.poll(&ctx), CommandStatus::Done);
        assert!(ctx.program("idle").unwrap().is_running());

        let mut second = start.instantiate(vec![Value::from("idle")]).unwrap();
        assert!(!second.dispatch(&mut ctx));
        assert!(second.status().is_failed());
        assert!(ctx.program("idle").unwrap().is_running());
    }

    #[test]
    fn queries_on_unknown_units_fail() {
        let object = engine_interface::<()>();
        let mut ctx = context();
        let running = object.method("isProgramRunning").unwrap();
        assert_eq!(
            running.call(&mut ctx, &[Value::from("idle")]),
            Ok(Value::Bool(false))
        );
        assert!(running.call(&mut ctx, &[Value::from("ghost")]).is_err());
        let has = object.method("hasProgram").unwrap();
        assert_eq!(has.call(&mut ctx, &[Value::from("ghost")]), Ok(Value::Bool(false)));
    }
}
