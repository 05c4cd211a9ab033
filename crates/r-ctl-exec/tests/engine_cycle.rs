//! ---
//! rctl_section: "15-testing-qa-runbook"
//! rctl_subsection: "integration-tests"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Engine cycle, control surface, and script loading scenarios."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use r_ctl_common::LoopTimingReporter;
use r_ctl_exec::{
    load_script_file, parse_script, CommandSpec, CommandStatus, Completion, EngineSettings,
    ExecutionContext, ExecutionEngine, LifecycleError, MachineStatus, MethodSpec,
    OperationInterface, ProgramStatus, ENGINE_OBJECT,
};
use r_ctl_expr::{AnyVariable, ExpressionComposer, Scope, TypeTag, Value};
use r_ctl_rt::{spawn_periodic, RunLimits};
use tokio::sync::broadcast;

/// Axis that reaches any target two cycles after the move was dispatched.
#[derive(Debug, Default)]
struct Axis {
    position: i64,
    settles_at: u64,
    moves: u32,
}

type Ctx = ExecutionContext<Axis>;

fn axis_object() -> OperationInterface<Ctx> {
    OperationInterface::new("axis", "simulated linear axis")
        .with_command(
            CommandSpec::new(
                "moveTo",
                "move to an absolute position",
                |ctx: &mut Ctx, args: &[Value]| {
                    let Some(target) = args[0].as_int() else {
                        return false;
                    };
                    let settles_at = ctx.cycle() + 2;
                    let axis = ctx.component_mut();
                    axis.position = target;
                    axis.settles_at = settles_at;
                    axis.moves += 1;
                    true
                },
                |ctx: &Ctx, _: &[Value]| Completion::from(ctx.cycle() >= ctx.component().settles_at),
            )
            .arg("position", "target position", TypeTag::Int),
        )
        .with_method(MethodSpec::new(
            "position",
            "last commanded position",
            TypeTag::Int,
            |ctx: &mut Ctx, _: &[Value]| Ok(Value::Int(ctx.component().position)),
        ))
}

fn engine() -> ExecutionEngine<Axis> {
    let engine = ExecutionEngine::new(Axis::default(), EngineSettings::default());
    assert!(engine.add_object(axis_object()));
    engine
}

fn name(unit: &str) -> Vec<Value> {
    vec![Value::from(unit)]
}

fn load(engine: &mut ExecutionEngine<Axis>, text: &str, globals: &Scope) {
    let document = parse_script(text, "inline.toml".as_ref()).unwrap();
    engine
        .load_script(&document, &ExpressionComposer::default(), globals)
        .unwrap();
}

const COUNTER: &str = r#"
[[programs]]
name = "counter"
instructions = [
  { assign = { variable = "n", value = { apply = { op = "+", args = [{ var = "n" }, { literal = { type = "int", value = 1 } }] } } } },
  { assign = { variable = "n", value = { apply = { op = "+", args = [{ var = "n" }, { literal = { type = "int", value = 1 } }] } } } },
  { assign = { variable = "n", value = { apply = { op = "+", args = [{ var = "n" }, { literal = { type = "int", value = 1 } }] } } } },
]
"#;

fn counter_engine() -> (ExecutionEngine<Axis>, AnyVariable) {
    let mut globals = Scope::new();
    let n = globals.declare("n", Value::Int(0));
    let mut engine = engine();
    load(&mut engine, COUNTER, &globals);
    (engine, n)
}

#[test]
fn command_is_dispatched_once_and_done_on_the_settling_cycle() {
    let mut engine = engine();
    let handle = engine
        .handle()
        .command("axis", "moveTo", vec![Value::Int(40)])
        .unwrap();

    // dispatched in cycle 1, settles at cycle 3
    engine.step();
    assert_eq!(handle.status(), CommandStatus::Dispatched);
    engine.step();
    assert_eq!(handle.status(), CommandStatus::Dispatched);
    let report = engine.step();
    assert_eq!(handle.status(), CommandStatus::Done);
    assert_eq!(report.commands_done, 1);
    assert_eq!(engine.component().moves, 1);
    assert_eq!(engine.component().position, 40);
}

#[test]
fn paused_program_advances_only_on_step() {
    let (mut engine, n) = counter_engine();
    engine
        .dispatch_command(ENGINE_OBJECT, "startProgram", name("counter"))
        .unwrap();
    engine
        .dispatch_command(ENGINE_OBJECT, "pauseProgram", name("counter"))
        .unwrap();

    for _ in 0..3 {
        engine.step();
    }
    assert_eq!(n.get(), Value::Int(0));

    let step = engine
        .dispatch_command(ENGINE_OBJECT, "stepProgram", name("counter"))
        .unwrap();
    let second = engine
        .dispatch_command(ENGINE_OBJECT, "stepProgram", name("counter"))
        .unwrap();
    assert_eq!(second.status(), CommandStatus::Failed("rejected".into()));
    engine.step();
    engine.step();
    assert!(step.status().is_done());
    assert_eq!(n.get(), Value::Int(1));
    assert_eq!(
        engine.call_method(ENGINE_OBJECT, "getProgramLine", &name("counter")),
        Ok(Value::UInt(1))
    );

    engine
        .dispatch_command(ENGINE_OBJECT, "startProgram", name("counter"))
        .unwrap();
    engine.step();
    engine.step();
    assert_eq!(n.get(), Value::Int(3));
    let program = engine.context().program("counter").unwrap();
    assert_eq!(program.status(), ProgramStatus::Stopped);
}

#[test]
fn starting_a_running_program_is_refused() {
    let (mut engine, n) = counter_engine();
    let handle = engine.handle();
    let first = handle
        .command(ENGINE_OBJECT, "startProgram", name("counter"))
        .unwrap();
    let second = handle
        .command(ENGINE_OBJECT, "startProgram", name("counter"))
        .unwrap();

    engine.step();
    assert_eq!(first.status(), CommandStatus::Done);
    assert!(second.status().is_failed());
    assert!(engine.context().program("counter").unwrap().is_running());
    assert_eq!(n.get(), Value::Int(1));
}

const CELL: &str = r#"
[[state_machines]]
name = "cell"
initial = "idle"

[[state_machines.states]]
name = "idle"
transitions = [{ guard = { var = "go" }, target = "busy" }]

[[state_machines.states]]
name = "busy"
entry = [{ dispatch = { object = "axis", command = "moveTo", args = [{ literal = { type = "int", value = 5 } }] } }]
transitions = [{ guard = { var = "done" }, target = "idle" }]
"#;

#[test]
fn request_state_needs_a_satisfied_guard() {
    let mut globals = Scope::new();
    let go = globals.declare("go", Value::Bool(false));
    globals.declare("done", Value::Bool(false));
    let mut engine = engine();
    load(&mut engine, CELL, &globals);

    engine
        .dispatch_command(ENGINE_OBJECT, "activateStateMachine", name("cell"))
        .unwrap();
    engine.step();
    assert!(engine.context().state_machine("cell").unwrap().in_state("idle"));

    let refused = engine
        .dispatch_command(
            ENGINE_OBJECT,
            "requestStateMachineState",
            vec![Value::from("cell"), Value::from("busy")],
        )
        .unwrap();
    assert!(refused.status().is_failed());
    let direct = engine
        .context_mut()
        .state_machine_mut("cell")
        .unwrap()
        .request_state("busy");
    assert!(matches!(direct, Err(LifecycleError::NoTransition { .. })));
    assert_eq!(
        engine.call_method(ENGINE_OBJECT, "getStateMachineState", &name("cell")),
        Ok(Value::from("idle"))
    );

    go.set(Value::Bool(true)).unwrap();
    let accepted = engine
        .dispatch_command(
            ENGINE_OBJECT,
            "requestStateMachineState",
            vec![Value::from("cell"), Value::from("busy")],
        )
        .unwrap();
    assert_eq!(accepted.status(), CommandStatus::Dispatched);
    engine.step();
    engine.step();
    assert_eq!(accepted.status(), CommandStatus::Done);
    assert_eq!(
        engine.call_method(ENGINE_OBJECT, "inStateMachineState", &[Value::from("cell"), Value::from("busy")]),
        Ok(Value::Bool(true))
    );
    assert_eq!(engine.component().moves, 1);
}

#[test]
fn a_faulting_unit_does_not_stop_the_others() {
    let text = r#"
[[programs]]
name = "broken"
instructions = [{ evaluate = { apply = { op = ">", args = [{ literal = { type = "int", value = 1 } }, { literal = { type = "int", value = 2 } }] } } }]

[[programs]]
name = "healthy"
instructions = [{ dispatch = { object = "axis", command = "moveTo", args = [{ literal = { type = "int", value = 1 } }] } }]
"#;
    let mut engine = engine();
    load(&mut engine, text, &Scope::new());
    for unit in ["broken", "healthy"] {
        engine
            .dispatch_command(ENGINE_OBJECT, "startProgram", name(unit))
            .unwrap();
    }

    let report = engine.step();
    assert_eq!(report.faults, 1);
    assert!(engine.context().program("broken").unwrap().in_error());
    assert!(engine.context().program("healthy").unwrap().is_running());
    assert_eq!(engine.component().moves, 1);
    assert_eq!(
        engine.call_method(ENGINE_OBJECT, "inProgramError", &name("broken")),
        Ok(Value::Bool(true))
    );

    engine
        .dispatch_command(ENGINE_OBJECT, "resetProgram", name("broken"))
        .unwrap();
    assert_eq!(
        engine.context().program("broken").unwrap().status(),
        ProgramStatus::Loaded
    );
}

#[test]
fn scripts_load_from_disk() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(CELL.as_bytes())?;
    let document = load_script_file(file.path())?;

    let mut globals = Scope::new();
    globals.declare("go", Value::Bool(false));
    globals.declare("done", Value::Bool(false));
    let mut engine = engine();
    let loaded = engine.load_script(&document, &ExpressionComposer::default(), &globals)?;
    assert_eq!(loaded, vec!["cell".to_string()]);

    // loading the same units twice is refused and leaves the engine as it was
    assert!(engine
        .load_script(&document, &ExpressionComposer::default(), &globals)
        .is_err());
    assert_eq!(engine.context().state_machines().count(), 1);

    let machine = engine.unload_state_machine("cell")?;
    assert_eq!(machine.status(), MachineStatus::Loaded);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn periodic_engine_serves_remote_callers() {
    let mut globals = Scope::new();
    let go = globals.declare("go", Value::Bool(false));
    globals.declare("done", Value::Bool(false));
    let mut engine = engine();
    load(&mut engine, CELL, &globals);
    let handle = engine.handle();

    let (shutdown, rx) = broadcast::channel(1);
    let period = Duration::from_millis(1);
    let task = spawn_periodic(
        engine,
        period,
        RunLimits::default(),
        rx,
        Arc::new(LoopTimingReporter::new(period)),
    );

    for command in ["activateStateMachine", "startStateMachine"] {
        let status = handle
            .command(ENGINE_OBJECT, command, name("cell"))
            .unwrap()
            .finished()
            .await;
        assert_eq!(status, CommandStatus::Done, "{command}");
    }
    go.set(Value::Bool(true)).unwrap();

    let mut position = Value::Int(0);
    for _ in 0..20 {
        position = handle.call("axis", "position", vec![]).await.unwrap();
        if position == Value::Int(5) {
            break;
        }
    }
    assert_eq!(position, Value::Int(5));

    shutdown.send(()).unwrap();
    let engine = task.await.unwrap();
    assert_eq!(
        engine.context().state_machine("cell").unwrap().status(),
        MachineStatus::Running
    );
    drop(engine);
    assert!(handle.is_closed());
}
