//! ---
//! rctl_section: "15-testing-qa-runbook"
//! rctl_subsection: "integration-tests"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Integration and validation tests for the R-CTL stack."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use r_ctl_common::AppConfig;
use r_ctl_exec::{
    load_script_file, CommandSpec, Completion, EngineSettings, ExecutionContext, ExecutionEngine,
    MethodSpec, OperationInterface, ENGINE_OBJECT,
};
use r_ctl_expr::{ExpressionComposer, TypeTag, Value};
use r_ctl_marshal::read_cpf_file;

fn repo_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

fn read(path: &str) -> String {
    let full = repo_path(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[derive(Debug, Default)]
struct Stub {
    delay_until: u64,
    messages: Vec<String>,
}

type Ctx = ExecutionContext<Stub>;

/// Same signatures as the daemon's `clock` and `log` objects.
fn stub_objects() -> Vec<OperationInterface<Ctx>> {
    let clock = OperationInterface::new("clock", "cycle clock")
        .with_command(
            CommandSpec::new(
                "delay",
                "wait for cycles",
                |ctx: &mut Ctx, args: &[Value]| {
                    ctx.component.delay_until = ctx.cycle() + args[0].as_uint().unwrap_or(0);
                    true
                },
                |ctx: &Ctx, _: &[Value]| Completion::from(ctx.cycle() >= ctx.component.delay_until),
            )
            .arg("cycles", "cycles to wait", TypeTag::UInt),
        )
        .with_method(MethodSpec::new(
            "cycle",
            "current cycle",
            TypeTag::UInt,
            |ctx: &mut Ctx, _: &[Value]| Ok(Value::UInt(ctx.cycle())),
        ));
    let log = OperationInterface::new("log", "messages").with_method(
        MethodSpec::new(
            "info",
            "record a message",
            TypeTag::Bool,
            |ctx: &mut Ctx, args: &[Value]| {
                let message = args[0].as_str().unwrap_or_default().to_string();
                ctx.component.messages.push(message);
                Ok(Value::Bool(true))
            },
        )
        .arg("message", "text", TypeTag::String),
    );
    vec![clock, log]
}

#[test]
fn example_config_is_valid() {
    let config = AppConfig::from_str(&read("configs/example.toml")).unwrap();
    assert_eq!(config.engine.name, "controller");
    assert!(config.metrics.enabled);
    assert_eq!(config.scripts, vec![PathBuf::from("scripts/greet.toml")]);
    assert_eq!(
        config.properties.file,
        Some(PathBuf::from("properties.cpf"))
    );
}

#[test]
fn shipped_scripts_run_against_shipped_properties() -> anyhow::Result<()> {
    let properties = read_cpf_file(&repo_path("configs/properties.cpf"))?;
    let globals = properties.to_scope();
    assert_eq!(
        globals.get("greeting").map(|source| source.tag()),
        Some(TypeTag::String)
    );

    let mut engine = ExecutionEngine::new(Stub::default(), EngineSettings::default());
    for object in stub_objects() {
        assert!(engine.add_object(object));
    }
    let document = load_script_file(repo_path("configs/scripts/greet.toml"))?;
    let units = engine.load_script(&document, &ExpressionComposer::default(), &globals)?;
    assert_eq!(units, vec!["greet".to_string(), "supervisor".to_string()]);

    engine.dispatch_command(ENGINE_OBJECT, "startProgram", vec![Value::from("greet")])?;
    for command in ["activateStateMachine", "startStateMachine"] {
        engine.dispatch_command(ENGINE_OBJECT, command, vec![Value::from("supervisor")])?;
    }
    for _ in 0..60 {
        engine.step();
    }

    let rounds = globals.variable("rounds").map(|variable| variable.get());
    assert_eq!(rounds, Some(Value::Int(1)));
    assert_eq!(
        engine.call_method(ENGINE_OBJECT, "getProgramStatus", &[Value::from("greet")])?,
        Value::from("stopped")
    );
    assert_eq!(
        engine.call_method(
            ENGINE_OBJECT,
            "getStateMachineState",
            &[Value::from("supervisor")]
        )?,
        Value::from("done")
    );
    let messages = &engine.component().messages;
    assert_eq!(messages.first().map(String::as_str), Some("hello from r-ctl"));
    assert_eq!(messages.len(), 2);
    Ok(())
}
