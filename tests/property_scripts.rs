//! ---
//! rctl_section: "15-testing-qa-runbook"
//! rctl_subsection: "integration-tests"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Integration and validation tests for the R-CTL stack."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use r_ctl_exec::{parse_script, EngineSettings, ExecutionEngine, LoadError, ENGINE_OBJECT};
use r_ctl_expr::{Expr, ExpressionComposer, Value};
use r_ctl_marshal::{read_cpf_file, write_cpf_file, Property, PropertyBag, PropertyValue};
use tempfile::tempdir;

fn tuning() -> PropertyBag {
    let gains = PropertyBag::typed("PidGains")
        .with(Property::new("kp", PropertyValue::Double(2.0)))
        .with(Property::new("ki", PropertyValue::Double(0.5)));
    PropertyBag::new()
        .with(Property::new("gains", PropertyValue::Struct(gains)))
        .with(Property::new("error", PropertyValue::Double(0.0)))
        .with(Property::new("output", PropertyValue::Double(0.0)).with_description("last output"))
        .with(Property::new("updates", PropertyValue::ULong(0)))
}

const CONTROLLER: &str = r#"
[[programs]]
name = "control"
instructions = [
  { assign = { variable = "output", value = { apply = { op = "*", args = [{ var = "gains.kp" }, { var = "error" }] } } } },
  { assign = { variable = "updates", value = { apply = { op = "+", args = [{ var = "updates" }, { literal = { type = "uint", value = 1 } }] } } } },
]
"#;

#[test]
fn scripts_update_properties_that_are_saved_back() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tuning.cpf");
    write_cpf_file(&tuning(), &path)?;

    let mut bag = read_cpf_file(&path)?;
    let globals = bag.to_scope();
    globals
        .variable("error")
        .expect("error variable")
        .set(Value::Double(1.5))
        .expect("double fits");

    let mut engine = ExecutionEngine::new((), EngineSettings::default());
    let document = parse_script(CONTROLLER, "controller.toml".as_ref())?;
    engine.load_script(&document, &ExpressionComposer::default(), &globals)?;
    engine.dispatch_command(ENGINE_OBJECT, "startProgram", vec![Value::from("control")])?;
    engine.step();
    engine.step();

    assert_eq!(bag.refresh_from_scope(&globals), 5);
    write_cpf_file(&bag, &path)?;
    let saved = read_cpf_file(&path)?;
    assert_eq!(
        saved.find("output").map(|property| property.value.clone()),
        Some(PropertyValue::Double(3.0))
    );
    assert_eq!(
        saved.find("updates").map(|property| property.value.clone()),
        Some(PropertyValue::ULong(1))
    );
    assert_eq!(
        saved.find_path("gains.kp").map(|property| property.value.clone()),
        Some(PropertyValue::Double(2.0))
    );
    Ok(())
}

#[test]
fn scripts_naming_missing_properties_do_not_load() {
    let globals = tuning().to_scope();
    let mut engine = ExecutionEngine::new((), EngineSettings::default());
    let mut document = parse_script(CONTROLLER, "controller.toml".as_ref()).unwrap();
    document.programs[0].instructions.push(r_ctl_exec::script::InstructionDoc::Evaluate(
        Expr::binary(">", Expr::var("gains.kd"), Expr::literal(0.0)),
    ));

    let err = engine
        .load_script(&document, &ExpressionComposer::default(), &globals)
        .unwrap_err();
    assert!(matches!(err, LoadError::Compile { ref unit, .. } if unit == "control"));
    assert!(engine.context().program("control").is_none());
}
