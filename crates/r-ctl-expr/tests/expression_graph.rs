//! ---
//! rctl_section: "15-testing-qa-runbook"
//! rctl_subsection: "integration-tests"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Expression graph and operator repository checks."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use r_ctl_expr::{
    AnyDataSource, Arity, CompileError, EvalError, Expr, ExpressionComposer, Operator,
    OperatorRepository, OperatorRepositoryBuilder, SampledDataSource, Scope, TypeTag, Value,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct GuardDoc {
    guard: Expr,
}

#[test]
fn toml_expression_composes_into_a_guard() {
    let doc: GuardDoc = toml::from_str(
        r#"
        [guard.apply]
        op = "&&"
        args = [
            { apply = { op = ">", args = [{ var = "temperature" }, { literal = { type = "double", value = 40.0 } }] } },
            { apply = { op = "!", args = [{ var = "override" }] } },
        ]
        "#,
    )
    .unwrap();

    let mut scope = Scope::new();
    let temperature = scope.declare("temperature", Value::Double(35.0));
    scope.declare("override", Value::Bool(false));
    let guard = ExpressionComposer::default()
        .compose_bool(&doc.guard, &scope)
        .map_err(|err| err.to_string())
        .unwrap();

    assert_eq!(guard.evaluate(), Ok(false));
    temperature.set(Value::Double(41.5)).unwrap();
    assert_eq!(guard.evaluate(), Ok(true));
}

#[test]
fn sampled_input_is_read_once_per_cycle() {
    let position = Arc::new(AtomicI64::new(10));
    let reader = position.clone();
    let sensor: AnyDataSource = AnyDataSource::Int(Arc::new(SampledDataSource::<i64>::new(move || {
        Ok(reader.load(Ordering::SeqCst))
    })));
    let mut scope = Scope::new();
    scope.insert("position", sensor.clone());

    let composer = ExpressionComposer::default();
    let error = composer
        .compose(
            &Expr::binary("-", Expr::literal(12i64), Expr::var("position")),
            &scope,
        )
        .unwrap();
    assert_eq!(error.evaluate_value(), Ok(Value::Int(2)));

    position.store(7, Ordering::SeqCst);
    assert_eq!(error.evaluate_value(), Ok(Value::Int(2)));

    error.invalidate();
    assert_eq!(error.evaluate_value(), Ok(Value::Int(5)));
}

#[test]
fn unavailable_input_invalidates_the_consumer() {
    let sensor = AnyDataSource::Double(Arc::new(SampledDataSource::<f64>::new(|| {
        Err(EvalError::Unavailable("encoder".into()))
    })));
    let mut scope = Scope::new();
    scope.insert("encoder", sensor);
    let node = ExpressionComposer::default()
        .compose(
            &Expr::binary("*", Expr::var("encoder"), Expr::literal(0.5)),
            &scope,
        )
        .unwrap();
    assert_eq!(
        node.evaluate_value(),
        Err(EvalError::Unavailable("encoder".into()))
    );
}

#[test]
fn custom_repository_is_consulted_instead_of_builtins() {
    let mut builder = OperatorRepositoryBuilder::new();
    builder.add(Operator::binary("max", |a: i64, b: i64| Ok(a.max(b))));
    let composer = ExpressionComposer::new(builder.build());

    let node = composer
        .compose(
            &Expr::binary("max", Expr::literal(3i64), Expr::literal(9i64)),
            &Scope::new(),
        )
        .unwrap();
    assert_eq!(node.evaluate_value(), Ok(Value::Int(9)));

    let err = composer
        .compose(
            &Expr::binary("+", Expr::literal(3i64), Expr::literal(9i64)),
            &Scope::new(),
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::UnresolvedOperator { .. }));
}

#[test]
fn unknown_variable_is_a_compile_error() {
    let err = ExpressionComposer::default()
        .compose(&Expr::var("missing"), &Scope::new())
        .unwrap_err();
    assert_eq!(err, CompileError::UnknownVariable("missing".into()));
}

#[test]
fn member_access_on_wrong_type_names_the_operand() {
    let err = ExpressionComposer::default()
        .compose(&Expr::member(Expr::literal(1.0), "x"), &Scope::new())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedMember {
            member: "x".into(),
            operand: TypeTag::Double,
        }
    );
}

#[test]
fn vector_toolkit_composes() {
    let composer = ExpressionComposer::default();
    let v = Expr::apply(
        "vector",
        vec![Expr::literal(1.0), Expr::literal(2.0), Expr::literal(3.0)],
    );
    let scaled = Expr::binary("*", v, Expr::literal(2.0));
    let z = composer
        .compose(&Expr::member(scaled, "z"), &Scope::new())
        .unwrap();
    assert_eq!(z.evaluate_value(), Ok(Value::Double(6.0)));
}

#[test]
fn global_repository_registers_every_arity() {
    let repo = OperatorRepository::global();
    for arity in [
        Arity::Dot,
        Arity::Unary,
        Arity::Binary,
        Arity::Ternary,
        Arity::Sixary,
    ] {
        assert!(repo.len(arity) > 0, "{arity:?} has no builders");
    }
}

#[test]
fn string_length_counts_characters() {
    let node = ExpressionComposer::default()
        .compose(
            &Expr::member(
                Expr::binary("+", Expr::literal("ab"), Expr::literal("ç")),
                "length",
            ),
            &Scope::new(),
        )
        .unwrap();
    assert_eq!(node.evaluate_value(), Ok(Value::UInt(3)));
}
