//! ---
//! rctl_section: "02-expression-graph"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Data source graph and operator resolution."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Built-in operator set.
//!
//! Registration order is the tie-break for overlapping tokens: logical
//! operators, then arithmetic for `int`, `uint` and `double` in that order,
//! string concatenation, comparisons, the conditional, and finally the
//! geometry toolkit. No two entries below claim the same token for the same
//! operand types.

use std::sync::Arc;

use crate::data_source::{AnyDataSource, ConditionalDataSource, Ds, ScriptType};
use crate::error::EvalError;
use crate::operators::{Operator, OperatorRepositoryBuilder, TernaryOp};
use crate::value::{Frame, Vector};

pub fn register(builder: &mut OperatorRepositoryBuilder) {
    register_logical(builder);
    register_int(builder);
    register_uint(builder);
    register_double(builder);
    builder.add(Operator::binary("+", |a: String, b: String| Ok(a + &b)));
    register_comparisons(builder);
    builder.add(Operator::Ternary(Box::new(ConditionalOperator)));
    register_geometry(builder);
}

fn register_logical(builder: &mut OperatorRepositoryBuilder) {
    builder
        .add(Operator::unary("!", |a: bool| Ok(!a)))
        .add(Operator::binary("&&", |a: bool, b: bool| Ok(a && b)))
        .add(Operator::binary("||", |a: bool, b: bool| Ok(a || b)));
}

fn register_int(builder: &mut OperatorRepositoryBuilder) {
    builder
        .add(Operator::unary("-", |a: i64| {
            a.checked_neg().ok_or(EvalError::Overflow)
        }))
        .add(Operator::unary("+", |a: i64| Ok(a)))
        .add(Operator::binary("+", |a: i64, b: i64| {
            a.checked_add(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("-", |a: i64, b: i64| {
            a.checked_sub(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("*", |a: i64, b: i64| {
            a.checked_mul(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("/", |a: i64, b: i64| {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_div(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("%", |a: i64, b: i64| {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_rem(b).ok_or(EvalError::Overflow)
        }));
}

fn register_uint(builder: &mut OperatorRepositoryBuilder) {
    builder
        .add(Operator::binary("+", |a: u64, b: u64| {
            a.checked_add(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("-", |a: u64, b: u64| {
            a.checked_sub(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("*", |a: u64, b: u64| {
            a.checked_mul(b).ok_or(EvalError::Overflow)
        }))
        .add(Operator::binary("/", |a: u64, b: u64| {
            a.checked_div(b).ok_or(EvalError::DivisionByZero)
        }))
        .add(Operator::binary("%", |a: u64, b: u64| {
            a.checked_rem(b).ok_or(EvalError::DivisionByZero)
        }));
}

fn register_double(builder: &mut OperatorRepositoryBuilder) {
    builder
        .add(Operator::unary("-", |a: f64| Ok(-a)))
        .add(Operator::unary("+", |a: f64| Ok(a)))
        .add(Operator::binary("+", |a: f64, b: f64| Ok(a + b)))
        .add(Operator::binary("-", |a: f64, b: f64| Ok(a - b)))
        .add(Operator::binary("*", |a: f64, b: f64| Ok(a * b)))
        .add(Operator::binary("/", |a: f64, b: f64| {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(a / b)
        }))
        .add(Operator::binary("%", |a: f64, b: f64| {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(a % b)
        }));
}

macro_rules! ordered_comparisons {
    ($builder:expr, $($ty:ty),+) => {
        $(
            $builder
                .add(Operator::binary("==", |a: $ty, b: $ty| Ok(a == b)))
                .add(Operator::binary("!=", |a: $ty, b: $ty| Ok(a != b)))
                .add(Operator::binary("<", |a: $ty, b: $ty| Ok(a < b)))
                .add(Operator::binary(">", |a: $ty, b: $ty| Ok(a > b)))
                .add(Operator::binary("<=", |a: $ty, b: $ty| Ok(a <= b)))
                .add(Operator::binary(">=", |a: $ty, b: $ty| Ok(a >= b)));
        )+
    };
}

fn register_comparisons(builder: &mut OperatorRepositoryBuilder) {
    ordered_comparisons!(builder, i64, u64, f64, char, String);
    builder
        .add(Operator::binary("==", |a: bool, b: bool| Ok(a == b)))
        .add(Operator::binary("!=", |a: bool, b: bool| Ok(a != b)));
}

fn register_geometry(builder: &mut OperatorRepositoryBuilder) {
    builder
        .add(Operator::ternary("vector", |x: f64, y: f64, z: f64| {
            Ok(Vector::new(x, y, z))
        }))
        .add(Operator::sixary("frame", |[x, y, z, roll, pitch, yaw]: [f64; 6]| {
            Ok(Frame {
                position: Vector::new(x, y, z),
                rotation: Vector::new(roll, pitch, yaw),
            })
        }))
        .add(Operator::binary("+", |a: Vector, b: Vector| Ok(a.add(&b))))
        .add(Operator::binary("-", |a: Vector, b: Vector| Ok(a.sub(&b))))
        .add(Operator::binary("*", |a: Vector, k: f64| Ok(a.scale(k))))
        .add(Operator::binary("*", |k: f64, a: Vector| Ok(a.scale(k))))
        .add(Operator::binary("==", |a: Vector, b: Vector| Ok(a == b)))
        .add(Operator::dot("x", |v: Vector| Ok(v.x)))
        .add(Operator::dot("y", |v: Vector| Ok(v.y)))
        .add(Operator::dot("z", |v: Vector| Ok(v.z)))
        .add(Operator::dot("p", |f: Frame| Ok(f.position)))
        .add(Operator::dot("r", |f: Frame| Ok(f.rotation)))
        .add(Operator::dot("length", |s: String| Ok(s.chars().count() as u64)));
}

/// `?:` over every script type; both branches must share a type.
struct ConditionalOperator;

impl ConditionalOperator {
    fn typed<T: ScriptType>(
        condition: Ds<bool>,
        then: &AnyDataSource,
        otherwise: &AnyDataSource,
    ) -> Option<AnyDataSource> {
        let then = T::downcast(then)?;
        let otherwise = T::downcast(otherwise)?;
        Some(T::upcast(Arc::new(ConditionalDataSource::new(
            condition, then, otherwise,
        ))))
    }
}

impl TernaryOp for ConditionalOperator {
    fn build(
        &self,
        op: &str,
        a: &AnyDataSource,
        b: &AnyDataSource,
        c: &AnyDataSource,
    ) -> Option<AnyDataSource> {
        if op != "?:" {
            return None;
        }
        let condition = bool::downcast(a)?;
        match b {
            AnyDataSource::Bool(_) => Self::typed::<bool>(condition, b, c),
            AnyDataSource::Char(_) => Self::typed::<char>(condition, b, c),
            AnyDataSource::Int(_) => Self::typed::<i64>(condition, b, c),
            AnyDataSource::UInt(_) => Self::typed::<u64>(condition, b, c),
            AnyDataSource::Double(_) => Self::typed::<f64>(condition, b, c),
            AnyDataSource::String(_) => Self::typed::<String>(condition, b, c),
            AnyDataSource::Vector(_) => Self::typed::<Vector>(condition, b, c),
            AnyDataSource::Frame(_) => Self::typed::<Frame>(condition, b, c),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::operators::OperatorRepository;
    use crate::value::Value;
    use crate::AnyDataSource;
    use crate::EvalError;

    fn lit(value: Value) -> AnyDataSource {
        AnyDataSource::constant(value)
    }

    #[test]
    fn integer_division_by_zero_is_invalid() {
        let repo = OperatorRepository::global();
        let node = repo
            .apply_binary("/", &lit(Value::Int(4)), &lit(Value::Int(0)))
            .unwrap();
        assert_eq!(node.evaluate_value(), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn overflow_is_reported() {
        let repo = OperatorRepository::global();
        let node = repo
            .apply_binary("+", &lit(Value::Int(i64::MAX)), &lit(Value::Int(1)))
            .unwrap();
        assert_eq!(node.evaluate_value(), Err(EvalError::Overflow));
    }

    #[test]
    fn mixed_int_and_string_is_not_claimed() {
        let repo = OperatorRepository::global();
        assert!(repo
            .apply_binary("+", &lit(Value::Int(1)), &lit(Value::from("a")))
            .is_none());
    }

    #[test]
    fn conditional_requires_matching_branches() {
        let repo = OperatorRepository::global();
        let cond = lit(Value::Bool(false));
        let node = repo
            .apply_ternary("?:", &cond, &lit(Value::Int(1)), &lit(Value::Int(2)))
            .unwrap();
        assert_eq!(node.evaluate_value(), Ok(Value::Int(2)));
        assert!(repo
            .apply_ternary("?:", &cond, &lit(Value::Int(1)), &lit(Value::Double(2.0)))
            .is_none());
    }

    #[test]
    fn frame_members_resolve() {
        let repo = OperatorRepository::global();
        let parts: [AnyDataSource; 6] =
            [1.0, 2.0, 3.0, 0.0, 0.0, 0.5].map(|v| lit(Value::Double(v)));
        let frame = repo.apply_sixary("frame", &parts).unwrap();
        let position = repo.apply_dot("p", &frame).unwrap();
        let y = repo.apply_dot("y", &position).unwrap();
        assert_eq!(y.evaluate_value(), Ok(Value::Double(2.0)));
    }
}
