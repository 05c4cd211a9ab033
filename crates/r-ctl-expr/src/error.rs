//! ---
//! rctl_section: "02-expression-graph"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Data source graph and operator resolution."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use thiserror::Error;

use crate::value::TypeTag;

/// Marker produced when a data source cannot yield a valid value.
///
/// Errors are cached alongside successful results and travel up the graph to
/// the consuming instruction or guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("input unavailable: {0}")]
    Unavailable(String),
    #[error("domain error: {0}")]
    Domain(String),
}

/// Errors raised while composing an expression into a data source graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("no operator '{token}' for ({})", format_tags(.operands))]
    UnresolvedOperator {
        token: String,
        operands: Vec<TypeTag>,
    },
    #[error("no member '{member}' on {operand}")]
    UnresolvedMember { member: String, operand: TypeTag },
    #[error("operator '{token}' cannot take {count} operands")]
    UnsupportedArity { token: String, count: usize },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("expected {expected} expression, found {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },
}

fn format_tags(tags: &[TypeTag]) -> String {
    tags.iter()
        .map(|tag| tag.name())
        .collect::<Vec<_>>()
        .join(", ")
}
