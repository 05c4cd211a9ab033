//! ---
//! rctl_section: "02-expression-graph"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Data source graph and operator resolution."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Expression substrate for R-CTL scripts.
//!
//! Scripts are compiled bottom-up into a graph of shared, lazily evaluated
//! [`DataSource`] nodes. Operators are resolved at composition time through
//! the [`OperatorRepository`], so a composed node is always statically valid
//! for the operand types it captured.

pub mod builtin;
pub mod compose;
pub mod data_source;
pub mod error;
pub mod operators;
pub mod value;

pub use compose::{Expr, ExpressionComposer, Scope};
pub use data_source::{
    AnyDataSource, AnyVariable, ConstantDataSource, DataSource, Ds, SampledDataSource,
    ScriptType, ValueDataSource,
};
pub use error::{CompileError, EvalError};
pub use operators::{
    Arity, BinaryOp, BinaryOperator, DotOp, DotOperator, Operator, OperatorRepository,
    OperatorRepositoryBuilder, SixaryOp, SixaryOperator, TernaryOp, TernaryOperator, UnaryOp,
    UnaryOperator,
};
pub use value::{Frame, TypeTag, Value, Vector};
