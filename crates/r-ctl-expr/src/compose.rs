//! ---
//! rctl_section: "02-expression-graph"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Data source graph and operator resolution."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Composition of expression trees into data source graphs.
//!
//! [`Expr`] is the already-parsed form a script loader hands over. The
//! composer resolves every operator against an [`OperatorRepository`]
//! bottom-up, so failures surface at load time and never inside a cycle.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::data_source::{AnyDataSource, AnyVariable, Ds, ScriptType};
use crate::error::CompileError;
use crate::operators::{Arity, OperatorRepository};
use crate::value::{TypeTag, Value};

/// Expression tree as read from a script document.
///
/// The arity of an `apply` node is the number of its arguments; tokens are
/// resolved by the repository for that arity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    Var(String),
    Member { of: Box<Expr>, name: String },
    Apply { op: String, args: Vec<Expr> },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn member(of: Expr, name: impl Into<String>) -> Self {
        Expr::Member {
            of: Box::new(of),
            name: name.into(),
        }
    }

    pub fn apply(op: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Apply {
            op: op.into(),
            args,
        }
    }

    pub fn unary(op: impl Into<String>, a: Expr) -> Self {
        Expr::apply(op, vec![a])
    }

    pub fn binary(op: impl Into<String>, a: Expr, b: Expr) -> Self {
        Expr::apply(op, vec![a, b])
    }
}

/// Named sources visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: IndexMap<String, AnyDataSource>,
    variables: IndexMap<String, AnyVariable>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a read-only source. A later binding of the same name replaces it.
    pub fn insert(&mut self, name: impl Into<String>, source: AnyDataSource) {
        self.entries.insert(name.into(), source);
    }

    /// Bind a writable variable; its read view becomes visible as well.
    pub fn insert_variable(&mut self, name: impl Into<String>, variable: AnyVariable) {
        let name = name.into();
        self.entries.insert(name.clone(), variable.source());
        self.variables.insert(name, variable);
    }

    /// Create and bind a variable holding `initial`.
    pub fn declare(&mut self, name: impl Into<String>, initial: Value) -> AnyVariable {
        let variable = AnyVariable::new(initial);
        self.insert_variable(name, variable.clone());
        variable
    }

    pub fn get(&self, name: &str) -> Option<&AnyDataSource> {
        self.entries.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&AnyVariable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every binding of `other`, replacing clashing names.
    pub fn extend(&mut self, other: &Scope) {
        for (name, source) in &other.entries {
            self.entries.insert(name.clone(), source.clone());
        }
        for (name, variable) in &other.variables {
            self.variables.insert(name.clone(), variable.clone());
        }
    }
}

/// Turns [`Expr`] trees into data source graphs.
#[derive(Debug, Clone)]
pub struct ExpressionComposer {
    repository: Arc<OperatorRepository>,
}

impl Default for ExpressionComposer {
    fn default() -> Self {
        Self::new(OperatorRepository::global())
    }
}

impl ExpressionComposer {
    pub fn new(repository: Arc<OperatorRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<OperatorRepository> {
        &self.repository
    }

    pub fn compose(&self, expr: &Expr, scope: &Scope) -> Result<AnyDataSource, CompileError> {
        match expr {
            Expr::Literal(value) => Ok(AnyDataSource::constant(value.clone())),
            Expr::Var(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::UnknownVariable(name.clone())),
            Expr::Member { of, name } => {
                let operand = self.compose(of, scope)?;
                self.repository.apply_dot(name, &operand).ok_or_else(|| {
                    CompileError::UnresolvedMember {
                        member: name.clone(),
                        operand: operand.tag(),
                    }
                })
            }
            Expr::Apply { op, args } => {
                let arity =
                    Arity::for_operands(args.len()).ok_or_else(|| CompileError::UnsupportedArity {
                        token: op.clone(),
                        count: args.len(),
                    })?;
                let operands = args
                    .iter()
                    .map(|arg| self.compose(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                trace!(op = %op, ?arity, "resolving operator");
                self.repository
                    .apply(arity, op, &operands)
                    .ok_or_else(|| CompileError::UnresolvedOperator {
                        token: op.clone(),
                        operands: operands.iter().map(AnyDataSource::tag).collect(),
                    })
            }
        }
    }

    /// Compose and require a result of type `T`.
    pub fn compose_typed<T: ScriptType>(
        &self,
        expr: &Expr,
        scope: &Scope,
    ) -> Result<Ds<T>, CompileError> {
        let source = self.compose(expr, scope)?;
        T::downcast(&source).ok_or(CompileError::TypeMismatch {
            expected: T::TAG,
            found: source.tag(),
        })
    }

    /// Guards and conditions must be boolean.
    pub fn compose_bool(&self, expr: &Expr, scope: &Scope) -> Result<Ds<bool>, CompileError> {
        self.compose_typed::<bool>(expr, scope)
    }

    /// Compose and check the result against a declared tag.
    pub fn compose_as(
        &self,
        expr: &Expr,
        scope: &Scope,
        expected: TypeTag,
    ) -> Result<AnyDataSource, CompileError> {
        let source = self.compose(expr, scope)?;
        if source.tag() != expected {
            return Err(CompileError::TypeMismatch {
                expected,
                found: source.tag(),
            });
        }
        Ok(source)
    }
}
