//! ---
//! rctl_section: "02-expression-graph"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Data source graph and operator resolution."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Operator builders and the per-arity repository that resolves them.
//!
//! Builders are consulted in registration order and the first one claiming
//! a token for the given operand types wins. A builder that does not apply
//! returns `None` before allocating anything.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::builtin;
use crate::data_source::{
    AnyDataSource, BinaryDataSource, BinaryFn, ScriptType, SixaryDataSource, SixaryFn,
    TernaryDataSource, TernaryFn, UnaryDataSource, UnaryFn,
};
use crate::error::EvalError;

/// Member access builder (`a.member`).
pub trait DotOp: Send + Sync {
    fn build(&self, member: &str, a: &AnyDataSource) -> Option<AnyDataSource>;
}

pub trait UnaryOp: Send + Sync {
    fn build(&self, op: &str, a: &AnyDataSource) -> Option<AnyDataSource>;
}

pub trait BinaryOp: Send + Sync {
    fn build(&self, op: &str, a: &AnyDataSource, b: &AnyDataSource) -> Option<AnyDataSource>;
}

pub trait TernaryOp: Send + Sync {
    fn build(
        &self,
        op: &str,
        a: &AnyDataSource,
        b: &AnyDataSource,
        c: &AnyDataSource,
    ) -> Option<AnyDataSource>;
}

pub trait SixaryOp: Send + Sync {
    fn build(&self, op: &str, operands: &[AnyDataSource; 6]) -> Option<AnyDataSource>;
}

/// Fixed operator arities. There is no generic n-ary path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    Dot,
    Unary,
    Binary,
    Ternary,
    Sixary,
}

impl Arity {
    pub fn operand_count(&self) -> usize {
        match self {
            Arity::Dot | Arity::Unary => 1,
            Arity::Binary => 2,
            Arity::Ternary => 3,
            Arity::Sixary => 6,
        }
    }

    /// Arity of a symbolic operator applied to `count` operands.
    pub fn for_operands(count: usize) -> Option<Arity> {
        match count {
            1 => Some(Arity::Unary),
            2 => Some(Arity::Binary),
            3 => Some(Arity::Ternary),
            6 => Some(Arity::Sixary),
            _ => None,
        }
    }
}

/// A registered builder, tagged with its arity.
pub enum Operator {
    Dot(Box<dyn DotOp>),
    Unary(Box<dyn UnaryOp>),
    Binary(Box<dyn BinaryOp>),
    Ternary(Box<dyn TernaryOp>),
    Sixary(Box<dyn SixaryOp>),
}

impl Operator {
    pub fn arity(&self) -> Arity {
        match self {
            Operator::Dot(_) => Arity::Dot,
            Operator::Unary(_) => Arity::Unary,
            Operator::Binary(_) => Arity::Binary,
            Operator::Ternary(_) => Arity::Ternary,
            Operator::Sixary(_) => Arity::Sixary,
        }
    }

    pub fn unary<A, R, F>(token: &str, func: F) -> Self
    where
        A: ScriptType,
        R: ScriptType,
        F: Fn(A) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Operator::Unary(Box::new(UnaryOperator::new(token, func)))
    }

    pub fn binary<A, B, R, F>(token: &str, func: F) -> Self
    where
        A: ScriptType,
        B: ScriptType,
        R: ScriptType,
        F: Fn(A, B) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Operator::Binary(Box::new(BinaryOperator::new(token, func)))
    }

    pub fn ternary<A, B, C, R, F>(token: &str, func: F) -> Self
    where
        A: ScriptType,
        B: ScriptType,
        C: ScriptType,
        R: ScriptType,
        F: Fn(A, B, C) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Operator::Ternary(Box::new(TernaryOperator::new(token, func)))
    }

    pub fn sixary<A, R, F>(token: &str, func: F) -> Self
    where
        A: ScriptType,
        R: ScriptType,
        F: Fn([A; 6]) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Operator::Sixary(Box::new(SixaryOperator::new(token, func)))
    }

    pub fn dot<A, R, F>(member: &str, func: F) -> Self
    where
        A: ScriptType,
        R: ScriptType,
        F: Fn(A) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Operator::Dot(Box::new(DotOperator::new(member, func)))
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Operator").field(&self.arity()).finish()
    }
}

/// Typed one-operand builder.
pub struct UnaryOperator<A, R> {
    token: String,
    func: UnaryFn<A, R>,
}

impl<A: ScriptType, R: ScriptType> UnaryOperator<A, R> {
    pub fn new<F>(token: &str, func: F) -> Self
    where
        F: Fn(A) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Self {
            token: token.to_owned(),
            func: Arc::new(func),
        }
    }
}

impl<A: ScriptType, R: ScriptType> UnaryOp for UnaryOperator<A, R> {
    fn build(&self, op: &str, a: &AnyDataSource) -> Option<AnyDataSource> {
        if op != self.token {
            return None;
        }
        let a = A::downcast(a)?;
        Some(R::upcast(Arc::new(UnaryDataSource::new(self.func.clone(), a))))
    }
}

/// Typed member-access builder.
pub struct DotOperator<A, R> {
    member: String,
    func: UnaryFn<A, R>,
}

impl<A: ScriptType, R: ScriptType> DotOperator<A, R> {
    pub fn new<F>(member: &str, func: F) -> Self
    where
        F: Fn(A) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Self {
            member: member.to_owned(),
            func: Arc::new(func),
        }
    }
}

impl<A: ScriptType, R: ScriptType> DotOp for DotOperator<A, R> {
    fn build(&self, member: &str, a: &AnyDataSource) -> Option<AnyDataSource> {
        if member != self.member {
            return None;
        }
        let a = A::downcast(a)?;
        Some(R::upcast(Arc::new(UnaryDataSource::new(self.func.clone(), a))))
    }
}

pub struct BinaryOperator<A, B, R> {
    token: String,
    func: BinaryFn<A, B, R>,
}

impl<A: ScriptType, B: ScriptType, R: ScriptType> BinaryOperator<A, B, R> {
    pub fn new<F>(token: &str, func: F) -> Self
    where
        F: Fn(A, B) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Self {
            token: token.to_owned(),
            func: Arc::new(func),
        }
    }
}

impl<A: ScriptType, B: ScriptType, R: ScriptType> BinaryOp for BinaryOperator<A, B, R> {
    fn build(&self, op: &str, a: &AnyDataSource, b: &AnyDataSource) -> Option<AnyDataSource> {
        if op != self.token {
            return None;
        }
        let a = A::downcast(a)?;
        let b = B::downcast(b)?;
        Some(R::upcast(Arc::new(BinaryDataSource::new(
            self.func.clone(),
            a,
            b,
        ))))
    }
}

pub struct TernaryOperator<A, B, C, R> {
    token: String,
    func: TernaryFn<A, B, C, R>,
}

impl<A, B, C, R> TernaryOperator<A, B, C, R>
where
    A: ScriptType,
    B: ScriptType,
    C: ScriptType,
    R: ScriptType,
{
    pub fn new<F>(token: &str, func: F) -> Self
    where
        F: Fn(A, B, C) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Self {
            token: token.to_owned(),
            func: Arc::new(func),
        }
    }
}

impl<A, B, C, R> TernaryOp for TernaryOperator<A, B, C, R>
where
    A: ScriptType,
    B: ScriptType,
    C: ScriptType,
    R: ScriptType,
{
    fn build(
        &self,
        op: &str,
        a: &AnyDataSource,
        b: &AnyDataSource,
        c: &AnyDataSource,
    ) -> Option<AnyDataSource> {
        if op != self.token {
            return None;
        }
        let a = A::downcast(a)?;
        let b = B::downcast(b)?;
        let c = C::downcast(c)?;
        Some(R::upcast(Arc::new(TernaryDataSource::new(
            self.func.clone(),
            a,
            b,
            c,
        ))))
    }
}

/// Six operands of one type.
pub struct SixaryOperator<A, R> {
    token: String,
    func: SixaryFn<A, R>,
}

impl<A: ScriptType, R: ScriptType> SixaryOperator<A, R> {
    pub fn new<F>(token: &str, func: F) -> Self
    where
        F: Fn([A; 6]) -> Result<R, EvalError> + Send + Sync + 'static,
    {
        Self {
            token: token.to_owned(),
            func: Arc::new(func),
        }
    }
}

impl<A: ScriptType, R: ScriptType> SixaryOp for SixaryOperator<A, R> {
    fn build(&self, op: &str, operands: &[AnyDataSource; 6]) -> Option<AnyDataSource> {
        if op != self.token {
            return None;
        }
        let [a, b, c, d, e, f] = operands;
        let typed = [
            A::downcast(a)?,
            A::downcast(b)?,
            A::downcast(c)?,
            A::downcast(d)?,
            A::downcast(e)?,
            A::downcast(f)?,
        ];
        Some(R::upcast(Arc::new(SixaryDataSource::new(
            self.func.clone(),
            typed,
        ))))
    }
}

/// Registration phase of the repository.
///
/// Builders are appended per arity; nothing is de-duplicated or replaced.
/// `build` freezes the lists, after which the repository is read-only.
#[derive(Default)]
pub struct OperatorRepositoryBuilder {
    dot: Vec<Box<dyn DotOp>>,
    unary: Vec<Box<dyn UnaryOp>>,
    binary: Vec<Box<dyn BinaryOp>>,
    ternary: Vec<Box<dyn TernaryOp>>,
    sixary: Vec<Box<dyn SixaryOp>>,
}

impl OperatorRepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-loaded with the built-in operator set.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        builtin::register(&mut builder);
        builder
    }

    pub fn add(&mut self, operator: Operator) -> &mut Self {
        match operator {
            Operator::Dot(op) => self.dot.push(op),
            Operator::Unary(op) => self.unary.push(op),
            Operator::Binary(op) => self.binary.push(op),
            Operator::Ternary(op) => self.ternary.push(op),
            Operator::Sixary(op) => self.sixary.push(op),
        }
        self
    }

    pub fn build(self) -> Arc<OperatorRepository> {
        let repository = OperatorRepository {
            dot: self.dot,
            unary: self.unary,
            binary: self.binary,
            ternary: self.ternary,
            sixary: self.sixary,
        };
        debug!(
            dot = repository.dot.len(),
            unary = repository.unary.len(),
            binary = repository.binary.len(),
            ternary = repository.ternary.len(),
            sixary = repository.sixary.len(),
            "operator repository sealed"
        );
        Arc::new(repository)
    }
}

static GLOBAL: Lazy<Arc<OperatorRepository>> =
    Lazy::new(|| OperatorRepositoryBuilder::with_builtins().build());

/// Immutable registry resolving operator tokens to composed data sources.
pub struct OperatorRepository {
    dot: Vec<Box<dyn DotOp>>,
    unary: Vec<Box<dyn UnaryOp>>,
    binary: Vec<Box<dyn BinaryOp>>,
    ternary: Vec<Box<dyn TernaryOp>>,
    sixary: Vec<Box<dyn SixaryOp>>,
}

impl OperatorRepository {
    /// Process-wide repository holding the built-in operators, built on first use.
    pub fn global() -> Arc<OperatorRepository> {
        GLOBAL.clone()
    }

    pub fn apply_dot(&self, member: &str, a: &AnyDataSource) -> Option<AnyDataSource> {
        self.dot.iter().find_map(|op| op.build(member, a))
    }

    pub fn apply_unary(&self, op: &str, a: &AnyDataSource) -> Option<AnyDataSource> {
        self.unary.iter().find_map(|builder| builder.build(op, a))
    }

    pub fn apply_binary(
        &self,
        op: &str,
        a: &AnyDataSource,
        b: &AnyDataSource,
    ) -> Option<AnyDataSource> {
        self.binary.iter().find_map(|builder| builder.build(op, a, b))
    }

    pub fn apply_ternary(
        &self,
        op: &str,
        a: &AnyDataSource,
        b: &AnyDataSource,
        c: &AnyDataSource,
    ) -> Option<AnyDataSource> {
        self.ternary
            .iter()
            .find_map(|builder| builder.build(op, a, b, c))
    }

    pub fn apply_sixary(&self, op: &str, operands: &[AnyDataSource; 6]) -> Option<AnyDataSource> {
        self.sixary
            .iter()
            .find_map(|builder| builder.build(op, operands))
    }

    /// Arity-generic entry point. `None` when no builder claims the token or
    /// the operand count does not match the arity.
    pub fn apply(
        &self,
        arity: Arity,
        token: &str,
        operands: &[AnyDataSource],
    ) -> Option<AnyDataSource> {
        match (arity, operands) {
            (Arity::Dot, [a]) => self.apply_dot(token, a),
            (Arity::Unary, [a]) => self.apply_unary(token, a),
            (Arity::Binary, [a, b]) => self.apply_binary(token, a, b),
            (Arity::Ternary, [a, b, c]) => self.apply_ternary(token, a, b, c),
            (Arity::Sixary, [a, b, c, d, e, f]) => self.apply_sixary(
                token,
                &[
                    a.clone(),
                    b.clone(),
                    c.clone(),
                    d.clone(),
                    e.clone(),
                    f.clone(),
                ],
            ),
            _ => None,
        }
    }

    /// Number of builders registered for `arity`.
    pub fn len(&self, arity: Arity) -> usize {
        match arity {
            Arity::Dot => self.dot.len(),
            Arity::Unary => self.unary.len(),
            Arity::Binary => self.binary.len(),
            Arity::Ternary => self.ternary.len(),
            Arity::Sixary => self.sixary.len(),
        }
    }
}

impl fmt::Debug for OperatorRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRepository")
            .field("dot", &self.dot.len())
            .field("unary", &self.unary.len())
            .field("binary", &self.binary.len())
            .field("ternary", &self.ternary.len())
            .field("sixary", &self.sixary.len())
            .finish()
    }
}
