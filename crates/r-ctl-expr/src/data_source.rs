//! ---
//! rctl_section: "02-expression-graph"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Data source graph and operator resolution."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Shared, lazily evaluated expression nodes.
//!
//! Every node reports a monotonically increasing `version`. Composed nodes
//! cache their last result together with the version observed on their
//! inputs and recompute only when that version moved, which keeps repeated
//! reads inside one cycle free of recomputation without needing back
//! references from operands to their consumers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::EvalError;
use crate::value::{Frame, TypeTag, Value, Vector};

/// A node producing a value of type `T` on evaluation.
pub trait DataSource<T>: Send + Sync {
    /// Current value; recomputed from operands only when stale.
    fn evaluate(&self) -> Result<T, EvalError>;

    /// Mark the node stale. Composed nodes forward this to their operands.
    fn invalidate(&self);

    /// Changes whenever the value this node would produce may have changed.
    fn version(&self) -> u64;
}

/// Shared handle to a typed data source.
pub type Ds<T> = Arc<dyn DataSource<T>>;

/// Rust types that can flow through the graph.
pub trait ScriptType: Clone + Send + Sync + 'static {
    const TAG: TypeTag;

    /// Typed view of a type-erased source, `None` on tag mismatch.
    fn downcast(source: &AnyDataSource) -> Option<Ds<Self>>;

    fn upcast(source: Ds<Self>) -> AnyDataSource;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! script_types {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl ScriptType for $ty {
                const TAG: TypeTag = TypeTag::$variant;

                fn downcast(source: &AnyDataSource) -> Option<Ds<Self>> {
                    match source {
                        AnyDataSource::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }

                fn upcast(source: Ds<Self>) -> AnyDataSource {
                    AnyDataSource::$variant(source)
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )+

        /// Type-erased data source tagged with its runtime type.
        #[derive(Clone)]
        pub enum AnyDataSource {
            $($variant(Ds<$ty>),)+
        }

        impl AnyDataSource {
            pub fn tag(&self) -> TypeTag {
                match self {
                    $(AnyDataSource::$variant(_) => TypeTag::$variant,)+
                }
            }

            /// Evaluate and wrap the result in a [`Value`].
            pub fn evaluate_value(&self) -> Result<Value, EvalError> {
                match self {
                    $(AnyDataSource::$variant(source) => source.evaluate().map(Value::$variant),)+
                }
            }

            pub fn invalidate(&self) {
                match self {
                    $(AnyDataSource::$variant(source) => source.invalidate(),)+
                }
            }

            pub fn version(&self) -> u64 {
                match self {
                    $(AnyDataSource::$variant(source) => source.version(),)+
                }
            }

            /// Wrap a literal in a constant node.
            pub fn constant(value: Value) -> Self {
                match value {
                    $(Value::$variant(inner) => {
                        AnyDataSource::$variant(Arc::new(ConstantDataSource::new(inner)))
                    })+
                }
            }

            /// Whether both handles point at the same node.
            pub fn same_node(&self, other: &AnyDataSource) -> bool {
                match (self, other) {
                    $((AnyDataSource::$variant(a), AnyDataSource::$variant(b)) => {
                        std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
                    })+
                    _ => false,
                }
            }
        }

        /// Type-erased writable variable.
        #[derive(Clone)]
        pub enum AnyVariable {
            $($variant(Arc<ValueDataSource<$ty>>),)+
        }

        impl AnyVariable {
            pub fn new(value: Value) -> Self {
                match value {
                    $(Value::$variant(inner) => {
                        AnyVariable::$variant(Arc::new(ValueDataSource::new(inner)))
                    })+
                }
            }

            pub fn tag(&self) -> TypeTag {
                match self {
                    $(AnyVariable::$variant(_) => TypeTag::$variant,)+
                }
            }

            /// Read-only view for composing expressions.
            pub fn source(&self) -> AnyDataSource {
                match self {
                    $(AnyVariable::$variant(var) => {
                        AnyDataSource::$variant(var.clone() as Ds<$ty>)
                    })+
                }
            }

            pub fn get(&self) -> Value {
                match self {
                    $(AnyVariable::$variant(var) => Value::$variant(var.get()),)+
                }
            }

            /// Store `value`, rejecting a value of another type.
            pub fn set(&self, value: Value) -> Result<(), TypeTag> {
                match (self, value) {
                    $((AnyVariable::$variant(var), Value::$variant(inner)) => {
                        var.set(inner);
                        Ok(())
                    })+
                    (_, other) => Err(other.tag()),
                }
            }
        }
    };
}

script_types! {
    bool => Bool,
    char => Char,
    i64 => Int,
    u64 => UInt,
    f64 => Double,
    String => String,
    Vector => Vector,
    Frame => Frame,
}

impl fmt::Debug for AnyDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyDataSource")
            .field("tag", &self.tag())
            .field("version", &self.version())
            .finish()
    }
}

impl fmt::Debug for AnyVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyVariable")
            .field("value", &self.get())
            .finish()
    }
}

/// Literal node; never stale.
#[derive(Debug)]
pub struct ConstantDataSource<T> {
    value: T,
}

impl<T> ConstantDataSource<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone + Send + Sync> DataSource<T> for ConstantDataSource<T> {
    fn evaluate(&self) -> Result<T, EvalError> {
        Ok(self.value.clone())
    }

    fn invalidate(&self) {}

    fn version(&self) -> u64 {
        0
    }
}

/// Settable variable node.
#[derive(Debug)]
pub struct ValueDataSource<T> {
    value: RwLock<T>,
    version: AtomicU64,
}

impl<T: Clone> ValueDataSource<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            version: AtomicU64::new(1),
        }
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T: Clone + Send + Sync> DataSource<T> for ValueDataSource<T> {
    fn evaluate(&self) -> Result<T, EvalError> {
        Ok(self.get())
    }

    fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

type Sampler<T> = Box<dyn Fn() -> Result<T, EvalError> + Send + Sync>;

/// Node sampling an external input.
///
/// The sample is taken on first evaluation and reused until `invalidate`.
pub struct SampledDataSource<T> {
    sampler: Sampler<T>,
    sample: Mutex<Option<Result<T, EvalError>>>,
    version: AtomicU64,
}

impl<T> SampledDataSource<T> {
    pub fn new<F>(sampler: F) -> Self
    where
        F: Fn() -> Result<T, EvalError> + Send + Sync + 'static,
    {
        Self {
            sampler: Box::new(sampler),
            sample: Mutex::new(None),
            version: AtomicU64::new(1),
        }
    }
}

impl<T: Clone + Send + Sync> DataSource<T> for SampledDataSource<T> {
    fn evaluate(&self) -> Result<T, EvalError> {
        let mut sample = self.sample.lock();
        if let Some(cached) = sample.as_ref() {
            return cached.clone();
        }
        let fresh = (self.sampler)();
        *sample = Some(fresh.clone());
        fresh
    }

    fn invalidate(&self) {
        *self.sample.lock() = None;
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Result cache shared by the composed nodes.
struct EvalCache<T> {
    slot: Mutex<Option<(u64, Result<T, EvalError>)>>,
    epoch: AtomicU64,
}

impl<T: Clone> EvalCache<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn get_or_compute(
        &self,
        key: u64,
        compute: impl FnOnce() -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if let Some((cached_key, cached)) = self.slot.lock().as_ref() {
            if *cached_key == key {
                return cached.clone();
            }
        }
        // Operands are evaluated without holding our own slot.
        let fresh = compute();
        *self.slot.lock() = Some((key, fresh.clone()));
        fresh
    }
}

pub(crate) type UnaryFn<A, R> = Arc<dyn Fn(A) -> Result<R, EvalError> + Send + Sync>;
pub(crate) type BinaryFn<A, B, R> = Arc<dyn Fn(A, B) -> Result<R, EvalError> + Send + Sync>;
pub(crate) type TernaryFn<A, B, C, R> =
    Arc<dyn Fn(A, B, C) -> Result<R, EvalError> + Send + Sync>;
pub(crate) type SixaryFn<A, R> = Arc<dyn Fn([A; 6]) -> Result<R, EvalError> + Send + Sync>;

/// One-operand composed node; also backs member access.
pub struct UnaryDataSource<A, R> {
    op: UnaryFn<A, R>,
    a: Ds<A>,
    cache: EvalCache<R>,
}

impl<A, R: Clone> UnaryDataSource<A, R> {
    pub(crate) fn new(op: UnaryFn<A, R>, a: Ds<A>) -> Self {
        Self {
            op,
            a,
            cache: EvalCache::new(),
        }
    }
}

impl<A: ScriptType, R: ScriptType> DataSource<R> for UnaryDataSource<A, R> {
    fn evaluate(&self) -> Result<R, EvalError> {
        self.cache
            .get_or_compute(self.version(), || (self.op)(self.a.evaluate()?))
    }

    fn invalidate(&self) {
        self.cache.bump();
        self.a.invalidate();
    }

    fn version(&self) -> u64 {
        self.cache.epoch().wrapping_add(self.a.version())
    }
}

pub struct BinaryDataSource<A, B, R> {
    op: BinaryFn<A, B, R>,
    a: Ds<A>,
    b: Ds<B>,
    cache: EvalCache<R>,
}

impl<A, B, R: Clone> BinaryDataSource<A, B, R> {
    pub(crate) fn new(op: BinaryFn<A, B, R>, a: Ds<A>, b: Ds<B>) -> Self {
        Self {
            op,
            a,
            b,
            cache: EvalCache::new(),
        }
    }
}

impl<A: ScriptType, B: ScriptType, R: ScriptType> DataSource<R> for BinaryDataSource<A, B, R> {
    fn evaluate(&self) -> Result<R, EvalError> {
        self.cache.get_or_compute(self.version(), || {
            let a = self.a.evaluate()?;
            let b = self.b.evaluate()?;
            (self.op)(a, b)
        })
    }

    fn invalidate(&self) {
        self.cache.bump();
        self.a.invalidate();
        self.b.invalidate();
    }

    fn version(&self) -> u64 {
        self.cache
            .epoch()
            .wrapping_add(self.a.version())
            .wrapping_add(self.b.version())
    }
}

pub struct TernaryDataSource<A, B, C, R> {
    op: TernaryFn<A, B, C, R>,
    a: Ds<A>,
    b: Ds<B>,
    c: Ds<C>,
    cache: EvalCache<R>,
}

impl<A, B, C, R: Clone> TernaryDataSource<A, B, C, R> {
    pub(crate) fn new(op: TernaryFn<A, B, C, R>, a: Ds<A>, b: Ds<B>, c: Ds<C>) -> Self {
        Self {
            op,
            a,
            b,
            c,
            cache: EvalCache::new(),
        }
    }
}

impl<A, B, C, R> DataSource<R> for TernaryDataSource<A, B, C, R>
where
    A: ScriptType,
    B: ScriptType,
    C: ScriptType,
    R: ScriptType,
{
    fn evaluate(&self) -> Result<R, EvalError> {
        self.cache.get_or_compute(self.version(), || {
            let a = self.a.evaluate()?;
            let b = self.b.evaluate()?;
            let c = self.c.evaluate()?;
            (self.op)(a, b, c)
        })
    }

    fn invalidate(&self) {
        self.cache.bump();
        self.a.invalidate();
        self.b.invalidate();
        self.c.invalidate();
    }

    fn version(&self) -> u64 {
        self.cache
            .epoch()
            .wrapping_add(self.a.version())
            .wrapping_add(self.b.version())
            .wrapping_add(self.c.version())
    }
}

/// Six homogeneous operands, e.g. the components of a frame.
pub struct SixaryDataSource<A, R> {
    op: SixaryFn<A, R>,
    operands: [Ds<A>; 6],
    cache: EvalCache<R>,
}

impl<A, R: Clone> SixaryDataSource<A, R> {
    pub(crate) fn new(op: SixaryFn<A, R>, operands: [Ds<A>; 6]) -> Self {
        Self {
            op,
            operands,
            cache: EvalCache::new(),
        }
    }
}

impl<A: ScriptType, R: ScriptType> DataSource<R> for SixaryDataSource<A, R> {
    fn evaluate(&self) -> Result<R, EvalError> {
        self.cache.get_or_compute(self.version(), || {
            let [a, b, c, d, e, f] = &self.operands;
            let values = [
                a.evaluate()?,
                b.evaluate()?,
                c.evaluate()?,
                d.evaluate()?,
                e.evaluate()?,
                f.evaluate()?,
            ];
            (self.op)(values)
        })
    }

    fn invalidate(&self) {
        self.cache.bump();
        for operand in &self.operands {
            operand.invalidate();
        }
    }

    fn version(&self) -> u64 {
        self.operands
            .iter()
            .fold(self.cache.epoch(), |acc, operand| {
                acc.wrapping_add(operand.version())
            })
    }
}

/// `cond ? then : otherwise`; only the selected branch is evaluated.
pub struct ConditionalDataSource<T> {
    condition: Ds<bool>,
    then: Ds<T>,
    otherwise: Ds<T>,
    cache: EvalCache<T>,
}

impl<T: Clone> ConditionalDataSource<T> {
    pub fn new(condition: Ds<bool>, then: Ds<T>, otherwise: Ds<T>) -> Self {
        Self {
            condition,
            then,
            otherwise,
            cache: EvalCache::new(),
        }
    }
}

impl<T: ScriptType> DataSource<T> for ConditionalDataSource<T> {
    fn evaluate(&self) -> Result<T, EvalError> {
        self.cache.get_or_compute(self.version(), || {
            if self.condition.evaluate()? {
                self.then.evaluate()
            } else {
                self.otherwise.evaluate()
            }
        })
    }

    fn invalidate(&self) {
        self.cache.bump();
        self.condition.invalidate();
        self.then.invalidate();
        self.otherwise.invalidate();
    }

    fn version(&self) -> u64 {
        self.cache
            .epoch()
            .wrapping_add(self.condition.version())
            .wrapping_add(self.then.version())
            .wrapping_add(self.otherwise.version())
    }
}
