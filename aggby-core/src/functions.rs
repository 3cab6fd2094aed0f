//! User aggregate functions and their resolved, type-erased handles.
//!
//! User logic implements the typed [`AggregateFunction`] trait. The
//! protocol itself never sees the concrete accumulator type: aggregators
//! work against the object-safe [`FunctionHandle`], obtained from the
//! registry, which bridges the typed world to the byte-oriented wire via
//! the codec in [`wire`](crate::wire).

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AggregateError, Result};
use crate::wire;

/// Trait bound for values that cross the combiner's byte-oriented wire:
/// raw input payloads and accumulators.
pub trait AggData: Serialize + DeserializeOwned + Send + 'static {}

// Blanket implementation: any type satisfying the bounds is AggData.
impl<T> AggData for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Reference to user aggregate logic: an opaque (module, symbol) pair.
///
/// Serializable so it can ride in job plans; resolved once per task into a
/// [`FunctionHandle`] by the
/// [`FunctionResolver`](crate::registry::FunctionResolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: String,
    pub symbol: String,
}

impl FunctionRef {
    /// Create a new function reference.
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.module, self.symbol)
    }
}

/// A user-defined combinable aggregate.
///
/// # Contract
///
/// `reduce` and `combine` must be associative and commutative over the
/// accumulator domain. The protocol cannot detect a violation: a
/// non-associative function silently produces a result that differs from
/// direct single-group aggregation, with no error raised.
///
/// `seed` returns the identity accumulator for a fresh group. Note that
/// the identity is a *real* value (0 for sum, empty for a set union);
/// "no contribution yet" is tracked separately by the protocol via the
/// [`WireValue::Sentinel`](crate::wire::WireValue) marker.
pub trait AggregateFunction: Send + Sync {
    /// Raw input value type, decoded from the incoming tuple payload.
    type Input: AggData;
    /// Element type produced by `prepare`.
    type Element: Send;
    /// Accumulator type. Must round-trip exactly through the wire codec.
    type Acc: AggData;

    /// Identity/zero accumulator for a fresh group.
    fn seed(&self) -> Self::Acc;

    /// Expand one raw input value into the elements to fold.
    fn prepare(&self, input: Self::Input) -> anyhow::Result<Vec<Self::Element>>;

    /// Fold prepared elements into the running accumulator (map side).
    fn reduce(&self, elements: Vec<Self::Element>, acc: Self::Acc) -> anyhow::Result<Self::Acc>;

    /// Merge a partial accumulator into the running accumulator
    /// (merge side).
    fn combine(&self, partial: Self::Acc, acc: Self::Acc) -> anyhow::Result<Self::Acc>;
}

// --- Type-erased accumulator for the protocol core ---

/// Opaque per-group accumulator state.
///
/// Semantically owned by exactly one (group key, output field) pair while
/// that group is open. The protocol never inspects it; it only passes it
/// through [`FunctionHandle`] operations.
pub struct Accumulator(Option<Box<dyn Any + Send>>);

impl Accumulator {
    /// Wrap a concrete accumulator value.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    /// Take the concrete value out, leaving the box empty.
    fn take<T: 'static>(&mut self) -> Result<T> {
        let boxed = self
            .0
            .take()
            .ok_or_else(|| AggregateError::Lifecycle("accumulator already consumed".into()))?;
        boxed.downcast::<T>().map(|b| *b).map_err(|_| {
            AggregateError::Lifecycle("accumulator type does not match its function".into())
        })
    }

    /// Borrow the concrete value.
    fn get<T: 'static>(&self) -> Result<&T> {
        self.0
            .as_ref()
            .and_then(|b| b.downcast_ref())
            .ok_or_else(|| {
                AggregateError::Lifecycle("accumulator type does not match its function".into())
            })
    }

    fn put<T: Send + 'static>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Accumulator(<opaque>)")
    }
}

/// Resolved, callable capability over one user aggregate.
///
/// One handle per task instance, read-only after resolution, reused freely
/// across that task's sequential groups. Object-safe so assemblies can mix
/// aggregates with different accumulator types.
pub trait FunctionHandle: Send + Sync {
    /// Identity accumulator for a fresh group.
    fn seed(&self) -> Accumulator;

    /// Decode a raw input payload, prepare it, and fold the resulting
    /// elements into the accumulator.
    fn reduce_payload(&self, acc: &mut Accumulator, payload: &[u8]) -> Result<()>;

    /// Decode a serialized partial accumulator and merge it into the
    /// accumulator.
    fn combine_payload(&self, acc: &mut Accumulator, payload: &[u8]) -> Result<()>;

    /// Encode the accumulator into its wire payload.
    fn encode_acc(&self, acc: &Accumulator) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn FunctionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FunctionHandle")
    }
}

/// Adapter giving any typed [`AggregateFunction`] the erased wire-level
/// [`FunctionHandle`] interface.
pub struct ErasedFunction<F>(F);

impl<F> ErasedFunction<F> {
    /// Wrap a typed aggregate function.
    pub fn new(func: F) -> Self {
        Self(func)
    }
}

impl<F: AggregateFunction> FunctionHandle for ErasedFunction<F> {
    fn seed(&self) -> Accumulator {
        Accumulator::new(self.0.seed())
    }

    fn reduce_payload(&self, acc: &mut Accumulator, payload: &[u8]) -> Result<()> {
        let input: F::Input = wire::decode(payload)?;
        let elements = self
            .0
            .prepare(input)
            .map_err(|source| AggregateError::UserFunction {
                phase: "prepare",
                source,
            })?;
        let current = acc.take::<F::Acc>()?;
        let next = self
            .0
            .reduce(elements, current)
            .map_err(|source| AggregateError::UserFunction {
                phase: "reduce",
                source,
            })?;
        acc.put(next);
        Ok(())
    }

    fn combine_payload(&self, acc: &mut Accumulator, payload: &[u8]) -> Result<()> {
        let partial: F::Acc = wire::decode(payload)?;
        let current = acc.take::<F::Acc>()?;
        let next = self
            .0
            .combine(partial, current)
            .map_err(|source| AggregateError::UserFunction {
                phase: "combine",
                source,
            })?;
        acc.put(next);
        Ok(())
    }

    fn encode_acc(&self, acc: &Accumulator) -> Result<Vec<u8>> {
        wire::encode(acc.get::<F::Acc>()?)
    }
}
