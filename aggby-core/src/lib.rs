//! # aggby-core
//!
//! A combinable-aggregation protocol for distributed group-by pipelines:
//! partial aggregation runs close to the data source (pre-shuffle) and the
//! partial results are merged later (post-shuffle), reducing data volume
//! without changing the final per-group result.
//!
//! - [`wire`] — [`WireValue`](wire::WireValue) (`Sentinel | Payload`) and
//!   the accumulator codec.
//! - [`functions`] — the user [`AggregateFunction`](functions::AggregateFunction)
//!   trait (seed / prepare / reduce / combine), [`FunctionRef`](functions::FunctionRef),
//!   and the type-erased [`FunctionHandle`](functions::FunctionHandle).
//! - [`registry`] — [`FunctionRegistry`](registry::FunctionRegistry) and the
//!   per-task [`FunctionResolver`](registry::FunctionResolver).
//! - [`partial`] — map-side [`PartialAggregator`](partial::PartialAggregator).
//! - [`merge`] — merge-side [`FinalAggregator`](merge::FinalAggregator).
//! - [`assembly`] — [`AggregateAssembly`](assembly::AggregateAssembly):
//!   N independent (partial, final) pairs under a shared group key.
//! - [`error`] — [`AggregateError`](error::AggregateError) taxonomy.
//!
//! The host pipeline engine, the tuple container format, and key routing
//! are external: the core is a synchronous call-and-response state machine
//! driven entirely by the host, which must deliver each group's tuples
//! contiguously (`start_group` → folds → close).

pub mod assembly;
pub mod error;
pub mod functions;
pub mod merge;
pub mod partial;
pub mod registry;
pub mod wire;
