//! Merge-side (post-shuffle) final aggregation.

use std::sync::Arc;

use tracing::trace;

use crate::assembly::declared_output_field;
use crate::error::{AggregateError, Result};
use crate::functions::{FunctionHandle, FunctionRef};
use crate::partial::GroupContext;
use crate::registry::FunctionResolver;
use crate::wire::WireValue;

/// Merge-side aggregator: folds one or more partial accumulators for a
/// group into its final value.
///
/// Lifecycle mirrors [`PartialAggregator`](crate::partial::PartialAggregator):
/// `open` once per task, then `start_group` / `fold_one`* /
/// `complete_group` per group. `start_group` is mandatory at every group
/// boundary; skipping it would leak the previous group's accumulator into
/// the next, which is why the context is consumed on completion and folds
/// without an open group are rejected.
pub struct FinalAggregator {
    func_ref: FunctionRef,
    output_field: String,
    handle: Option<Arc<dyn FunctionHandle>>,
    group: Option<GroupContext>,
}

impl FinalAggregator {
    /// Create an aggregator for one output aggregate.
    pub fn new(func_ref: FunctionRef, arg_field: &str) -> Self {
        Self {
            func_ref,
            output_field: declared_output_field(arg_field),
            handle: None,
            group: None,
        }
    }

    /// Output field name, same derivation as the partial side so schemas
    /// line up across the shuffle boundary.
    pub fn output_field(&self) -> &str {
        &self.output_field
    }

    /// Resolve the function handle for this task instance.
    pub fn open(&mut self, resolver: &mut FunctionResolver) -> Result<()> {
        self.handle = Some(resolver.resolve(&self.func_ref)?);
        Ok(())
    }

    fn handle(&self) -> Result<&Arc<dyn FunctionHandle>> {
        self.handle.as_ref().ok_or_else(|| {
            AggregateError::Lifecycle(format!("aggregator for `{}` was not opened", self.func_ref))
        })
    }

    /// Reset to `{seed, all_sentinel}` for a new group.
    pub fn start_group(&mut self) -> Result<()> {
        let seed = self.handle()?.seed();
        self.group = Some(GroupContext {
            acc: seed,
            all_sentinel: true,
        });
        trace!(field = %self.output_field, "final group started");
        Ok(())
    }

    /// Fold one partial wire value into the open group.
    ///
    /// Sentinel partials are a no-op: a group whose map-side saw no real
    /// contribution adds nothing here.
    pub fn fold_one(&mut self, value: &WireValue) -> Result<()> {
        let handle = Arc::clone(self.handle()?);
        let ctx = self.group.as_mut().ok_or_else(|| {
            AggregateError::Lifecycle("fold_one called with no open group".into())
        })?;

        match value {
            WireValue::Sentinel => Ok(()),
            WireValue::Payload(bytes) => {
                handle.combine_payload(&mut ctx.acc, bytes)?;
                ctx.all_sentinel = false;
                Ok(())
            }
        }
    }

    /// Close the open group.
    ///
    /// Returns `None` when every partial was a sentinel: a group with zero
    /// real contributions materializes no output tuple, leaving "missing
    /// group" semantics to the host pipeline.
    pub fn complete_group(&mut self) -> Result<Option<WireValue>> {
        let handle = Arc::clone(self.handle()?);
        let ctx = self.group.take().ok_or_else(|| {
            AggregateError::Lifecycle("complete_group called with no open group".into())
        })?;

        trace!(field = %self.output_field, all_sentinel = ctx.all_sentinel, "final group completed");
        if ctx.all_sentinel {
            Ok(None)
        } else {
            Ok(Some(WireValue::Payload(handle.encode_acc(&ctx.acc)?)))
        }
    }
}

impl std::fmt::Debug for FinalAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalAggregator")
            .field("func_ref", &self.func_ref)
            .field("output_field", &self.output_field)
            .field("opened", &self.handle.is_some())
            .field("group_open", &self.group.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
