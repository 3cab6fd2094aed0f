//! Map-side (pre-shuffle) partial aggregation.

use std::sync::Arc;

use tracing::trace;

use crate::assembly::declared_output_field;
use crate::error::{AggregateError, Result};
use crate::functions::{Accumulator, FunctionHandle, FunctionRef};
use crate::registry::FunctionResolver;
use crate::wire::WireValue;

/// Per-group running state: the opaque accumulator plus the "no real
/// contribution yet" flag.
///
/// Exists for exactly one open group at a time; consumed when the group
/// closes, so stale state cannot leak into the next group.
#[derive(Debug)]
pub(crate) struct GroupContext {
    pub(crate) acc: Accumulator,
    pub(crate) all_sentinel: bool,
}

/// Map-side aggregator: folds each incoming value into a running
/// accumulator for the currently open group, emitting a serialized
/// accumulator (or [`WireValue::Sentinel`]) when the group closes.
///
/// Driven by the host pipeline as a pure call-and-response state machine:
/// `open` once per task, then `start_group` / `fold_one`* / `finish_group`
/// cycles for as long as the task lives. The host must deliver each
/// group's tuples contiguously; folding with no open group is a lifecycle
/// error.
pub struct PartialAggregator {
    func_ref: FunctionRef,
    output_field: String,
    handle: Option<Arc<dyn FunctionHandle>>,
    group: Option<GroupContext>,
}

impl PartialAggregator {
    /// Create an aggregator for one output aggregate.
    ///
    /// Takes all static configuration; resolution happens in [`open`].
    ///
    /// [`open`]: PartialAggregator::open
    pub fn new(func_ref: FunctionRef, arg_field: &str) -> Self {
        Self {
            func_ref,
            output_field: declared_output_field(arg_field),
            handle: None,
            group: None,
        }
    }

    /// Output field name this aggregator declares, used by the host to
    /// wire tuple schemas. Identical on the final side.
    pub fn output_field(&self) -> &str {
        &self.output_field
    }

    /// Resolve the function handle for this task instance.
    ///
    /// Must be called once before any group is started.
    pub fn open(&mut self, resolver: &mut FunctionResolver) -> Result<()> {
        self.handle = Some(resolver.resolve(&self.func_ref)?);
        Ok(())
    }

    fn handle(&self) -> Result<&Arc<dyn FunctionHandle>> {
        self.handle.as_ref().ok_or_else(|| {
            AggregateError::Lifecycle(format!("aggregator for `{}` was not opened", self.func_ref))
        })
    }

    /// Begin a new group: seed the accumulator and mark it untouched.
    ///
    /// Calling this while a group is open discards that group's state;
    /// it is the reset the protocol mandates at every group boundary.
    pub fn start_group(&mut self) -> Result<()> {
        let seed = self.handle()?.seed();
        self.group = Some(GroupContext {
            acc: seed,
            all_sentinel: true,
        });
        trace!(field = %self.output_field, "partial group started");
        Ok(())
    }

    /// Fold one incoming wire value into the open group.
    ///
    /// A [`WireValue::Sentinel`] input leaves the context unchanged: it
    /// appears when an upstream empty partial is re-folded, and must keep
    /// the group's "no contribution" status intact.
    pub fn fold_one(&mut self, value: &WireValue) -> Result<()> {
        let handle = Arc::clone(self.handle()?);
        let ctx = self.group.as_mut().ok_or_else(|| {
            AggregateError::Lifecycle("fold_one called with no open group".into())
        })?;

        match value {
            WireValue::Sentinel => Ok(()),
            WireValue::Payload(bytes) => {
                handle.reduce_payload(&mut ctx.acc, bytes)?;
                ctx.all_sentinel = false;
                Ok(())
            }
        }
    }

    /// Close the open group and emit its wire value.
    ///
    /// Emits [`WireValue::Sentinel`] when the group observed only
    /// sentinel/absent values, so absence propagates across the shuffle
    /// without being mistaken for the user's identity element.
    pub fn finish_group(&mut self) -> Result<WireValue> {
        let handle = Arc::clone(self.handle()?);
        let ctx = self.group.take().ok_or_else(|| {
            AggregateError::Lifecycle("finish_group called with no open group".into())
        })?;

        trace!(field = %self.output_field, all_sentinel = ctx.all_sentinel, "partial group finished");
        if ctx.all_sentinel {
            Ok(WireValue::Sentinel)
        } else {
            Ok(WireValue::Payload(handle.encode_acc(&ctx.acc)?))
        }
    }
}

impl std::fmt::Debug for PartialAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialAggregator")
            .field("func_ref", &self.func_ref)
            .field("output_field", &self.output_field)
            .field("opened", &self.handle.is_some())
            .field("group_open", &self.group.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/partial_tests.rs"]
mod tests;
