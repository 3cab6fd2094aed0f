//! Composing independent (partial, final) pairs under a shared group key.

use std::hash::{Hash, Hasher};

use ahash::AHasher;

use crate::error::{AggregateError, Result};
use crate::functions::FunctionRef;
use crate::merge::FinalAggregator;
use crate::partial::PartialAggregator;

/// Fixed prefix prepended to the argument field name to derive the output
/// field, applied identically on both sides of the shuffle so the host's
/// schema inference lines up.
pub const OUTPUT_FIELD_PREFIX: &str = "agg_result";

/// Output field name for an argument field.
pub fn declared_output_field(arg_field: &str) -> String {
    format!("{OUTPUT_FIELD_PREFIX}{arg_field}")
}

/// Partition index for a serialized group key.
///
/// Same-key partials must meet in a single final task; hosts that do not
/// bring their own routing can use this.
pub fn partition_for_key(key: &[u8], num_partitions: usize) -> usize {
    let mut hasher = AHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % num_partitions
}

/// One output aggregate: its map-side and merge-side halves.
///
/// The two halves run in different tasks; they share only the output
/// field derivation and the function reference.
#[derive(Debug)]
pub struct AggregatePair {
    pub partial: PartialAggregator,
    pub merge: FinalAggregator,
}

/// A combined aggregation assembly: N independent (partial, final) pairs
/// keyed by a shared group key.
///
/// Pairs share group-boundary events but no mutable state; each output
/// field aggregates on its own.
#[derive(Debug)]
pub struct AggregateAssembly {
    name: String,
    key_field: String,
    pairs: Vec<AggregatePair>,
}

impl AggregateAssembly {
    /// Start building an assembly with the given pipeline name.
    pub fn builder(name: impl Into<String>) -> AssemblyBuilder {
        AssemblyBuilder {
            name: name.into(),
            key_field: None,
            aggregates: Vec::new(),
        }
    }

    /// Pipeline name this assembly was built for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared group key field.
    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// The declared output schema: key field followed by the output field
    /// of each aggregate, in registration order.
    pub fn output_schema(&self) -> Vec<&str> {
        std::iter::once(self.key_field.as_str())
            .chain(self.pairs.iter().map(|p| p.partial.output_field()))
            .collect()
    }

    /// The aggregate pairs, in registration order.
    pub fn pairs(&self) -> &[AggregatePair] {
        &self.pairs
    }

    /// Split the assembly into its map-side and merge-side halves.
    pub fn into_parts(self) -> (Vec<PartialAggregator>, Vec<FinalAggregator>) {
        self.pairs
            .into_iter()
            .map(|pair| (pair.partial, pair.merge))
            .unzip()
    }
}

/// Builder for [`AggregateAssembly`].
#[derive(Debug)]
pub struct AssemblyBuilder {
    name: String,
    key_field: Option<String>,
    aggregates: Vec<(String, FunctionRef)>,
}

impl AssemblyBuilder {
    /// Set the shared group key field.
    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    /// Add one output aggregate: the argument field it reads and the
    /// function reference implementing it.
    pub fn aggregate(mut self, arg_field: impl Into<String>, func_ref: FunctionRef) -> Self {
        self.aggregates.push((arg_field.into(), func_ref));
        self
    }

    /// Validate and build the assembly.
    pub fn build(self) -> Result<AggregateAssembly> {
        let key_field = self
            .key_field
            .ok_or_else(|| AggregateError::Assembly("no group key field set".into()))?;
        if self.aggregates.is_empty() {
            return Err(AggregateError::Assembly(
                "assembly declares no aggregates".into(),
            ));
        }
        for (i, (field, _)) in self.aggregates.iter().enumerate() {
            if self.aggregates[..i].iter().any(|(f, _)| f == field) {
                return Err(AggregateError::Assembly(format!(
                    "duplicate argument field `{field}`"
                )));
            }
        }

        let pairs = self
            .aggregates
            .into_iter()
            .map(|(arg_field, func_ref)| AggregatePair {
                partial: PartialAggregator::new(func_ref.clone(), &arg_field),
                merge: FinalAggregator::new(func_ref, &arg_field),
            })
            .collect();

        Ok(AggregateAssembly {
            name: self.name,
            key_field,
            pairs,
        })
    }
}

#[cfg(test)]
#[path = "tests/assembly_tests.rs"]
mod tests;
