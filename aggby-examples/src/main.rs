//! Combinable aggregation demo.
//!
//! Simulates the distributed topology in a single process:
//!
//! ```text
//! Map Task 0 (split 0)        Map Task 1 (split 1)
//!     |                            |
//!     | partial aggregation       | partial aggregation
//!     v                            v
//!   WireValue tuples, hash-partitioned by user_id
//!     |                            |
//!     v                            v
//! Final Task 0                Final Task 1
//!     |                            |
//!     +------------+---------------+
//!                  v
//!            printed results
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use aggby_core::assembly::{partition_for_key, AggregateAssembly};
use aggby_core::functions::{AggregateFunction, FunctionRef};
use aggby_core::registry::{FunctionRegistry, FunctionResolver};
use aggby_core::wire::{self, WireValue};
use anyhow::Result;

/// Sum of i64 values.
struct Sum;

impl AggregateFunction for Sum {
    type Input = i64;
    type Element = i64;
    type Acc = i64;

    fn seed(&self) -> i64 {
        0
    }
    fn prepare(&self, input: i64) -> Result<Vec<i64>> {
        Ok(vec![input])
    }
    fn reduce(&self, elements: Vec<i64>, acc: i64) -> Result<i64> {
        Ok(elements.into_iter().sum::<i64>() + acc)
    }
    fn combine(&self, partial: i64, acc: i64) -> Result<i64> {
        Ok(partial + acc)
    }
}

/// Count of observed values.
struct Count;

impl AggregateFunction for Count {
    type Input = i64;
    type Element = i64;
    type Acc = u64;

    fn seed(&self) -> u64 {
        0
    }
    fn prepare(&self, input: i64) -> Result<Vec<i64>> {
        Ok(vec![input])
    }
    fn reduce(&self, elements: Vec<i64>, acc: u64) -> Result<u64> {
        Ok(acc + elements.len() as u64)
    }
    fn combine(&self, partial: u64, acc: u64) -> Result<u64> {
        Ok(partial + acc)
    }
}

fn build_assembly() -> Result<AggregateAssembly> {
    Ok(AggregateAssembly::builder("user_stats")
        .key_field("user_id")
        .aggregate("value", FunctionRef::new("stats", "sum"))
        .aggregate("events", FunctionRef::new("stats", "count"))
        .build()?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut registry = FunctionRegistry::new();
    registry
        .module("stats")
        .function("sum", Sum)
        .function("count", Count);
    let registry = Arc::new(registry);

    // Test data: (user_id, value), split across two map tasks.
    let data: Vec<(&str, i64)> = vec![
        ("user_1", 10),
        ("user_2", 5),
        ("user_1", 20),
        ("user_3", 7),
        ("user_2", 15),
        ("user_1", 30),
        ("user_3", 3),
        ("user_2", 25),
    ];
    let splits = [&data[..4], &data[4..]];
    let num_partitions = 2;

    let assembly = build_assembly()?;
    println!("assembly `{}` schema: {:?}\n", assembly.name(), assembly.output_schema());
    let num_aggs = assembly.pairs().len();

    // Map stage: per-split partial aggregation, one wire tuple per
    // (key, aggregate), routed to a final task by key hash.
    let mut routed: Vec<Vec<(String, usize, WireValue)>> = vec![Vec::new(); num_partitions];
    for (task_idx, split) in splits.iter().enumerate() {
        let mut resolver = FunctionResolver::new(Arc::clone(&registry));
        let (mut partials, _) = build_assembly()?.into_parts();
        for partial in &mut partials {
            partial.open(&mut resolver)?;
        }

        let mut by_key: HashMap<&str, Vec<i64>> = HashMap::new();
        for (key, value) in *split {
            by_key.entry(*key).or_default().push(*value);
        }

        for (key, values) in by_key {
            for (agg_idx, partial) in partials.iter_mut().enumerate() {
                partial.start_group()?;
                for v in &values {
                    partial.fold_one(&WireValue::Payload(wire::encode(v)?))?;
                }
                let out = partial.finish_group()?;
                let partition = partition_for_key(key.as_bytes(), num_partitions);
                routed[partition].push((key.to_string(), agg_idx, out));
            }
        }
        println!("map task {task_idx}: processed {} tuples", split.len());
    }

    // Merge stage: one final task per partition.
    let mut results: Vec<(String, i64, u64)> = Vec::new();
    for (task_idx, incoming) in routed.into_iter().enumerate() {
        let mut resolver = FunctionResolver::new(Arc::clone(&registry));
        let (_, mut finals) = build_assembly()?.into_parts();
        for merge in &mut finals {
            merge.open(&mut resolver)?;
        }

        let mut by_key: HashMap<String, Vec<(usize, WireValue)>> = HashMap::new();
        for (key, agg_idx, value) in incoming {
            by_key.entry(key).or_default().push((agg_idx, value));
        }
        let num_groups = by_key.len();

        for (key, values) in by_key {
            let mut outputs = vec![None; num_aggs];
            for (agg_idx, merge) in finals.iter_mut().enumerate() {
                merge.start_group()?;
                for (idx, value) in &values {
                    if *idx == agg_idx {
                        merge.fold_one(value)?;
                    }
                }
                outputs[agg_idx] = merge.complete_group()?;
            }
            // Both aggregates saw real data for every key in this demo.
            let sum: i64 = wire::decode(outputs[0].as_ref().expect("sum emitted").payload().expect("payload"))?;
            let count: u64 = wire::decode(outputs[1].as_ref().expect("count emitted").payload().expect("payload"))?;
            results.push((key, sum, count));
        }
        println!("final task {task_idx}: completed {num_groups} groups");
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));
    println!();
    for (user, sum, count) in results {
        println!("{user}: sum={sum} count={count}");
    }

    Ok(())
}
