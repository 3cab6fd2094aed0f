use std::sync::Arc;

use super::*;
use crate::functions::AggregateFunction;
use crate::registry::FunctionRegistry;
use crate::wire;

struct Sum;

impl AggregateFunction for Sum {
    type Input = i64;
    type Element = i64;
    type Acc = i64;

    fn seed(&self) -> i64 {
        0
    }
    fn prepare(&self, input: i64) -> anyhow::Result<Vec<i64>> {
        Ok(vec![input])
    }
    fn reduce(&self, elements: Vec<i64>, acc: i64) -> anyhow::Result<i64> {
        Ok(elements.into_iter().sum::<i64>() + acc)
    }
    fn combine(&self, partial: i64, acc: i64) -> anyhow::Result<i64> {
        Ok(partial + acc)
    }
}

fn opened_sum_partial() -> PartialAggregator {
    let mut registry = FunctionRegistry::new();
    registry.module("math").function("sum", Sum);
    let mut resolver = FunctionResolver::new(Arc::new(registry));

    let mut partial = PartialAggregator::new(FunctionRef::new("math", "sum"), "value");
    partial.open(&mut resolver).unwrap();
    partial
}

fn payload(v: i64) -> WireValue {
    WireValue::Payload(wire::encode(&v).unwrap())
}

fn decode_payload(value: &WireValue) -> i64 {
    wire::decode(value.payload().expect("expected a payload")).unwrap()
}

#[test]
fn test_sum_group() {
    // Scenario A, map side: seed=0, values [1,2,3] -> Payload(encode(6)).
    let mut partial = opened_sum_partial();

    partial.start_group().unwrap();
    for v in [1, 2, 3] {
        partial.fold_one(&payload(v)).unwrap();
    }
    let out = partial.finish_group().unwrap();

    assert_eq!(decode_payload(&out), 6);
}

#[test]
fn test_empty_group_emits_sentinel() {
    // Scenario B, map side: zero values -> Sentinel, never Payload(0).
    let mut partial = opened_sum_partial();

    partial.start_group().unwrap();
    let out = partial.finish_group().unwrap();

    assert_eq!(out, WireValue::Sentinel);
}

#[test]
fn test_sentinel_input_passes_through() {
    // A re-folded empty upstream partial must not count as a contribution.
    let mut partial = opened_sum_partial();

    partial.start_group().unwrap();
    partial.fold_one(&WireValue::Sentinel).unwrap();
    partial.fold_one(&WireValue::Sentinel).unwrap();
    let out = partial.finish_group().unwrap();

    assert_eq!(out, WireValue::Sentinel);
}

#[test]
fn test_sentinel_then_real_value() {
    let mut partial = opened_sum_partial();

    partial.start_group().unwrap();
    partial.fold_one(&WireValue::Sentinel).unwrap();
    partial.fold_one(&payload(5)).unwrap();
    let out = partial.finish_group().unwrap();

    assert_eq!(decode_payload(&out), 5);
}

#[test]
fn test_groups_are_isolated() {
    // Seed isolation: nothing from a closed group reaches the next one.
    let mut partial = opened_sum_partial();

    partial.start_group().unwrap();
    partial.fold_one(&payload(100)).unwrap();
    partial.finish_group().unwrap();

    partial.start_group().unwrap();
    let out = partial.finish_group().unwrap();
    assert_eq!(out, WireValue::Sentinel);

    partial.start_group().unwrap();
    partial.fold_one(&payload(1)).unwrap();
    let out = partial.finish_group().unwrap();
    assert_eq!(decode_payload(&out), 1);
}

#[test]
fn test_fold_without_start_is_lifecycle_error() {
    let mut partial = opened_sum_partial();

    let err = partial.fold_one(&payload(1)).unwrap_err();
    assert!(matches!(err, AggregateError::Lifecycle(_)));
}

#[test]
fn test_finish_without_start_is_lifecycle_error() {
    let mut partial = opened_sum_partial();

    let err = partial.finish_group().unwrap_err();
    assert!(matches!(err, AggregateError::Lifecycle(_)));
}

#[test]
fn test_fold_after_finish_is_lifecycle_error() {
    // The context is destroyed at group close; it must not be reachable
    // until the next start_group.
    let mut partial = opened_sum_partial();

    partial.start_group().unwrap();
    partial.finish_group().unwrap();

    let err = partial.fold_one(&payload(1)).unwrap_err();
    assert!(matches!(err, AggregateError::Lifecycle(_)));
}

#[test]
fn test_start_without_open_is_lifecycle_error() {
    let mut partial = PartialAggregator::new(FunctionRef::new("math", "sum"), "value");

    let err = partial.start_group().unwrap_err();
    assert!(matches!(err, AggregateError::Lifecycle(_)));
}

#[test]
fn test_output_field_naming() {
    let partial = PartialAggregator::new(FunctionRef::new("math", "sum"), "value");
    assert_eq!(partial.output_field(), "agg_resultvalue");
}
