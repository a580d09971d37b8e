//! Structured predicate evaluation for CONDITION steps.
//!
//! Predicates are data, never code: each comparison names a context field by
//! dotted path and a literal to compare against. A missing field makes every
//! comparison false (and `not_equals` true).

use std::cmp::Ordering;

use flowgate_types::workflow::Predicate;
use serde_json::Value;

use super::context::ExecutionContext;

/// Evaluate a predicate against the execution context.
pub fn evaluate(predicate: &Predicate, ctx: &ExecutionContext) -> bool {
    match predicate {
        Predicate::Equals { field, value } => {
            ctx.lookup(field).is_some_and(|actual| values_equal(actual, value))
        }
        Predicate::NotEquals { field, value } => {
            !ctx.lookup(field).is_some_and(|actual| values_equal(actual, value))
        }
        Predicate::GreaterThan { field, value } => {
            compare_field(ctx, field, value).is_some_and(Ordering::is_gt)
        }
        Predicate::GreaterOrEqual { field, value } => {
            compare_field(ctx, field, value).is_some_and(Ordering::is_ge)
        }
        Predicate::LessThan { field, value } => {
            compare_field(ctx, field, value).is_some_and(Ordering::is_lt)
        }
        Predicate::LessOrEqual { field, value } => {
            compare_field(ctx, field, value).is_some_and(Ordering::is_le)
        }
        Predicate::Contains { field, value } => {
            ctx.lookup(field).is_some_and(|actual| contains(actual, value))
        }
        Predicate::Exists { field } => ctx.lookup(field).is_some_and(|v| !v.is_null()),
        Predicate::And { all } => all.iter().all(|p| evaluate(p, ctx)),
        Predicate::Or { any } => any.iter().any(|p| evaluate(p, ctx)),
        Predicate::Not { predicate } => !evaluate(predicate, ctx),
    }
}

/// JSON equality, except numbers compare by value (`1` equals `1.0`).
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn compare_field(ctx: &ExecutionContext, field: &str, expected: &Value) -> Option<Ordering> {
    let actual = ctx.lookup(field)?;
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match (actual, needle) {
        (Value::String(haystack), Value::String(n)) => haystack.contains(n.as_str()),
        (Value::Array(items), n) => items.iter().any(|item| values_equal(item, n)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}
