//! Order-insensitive comparison of result sets.
//!
//! Records are compared through their compact JSON text, with columns in the
//! order the engine printed them. Two rows holding the same columns in a
//! different order are therefore *different* rows. Values are never coerced:
//! `1`, `1.0` and `"1"` are three distinct values.

use itertools::Itertools;
use serde_json::Value;

use super::model::StructuredResult;

/// Canonical form of a result set: the JSON text of every record, sorted.
pub fn canonical(result: &StructuredResult) -> Vec<String> {
    result
        .records()
        .iter()
        .map(|r| r.to_json_string())
        .sorted()
        .collect()
}

/// Whether two result sets hold the same records, ignoring row order.
pub fn compare_results(a: &StructuredResult, b: &StructuredResult) -> bool {
    a.len() == b.len() && canonical(a) == canonical(b)
}

/// Compare two arbitrary captured values.
///
/// Arrays of objects are compared like [`compare_results`]. Anything else
/// (a scalar, an error string, an array of non-objects) falls back to exact
/// equality of the serialized text.
///
/// A [`Value`] keeps only the last of several columns sharing a name, so
/// `{"a":1,"a":2}` already reads as `{"a":2}` here. Judging goes through
/// [`compare_results`], which keeps duplicate columns.
pub fn compare(a: &Value, b: &Value) -> bool {
    match (as_records(a), as_records(b)) {
        (Some(a), Some(b)) => a.len() == b.len() && canonical_values(a) == canonical_values(b),
        _ => to_text(a) == to_text(b),
    }
}

fn as_records(v: &Value) -> Option<&Vec<Value>> {
    v.as_array().filter(|arr| arr.iter().all(Value::is_object))
}

fn canonical_values(records: &[Value]) -> Vec<String> {
    records.iter().map(to_text).sorted().collect()
}

fn to_text(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_default()
}
