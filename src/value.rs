/*
Helpers over serde_json::Value that mirror how the document store
compares and equates values, so in-memory evaluation agrees with the
pipeline forms. Missing and null are treated alike throughout.
*/
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

pub type JsonMap = Map<String, Value>;

/// Follows `path` through nested objects. Does not traverse arrays.
pub fn lookup<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(segment.as_ref())?;
    }
    Some(current)
}

/// Missing and null collapse to `None`.
pub fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|x| !x.is_null())
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 8,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
    }
}

/// Total order across all JSON values, ranking types the way the document
/// store does: null < numbers < strings < objects < arrays < booleans.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Like `compare_values` but with missing treated as null.
pub fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    compare_values(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
}

/// Equality with numeric widening, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Equality between a possibly missing document value and a literal.
pub fn optional_equals(value: Option<&Value>, literal: &Value) -> bool {
    values_equal(present(value).unwrap_or(&Value::Null), literal)
}

/// True when ordering comparisons between the two are meaningful:
/// both numbers, both strings or both booleans.
pub fn same_type_class(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

/// Wraps a scalar or a list into a list.
pub fn to_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        x => vec![x.clone()],
    }
}

pub fn number_from_f64(value: f64) -> Option<Value> {
    Number::from_f64(value).map(Value::Number)
}

/// `{ key: value }`
pub fn single(key: impl Into<String>, value: Value) -> Value {
    let mut map = JsonMap::new();
    map.insert(key.into(), value);
    Value::Object(map)
}

/// `{ key: value }` as a map
pub fn single_map(key: impl Into<String>, value: Value) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert(key.into(), value);
    map
}
