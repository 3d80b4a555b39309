use crate::constants::{filter as filter_keys, order as dirs};
use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult};
use crate::schema::{FieldCategory, TypeDescriptor, TypeKind};
use crate::value::{compare_optional, compare_values, lookup, JsonMap};
use itertools::Itertools;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// `1` / `-1` as used by `$sort`
    pub fn sign(&self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }

    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

impl FromStr for Direction {
    type Err = DocGraphError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            dirs::ASCENDING => Ok(Self::Ascending),
            dirs::DESCENDING => Ok(Self::Descending),
            _ => Err(DocGraphError::schema(format!(
                "Invalid order direction {input}"
            ))),
        }
    }
}

/// Parses a direction given as a JSON string
pub fn parse_direction(value: &Value) -> DocGraphResult<Direction> {
    match value {
        Value::String(x) => Direction::from_str(x),
        other => Err(DocGraphError::schema(format!(
            "Expected an order direction, got {other}"
        ))),
    }
}

/// One `(field, direction)` pair. `path` is relative to the ordered object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderClause {
    pub path: Vec<String>,
    pub direction: Direction,
}

fn parse_entry(
    ctx: CompileContext<'_>,
    type_: &TypeDescriptor,
    key: &str,
    value: &Value,
    parent: &[String],
    clauses: &mut Vec<OrderClause>,
) -> DocGraphResult<()> {
    let mut path = parent.to_vec();

    if key == filter_keys::ID {
        if !type_.is_node {
            return Err(DocGraphError::schema(format!(
                "`id` order on {} which is not a node type",
                type_.name
            )));
        }
        path.push(ctx.config.id_field.clone());
        clauses.push(OrderClause {
            path,
            direction: parse_direction(value)?,
        });
        return Ok(());
    }

    if matches!(type_.kind, TypeKind::Union | TypeKind::Enum) {
        return Err(DocGraphError::schema(format!(
            "{} has no orderable fields, found {key}",
            type_.name
        )));
    }
    let field = type_.require_field(key)?;
    path.push(key.to_string());

    match field.category {
        FieldCategory::Scalar | FieldCategory::Numeric | FieldCategory::Node => {
            clauses.push(OrderClause {
                path,
                direction: parse_direction(value)?,
            });
        }
        FieldCategory::Object => {
            let nested = ctx.schema.require(&field.type_name)?;
            let entries = value.as_object().ok_or_else(|| {
                DocGraphError::schema(format!("Expected a nested order for {key}"))
            })?;
            for (nested_key, nested_value) in entries {
                parse_entry(ctx, nested, nested_key, nested_value, &path, clauses)?;
            }
        }
        _ => {
            return Err(DocGraphError::schema(format!(
                "Field {key} of category {:?} is not orderable",
                field.category
            )))
        }
    }
    Ok(())
}

/// Parses an order expression: a list of single-key maps, evaluated left to
/// right. A bare map is accepted as a one-element list.
pub fn compile_order(
    ctx: CompileContext<'_>,
    order: &Value,
    type_: &TypeDescriptor,
) -> DocGraphResult<Vec<OrderClause>> {
    let entries: Vec<&JsonMap> = match order {
        Value::Null => vec![],
        Value::Object(map) => vec![map],
        Value::Array(items) => items
            .iter()
            .filter(|x| !x.is_null())
            .map(|x| {
                x.as_object().ok_or_else(|| {
                    DocGraphError::schema(format!("Expected an order entry, got {x}"))
                })
            })
            .collect::<DocGraphResult<_>>()?,
        other => {
            return Err(DocGraphError::schema(format!(
                "Expected an order expression, got {other}"
            )))
        }
    };

    let mut clauses = vec![];
    for entry in entries {
        for (key, value) in entry {
            parse_entry(ctx, type_, key, value, &[], &mut clauses)?;
        }
    }
    Ok(clauses)
}

/// The `$sort` document for `clauses`, with paths rooted at `prefix`.
/// The configured tiebreaker is appended unless already ordered on.
pub fn sort_document(
    ctx: CompileContext<'_>,
    clauses: &[OrderClause],
    prefix: &[String],
) -> JsonMap {
    let mut doc = JsonMap::new();
    for clause in clauses {
        let key = prefix.iter().chain(clause.path.iter()).join(".");
        // First occurrence wins, matching the in-memory comparator
        doc.entry(key).or_insert_with(|| Value::from(clause.direction.sign()));
    }
    if let Some(tiebreaker) = &ctx.config.sort_tiebreaker {
        doc.entry(tiebreaker.clone()).or_insert_with(|| Value::from(1));
    }
    doc
}

/// Compares two objects field by field; equal once all clauses are exhausted
pub fn compare_objects(clauses: &[OrderClause], a: &Value, b: &Value) -> Ordering {
    for clause in clauses {
        let ordering = clause
            .direction
            .apply(compare_optional(lookup(a, &clause.path), lookup(b, &clause.path)));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable in-place sort of objects
pub fn sort_objects(items: &mut [Value], clauses: &[OrderClause]) {
    items.sort_by(|a, b| compare_objects(clauses, a, b));
}

/// Sorts scalars in `direction`. Nulls are kept out of the comparison and
/// placed first whatever the direction.
pub fn sort_scalars(items: Vec<Value>, direction: Direction) -> Vec<Value> {
    let (nulls, mut values): (Vec<Value>, Vec<Value>) =
        items.into_iter().partition(Value::is_null);
    values.sort_by(|a, b| direction.apply(compare_values(a, b)));
    nulls.into_iter().chain(values).collect()
}
