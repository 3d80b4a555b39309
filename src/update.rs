use crate::constants::{mongo, update as keys};
use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult};
use crate::filter::{ElementKind, FieldPath, FilterCompiler};
use crate::filter_match::MatchTarget;
use crate::filter_predicate::{compile_predicate, compile_scalar_predicate, Predicate};
use crate::merge::UpdateDocument;
use crate::schema::{FieldCategory, FieldDescriptor, TypeDescriptor, TypeKind};
use crate::value::{compare_optional, compare_values, lookup, number_from_f64, single, to_list, values_equal, JsonMap};
use serde_json::{json, Number, Value};
use std::cmp::Ordering;
use tracing::debug;

fn element_kind(field: &FieldDescriptor) -> ElementKind {
    match field.category {
        FieldCategory::ObjectList => ElementKind::Object,
        _ => ElementKind::Scalar,
    }
}

fn is_set(map: &JsonMap, key: &str) -> bool {
    map.get(key).map_or(false, |x| !x.is_null())
}

/// Only an explicit `clear: true` clears; `clear: false` leaves the other
/// operations in effect
fn clear_requested(map: &JsonMap) -> bool {
    map.get(keys::CLEAR) == Some(&Value::Bool(true))
}

fn ignored(path: &FieldPath, update: &Value) -> UpdateDocument {
    debug!(path = %path.dotted(), %update, "update matched no known shape; ignoring");
    UpdateDocument::new()
}

fn expect_number<'v>(op: &str, value: &'v Value) -> DocGraphResult<&'v Number> {
    match value {
        Value::Number(x) => Ok(x),
        other => Err(DocGraphError::argument(format!(
            "`{op}` expects a number, got {other}"
        ))),
    }
}

fn negate(number: &Number) -> DocGraphResult<Value> {
    if let Some(x) = number.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::from(x));
    }
    number
        .as_f64()
        .and_then(|x| number_from_f64(-x))
        .ok_or_else(|| DocGraphError::argument(format!("Cannot negate {number}")))
}

fn reciprocal(number: &Number) -> DocGraphResult<Value> {
    match number.as_f64() {
        Some(x) if x != 0.0 => number_from_f64(1.0 / x)
            .ok_or_else(|| DocGraphError::argument(format!("Cannot divide by {number}"))),
        _ => Err(DocGraphError::argument("`div` by zero")),
    }
}

/// Compiles an update expression for an object of `type_` living at `path`.
/// A field update matching none of the recognized shapes is a no-op.
pub fn compile_update(
    ctx: CompileContext<'_>,
    update: &Value,
    type_: &TypeDescriptor,
    path: &FieldPath,
) -> DocGraphResult<UpdateDocument> {
    let map = match update {
        Value::Object(map) => map,
        other => return Ok(ignored(path, other)),
    };
    if matches!(type_.kind, TypeKind::Union | TypeKind::Enum) && !map.is_empty() {
        return Err(DocGraphError::schema(format!(
            "{} has no updatable fields",
            type_.name
        )));
    }

    let mut doc = UpdateDocument::new();
    for (name, value) in map {
        let field = type_.require_field(name)?;
        let field_path = path.child(name);
        doc.merge(compile_field_update(ctx, field, value, &field_path)?);
    }
    Ok(doc)
}

fn compile_field_update(
    ctx: CompileContext<'_>,
    field: &FieldDescriptor,
    update: &Value,
    path: &FieldPath,
) -> DocGraphResult<UpdateDocument> {
    match field.category {
        FieldCategory::Scalar | FieldCategory::Node => Ok(scalar_update(update, path)),
        FieldCategory::Numeric => numeric_update(update, path),
        FieldCategory::Object => match update {
            Value::Null => Ok(UpdateDocument::with(mongo::UNSET, path.dotted(), json!(""))),
            Value::Object(_) => {
                let nested = ctx.schema.require(&field.type_name)?;
                compile_update(ctx, update, nested, path)
            }
            other => Ok(ignored(path, other)),
        },
        FieldCategory::ScalarList | FieldCategory::NodeList | FieldCategory::ObjectList => {
            list_update(ctx, field, update, path)
        }
        FieldCategory::Connection => Err(DocGraphError::schema(format!(
            "Connection field {} is not updatable",
            field.name
        ))),
    }
}

fn scalar_update(update: &Value, path: &FieldPath) -> UpdateDocument {
    match update {
        Value::Object(map) if map.contains_key(keys::CLEAR) => match map[keys::CLEAR] {
            Value::Bool(true) => UpdateDocument::with(mongo::UNSET, path.dotted(), json!("")),
            _ => ignored(path, update),
        },
        literal => UpdateDocument::with(mongo::SET, path.dotted(), literal.clone()),
    }
}

fn numeric_update(update: &Value, path: &FieldPath) -> DocGraphResult<UpdateDocument> {
    let map = match update {
        Value::Object(map) => map,
        literal => return Ok(UpdateDocument::with(mongo::SET, path.dotted(), literal.clone())),
    };
    let dotted = path.dotted();

    if clear_requested(map) {
        return Ok(UpdateDocument::with(mongo::UNSET, dotted, json!("")));
    }
    for op in [keys::ADD, keys::SUB, keys::MUL, keys::DIV, keys::MIN, keys::MAX] {
        if !is_set(map, op) {
            continue;
        }
        let operand = expect_number(op, &map[op])?;
        let (operator, value) = match op {
            keys::ADD => (mongo::INC, Value::Number(operand.clone())),
            keys::SUB => (mongo::INC, negate(operand)?),
            keys::MUL => (mongo::MUL, Value::Number(operand.clone())),
            keys::DIV => (mongo::MUL, reciprocal(operand)?),
            keys::MIN => (mongo::MIN, Value::Number(operand.clone())),
            _ => (mongo::MAX, Value::Number(operand.clone())),
        };
        return Ok(UpdateDocument::with(operator, dotted, value));
    }
    Ok(ignored(path, update))
}

/// Sort applied when inserting with `ascending`/`descending`
#[derive(Clone, Debug, PartialEq)]
enum InsertSort {
    Scalar(i64),
    Field(String, i64),
}

impl InsertSort {
    fn parse(field: &FieldDescriptor, map: &JsonMap) -> DocGraphResult<Option<Self>> {
        let ascending = map.get(keys::ASCENDING).filter(|x| !x.is_null());
        let descending = map.get(keys::DESCENDING).filter(|x| !x.is_null());
        let (value, sign) = match (ascending, descending) {
            (Some(_), Some(_)) => {
                return Err(DocGraphError::argument(
                    "Only one of `ascending` and `descending` may be given",
                ))
            }
            (Some(x), None) => (x, 1),
            (None, Some(x)) => (x, -1),
            (None, None) => return Ok(None),
        };
        match (element_kind(field), value) {
            (ElementKind::Scalar, Value::Bool(true)) => Ok(Some(Self::Scalar(sign))),
            (ElementKind::Scalar, Value::Bool(false)) => Ok(None),
            (ElementKind::Object, Value::String(name)) => Ok(Some(Self::Field(name.clone(), sign))),
            (_, other) => Err(DocGraphError::argument(format!(
                "Invalid sort {other} for list {}",
                field.name
            ))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Scalar(sign) => Value::from(*sign),
            Self::Field(name, sign) => single(name.clone(), Value::from(*sign)),
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let (ordering, sign) = match self {
            Self::Scalar(sign) => (compare_values(a, b), *sign),
            Self::Field(name, sign) => (compare_optional(lookup(a, &[name]), lookup(b, &[name])), *sign),
        };
        match sign {
            1 => ordering,
            _ => ordering.reverse(),
        }
    }
}

/// Truncation applied after an insert
#[derive(Clone, Copy, Debug, PartialEq)]
enum Keep {
    First(i64),
    Last(i64),
}

impl Keep {
    fn parse(map: &JsonMap) -> DocGraphResult<Option<Self>> {
        let count = |key: &str| -> DocGraphResult<Option<i64>> {
            match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(x) => x
                    .as_u64()
                    .and_then(|n| i64::try_from(n).ok())
                    .map(Some)
                    .ok_or_else(|| {
                        DocGraphError::argument(format!(
                            "`{key}` expects a non-negative integer no larger than {}",
                            i64::MAX
                        ))
                    }),
            }
        };
        match (count(keys::KEEP_FIRST)?, count(keys::KEEP_LAST)?) {
            (Some(_), Some(_)) => Err(DocGraphError::argument(
                "Only one of `keepFirst` and `keepLast` may be given",
            )),
            (Some(n), None) => Ok(Some(Self::First(n))),
            (None, Some(n)) => Ok(Some(Self::Last(n))),
            (None, None) => Ok(None),
        }
    }

    fn slice(&self) -> Value {
        match self {
            Self::First(n) => Value::from(*n),
            Self::Last(n) => Value::from(-*n),
        }
    }
}

/// What a `delete` removes
enum DeleteTarget {
    Literals(Vec<Value>),
    Filter(Value),
}

impl DeleteTarget {
    /// An object is a filter over elements; anything else is one literal or
    /// a list of literals
    fn parse(value: &Value) -> Self {
        match value {
            Value::Object(_) => Self::Filter(value.clone()),
            literal => Self::Literals(to_list(literal)),
        }
    }
}

fn pop_direction(value: &Value) -> Option<i64> {
    let which = value.as_str()?.to_ascii_lowercase();
    match which.as_str() {
        keys::POP_FIRST => Some(-1),
        keys::POP_LAST => Some(1),
        _ => None,
    }
}

fn list_update(
    ctx: CompileContext<'_>,
    field: &FieldDescriptor,
    update: &Value,
    path: &FieldPath,
) -> DocGraphResult<UpdateDocument> {
    let dotted = path.dotted();
    let map = match update {
        Value::Array(_) => return Ok(UpdateDocument::with(mongo::SET, dotted, update.clone())),
        Value::Object(map) => map,
        other => return Ok(ignored(path, other)),
    };

    if clear_requested(map) {
        return Ok(UpdateDocument::with(mongo::UNSET, dotted, json!("")));
    }

    if let Some(values) = map.get(keys::INSERT) {
        let mut push = JsonMap::new();
        push.insert(mongo::EACH.to_string(), Value::Array(to_list(values)));
        if let Some(at) = map.get(keys::AT).filter(|x| !x.is_null()) {
            let at = at
                .as_i64()
                .ok_or_else(|| DocGraphError::argument("`at` expects an integer"))?;
            push.insert(mongo::POSITION.to_string(), Value::from(at));
        } else if let Some(sort) = InsertSort::parse(field, map)? {
            push.insert(mongo::SORT.to_string(), sort.to_value());
        }
        if let Some(keep) = Keep::parse(map)? {
            push.insert(mongo::SLICE.to_string(), keep.slice());
        }
        return Ok(UpdateDocument::with(mongo::PUSH, dotted, Value::Object(push)));
    }

    if let Some(target) = map.get(keys::DELETE) {
        let condition = match DeleteTarget::parse(target) {
            DeleteTarget::Literals(mut values) if values.len() == 1 => values.remove(0),
            DeleteTarget::Literals(values) => single(mongo::IN, Value::Array(values)),
            DeleteTarget::Filter(filter) => {
                Value::Object(delete_condition(ctx, field, &filter)?)
            }
        };
        return Ok(UpdateDocument::with(mongo::PULL, dotted, condition));
    }

    if let Some(which) = map.get(keys::POP) {
        return Ok(match pop_direction(which) {
            Some(direction) => UpdateDocument::with(mongo::POP, dotted, Value::from(direction)),
            None => ignored(path, update),
        });
    }

    Ok(ignored(path, update))
}

/// `$pull` operand for a filter over list elements
fn delete_condition(
    ctx: CompileContext<'_>,
    field: &FieldDescriptor,
    filter: &Value,
) -> DocGraphResult<JsonMap> {
    let compiler = FilterCompiler::new(ctx, MatchTarget);
    let element_path = FieldPath::element(0);
    let kind = element_kind(field);
    let conditions = match kind {
        ElementKind::Object => {
            let element_type = ctx.schema.require(&field.type_name)?;
            compiler.compile_object(filter, element_type, &element_path)?
        }
        ElementKind::Scalar => compiler.compile_scalar(filter, &element_path)?,
    };
    MatchTarget.element_condition(kind, conditions)
}

fn element_predicate(
    ctx: CompileContext<'_>,
    field: &FieldDescriptor,
    filter: &Value,
) -> DocGraphResult<Predicate> {
    match element_kind(field) {
        ElementKind::Object => {
            let element_type = ctx.schema.require(&field.type_name)?;
            compile_predicate(ctx, filter, element_type)
        }
        ElementKind::Scalar => compile_scalar_predicate(ctx, filter),
    }
}

/// Merges sorted `incoming` into `list`, keeping existing elements ahead of
/// equal incoming ones.
fn merge_sorted(list: Vec<Value>, mut incoming: Vec<Value>, sort: &InsertSort) -> Vec<Value> {
    incoming.sort_by(|a, b| sort.compare(a, b));
    let mut merged = Vec::with_capacity(list.len() + incoming.len());
    let mut existing = list.into_iter().peekable();
    for value in incoming {
        while let Some(current) = existing.peek() {
            if sort.compare(current, &value) == Ordering::Greater {
                break;
            }
            if let Some(current) = existing.next() {
                merged.push(current);
            }
        }
        merged.push(value);
    }
    merged.extend(existing);
    merged
}

/// Applies a list update expression to a materialized list.
///
/// `None` stands for a missing field, both on input and on output.
pub fn apply_list_update(
    ctx: CompileContext<'_>,
    field: &FieldDescriptor,
    current: Option<Vec<Value>>,
    update: &Value,
) -> DocGraphResult<Option<Vec<Value>>> {
    if !field.category.is_list() {
        return Err(DocGraphError::schema(format!(
            "Field {} is not a list",
            field.name
        )));
    }
    let map = match update {
        Value::Array(items) => return Ok(Some(items.clone())),
        Value::Object(map) => map,
        _ => return Ok(current),
    };

    if clear_requested(map) {
        return Ok(None);
    }

    let mut list = current.unwrap_or_default();

    if let Some(values) = map.get(keys::INSERT) {
        let incoming = to_list(values);
        if let Some(at) = map.get(keys::AT).filter(|x| !x.is_null()) {
            let at = at
                .as_i64()
                .ok_or_else(|| DocGraphError::argument("`at` expects an integer"))?;
            let len = list.len() as i64;
            let position = match at {
                x if x < 0 => (len + x).max(0),
                x => x.min(len),
            } as usize;
            list.splice(position..position, incoming);
        } else if let Some(sort) = InsertSort::parse(field, map)? {
            list = merge_sorted(list, incoming, &sort);
        } else {
            list.extend(incoming);
        }
        match Keep::parse(map)? {
            Some(Keep::First(n)) => list.truncate(n as usize),
            Some(Keep::Last(n)) => {
                let excess = list.len().saturating_sub(n as usize);
                list.drain(..excess);
            }
            None => {}
        }
        return Ok(Some(list));
    }

    if let Some(target) = map.get(keys::DELETE) {
        match DeleteTarget::parse(target) {
            DeleteTarget::Literals(values) => {
                list.retain(|x| !values.iter().any(|y| values_equal(x, y)))
            }
            DeleteTarget::Filter(filter) => {
                let predicate = element_predicate(ctx, field, &filter)?;
                list.retain(|x| !predicate(x));
            }
        }
        return Ok(Some(list));
    }

    if let Some(which) = map.get(keys::POP) {
        match pop_direction(which) {
            Some(-1) if !list.is_empty() => {
                list.remove(0);
            }
            Some(1) => {
                list.pop();
            }
            _ => {}
        }
        return Ok(Some(list));
    }

    debug!(field = %field.name, %update, "list update matched no known shape; ignoring");
    Ok(Some(list))
}
