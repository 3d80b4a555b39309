use crate::constants::mongo;
use crate::context::CompileContext;
use crate::error::DocGraphResult;
use crate::filter::{
    CompareOp, ElementKind, FieldPath, FilterCompiler, FilterTarget, PathRoot, Quantifier,
};
use crate::schema::TypeDescriptor;
use crate::value::single;
use serde_json::{json, Value};

/// Boolean aggregation expressions, for use inside `$group` / `$cond`.
/// `matches` has no equivalent here and degrades to `eq` on the pattern string.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExprTarget;

fn element_variable(depth: usize) -> String {
    format!("elem{depth}")
}

/// `"$a.b"` for document paths, `"$$elem0.a.b"` inside list quantifiers
pub fn field_ref(path: &FieldPath) -> Value {
    let base = match path.root {
        PathRoot::Document => "$".to_string(),
        PathRoot::Element(depth) => format!("$${}", element_variable(depth)),
    };
    match (path.root, path.is_root()) {
        (PathRoot::Document, _) => Value::String(format!("{base}{}", path.dotted())),
        (PathRoot::Element(_), true) => Value::String(base),
        (PathRoot::Element(_), false) => Value::String(format!("{base}.{}", path.dotted())),
    }
}

fn literal(value: &Value) -> Value {
    single(mongo::LITERAL, value.clone())
}

/// Field value with missing collapsed to null
fn value_of(path: &FieldPath) -> Value {
    single(mongo::IF_NULL, json!([field_ref(path), null]))
}

fn is_array(path: &FieldPath) -> Value {
    single(mongo::IS_ARRAY, json!([field_ref(path)]))
}

/// The array at `path`, or an empty array when it is missing or not an array
fn array_or_empty(path: &FieldPath) -> Value {
    single(mongo::COND, json!([is_array(path), field_ref(path), []]))
}

fn size_of(path: &FieldPath) -> Value {
    single(mongo::SIZE, array_or_empty(path))
}

/// Conjunction of boolean expressions; `true` when empty
pub fn all(mut conditions: Vec<Value>) -> Value {
    match conditions.len() {
        0 => Value::Bool(true),
        1 => conditions.remove(0),
        _ => single(mongo::AND, Value::Array(conditions)),
    }
}

fn any(mut conditions: Vec<Value>) -> Value {
    match conditions.len() {
        0 => Value::Bool(false),
        1 => conditions.remove(0),
        _ => single(mongo::OR, Value::Array(conditions)),
    }
}

fn not(condition: Value) -> Value {
    single(mongo::NOT, json!([condition]))
}

/// Keeps ordering comparisons within one type class, like the match stage does
fn type_guard(path: &FieldPath, value: &Value) -> Value {
    let bson_type = match value {
        Value::Number(_) => return single(mongo::IS_NUMBER, field_ref(path)),
        Value::Bool(_) => "bool",
        _ => "string",
    };
    single(
        mongo::EQ,
        json!([single(mongo::TYPE, field_ref(path)), bson_type]),
    )
}

impl FilterTarget for ExprTarget {
    type Condition = Value;

    fn exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<Value> {
        let op = match exists {
            true => mongo::NE,
            false => mongo::EQ,
        };
        Ok(single(op, json!([value_of(path), null])))
    }

    fn list_exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<Value> {
        Ok(match exists {
            true => is_array(path),
            false => not(is_array(path)),
        })
    }

    fn eq(&self, path: &FieldPath, value: &Value) -> DocGraphResult<Value> {
        Ok(match value {
            Value::Array(_) => single(mongo::IN, json!([value_of(path), literal(value)])),
            _ => single(mongo::EQ, json!([value_of(path), literal(value)])),
        })
    }

    fn ne(&self, path: &FieldPath, value: &Value) -> DocGraphResult<Value> {
        Ok(match value {
            Value::Array(_) => not(self.eq(path, value)?),
            _ => single(mongo::NE, json!([value_of(path), literal(value)])),
        })
    }

    fn compare(&self, path: &FieldPath, op: CompareOp, value: &Value) -> DocGraphResult<Value> {
        let op = match op {
            CompareOp::Gt => mongo::GT,
            CompareOp::Gte => mongo::GTE,
            CompareOp::Lt => mongo::LT,
            CompareOp::Lte => mongo::LTE,
        };
        let comparison = single(op, json!([field_ref(path), literal(value)]));
        Ok(all(vec![type_guard(path, value), comparison]))
    }

    fn matches(&self, path: &FieldPath, pattern: &str) -> DocGraphResult<Value> {
        self.eq(path, &Value::String(pattern.to_string()))
    }

    fn type_suffix(
        &self,
        path: &FieldPath,
        suffixes: &[String],
        negated: bool,
    ) -> DocGraphResult<Vec<Value>> {
        let id = single(mongo::IF_NULL, json!([field_ref(path), ""]));
        let tails = suffixes.iter().map(|suffix| {
            let len = suffix.len();
            let start = single(
                mongo::SUBTRACT,
                json!([single(mongo::STR_LEN_BYTES, id.clone()), len]),
            );
            let tail = single(mongo::SUBSTR, json!([id, start, len]));
            (tail, Value::String(suffix.clone()))
        });
        Ok(match negated {
            true => tails
                .map(|(tail, suffix)| single(mongo::NE, json!([tail, literal(&suffix)])))
                .collect(),
            false => vec![any(tails
                .map(|(tail, suffix)| single(mongo::EQ, json!([tail, literal(&suffix)])))
                .collect())],
        })
    }

    fn length(&self, path: &FieldPath, length: u64) -> DocGraphResult<Value> {
        Ok(all(vec![
            is_array(path),
            single(mongo::EQ, json!([size_of(path), length])),
        ]))
    }

    fn empty(&self, path: &FieldPath, empty: bool) -> DocGraphResult<Value> {
        let op = match empty {
            true => mongo::EQ,
            false => mongo::GT,
        };
        Ok(all(vec![is_array(path), single(op, json!([size_of(path), 0]))]))
    }

    fn elements(
        &self,
        path: &FieldPath,
        quantifier: Quantifier,
        _kind: ElementKind,
        element: Vec<Value>,
    ) -> DocGraphResult<Vec<Value>> {
        let variable = element_variable(path.next_element_depth());
        let element = all(element);
        let matching = |cond: Value| {
            let filter = json!({ "input": array_or_empty(path), "as": variable, "cond": cond });
            single(mongo::SIZE, single(mongo::FILTER, filter))
        };
        Ok(vec![match quantifier {
            Quantifier::Any => single(mongo::GT, json!([matching(element), 0])),
            Quantifier::All => single(mongo::EQ, json!([matching(not(element)), 0])),
            Quantifier::NoneOf => single(mongo::EQ, json!([matching(element), 0])),
        }])
    }
}

/// Compiles `filter` into a single boolean aggregation expression.
pub fn compile_expr(
    ctx: CompileContext<'_>,
    filter: &Value,
    type_: &TypeDescriptor,
    prefix: &FieldPath,
) -> DocGraphResult<Value> {
    let compiler = FilterCompiler::new(ctx, ExprTarget);
    Ok(all(compiler.compile_object(filter, type_, prefix)?))
}
