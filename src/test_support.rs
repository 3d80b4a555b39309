use crate::connection::DocumentStore;
use crate::error::StoreError;
use crate::schema::Schema;
use crate::value::{
    compare_optional, compare_values, lookup, optional_equals, present, same_type_class,
    values_equal, JsonMap,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::Barrier;

pub fn fixture_schema() -> Schema {
    let field = |name: &str, type_name: &str, flag: Option<&str>| {
        let mut field = json!({ "name": name, "targetTypeName": type_name });
        if let Some(flag) = flag {
            field[flag] = json!(true);
        }
        field
    };
    Schema::from_json(json!({
        "User": {
            "kind": "object",
            "implementsNode": true,
            "fields": [
                field("id", "ID", Some("isScalar")),
                field("name", "String", Some("isScalar")),
                field("age", "Int", Some("isNumeric")),
                field("score", "Float", Some("isNumeric")),
                field("address", "Address", Some("isObject")),
                field("tags", "String", Some("isScalarList")),
                field("scores", "Int", Some("isScalarList")),
                field("posts", "Post", Some("isObjectList")),
                field("friends", "User", Some("isNodeList")),
                field("bestFriend", "User", Some("isNode")),
                field("followers", "UserConnection", None)
            ]
        },
        "Bot": {
            "kind": "object",
            "implementsNode": true,
            "fields": [field("id", "ID", Some("isScalar")), field("name", "String", Some("isScalar"))]
        },
        "Address": {
            "kind": "object",
            "fields": [field("city", "String", Some("isScalar")), field("zip", "String", Some("isScalar"))]
        },
        "Post": {
            "kind": "object",
            "fields": [field("title", "String", Some("isScalar")), field("likes", "Int", Some("isNumeric"))]
        },
        "Actor": { "kind": "union", "memberTypeNames": ["User", "Bot"] },
        "Place": {
            "kind": "interface",
            "implementerTypeNames": ["Address"],
            "fields": [field("city", "String", Some("isScalar"))]
        }
    }))
    .unwrap()
}

fn dotted_lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = path.split('.').filter(|x| !x.is_empty()).collect();
    lookup(doc, &segments)
}

fn as_array(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn is_operator_map(map: &JsonMap) -> bool {
    !map.is_empty()
        && map
            .keys()
            .all(|k| k.starts_with('$') && !matches!(k.as_str(), "$and" | "$or" | "$nor"))
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Number(x)) if x.is_f64() => "double",
        Some(Value::Number(_)) => "long",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

/// Evaluates a query document the way `$match` would
pub fn matches_query(query: &Value, doc: &Value) -> bool {
    let map = match query.as_object() {
        Some(map) => map,
        None => return false,
    };
    map.iter().all(|(key, condition)| match key.as_str() {
        "$and" => as_array(condition).iter().all(|q| matches_query(q, doc)),
        "$or" => as_array(condition).iter().any(|q| matches_query(q, doc)),
        "$nor" => !as_array(condition).iter().any(|q| matches_query(q, doc)),
        path => {
            let value = dotted_lookup(doc, path);
            match condition {
                Value::Object(ops) if is_operator_map(ops) => matches_operators(value, ops),
                literal => optional_equals(value, literal),
            }
        }
    })
}

fn matches_operators(value: Option<&Value>, ops: &JsonMap) -> bool {
    ops.iter()
        .all(|(op, operand)| matches_operator(value, op, operand))
}

fn matches_operator(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => optional_equals(value, operand),
        "$ne" => !optional_equals(value, operand),
        "$in" => as_array(operand).iter().any(|x| optional_equals(value, x)),
        "$nin" => !as_array(operand).iter().any(|x| optional_equals(value, x)),
        "$gt" | "$gte" | "$lt" | "$lte" => match present(value) {
            Some(x) if same_type_class(x, operand) => {
                let ordering = compare_values(x, operand);
                match op {
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
            _ => false,
        },
        "$regex" => match (value, operand.as_str()) {
            (Some(Value::String(s)), Some(pattern)) => Regex::new(pattern).unwrap().is_match(s),
            _ => false,
        },
        "$not" => match operand {
            Value::Object(inner) => !matches_operators(value, inner),
            other => panic!("unsupported $not operand {other}"),
        },
        "$exists" => value.is_some() == operand.as_bool().unwrap(),
        "$type" => type_name(value) == operand.as_str().unwrap(),
        "$size" => match (value, operand.as_u64()) {
            (Some(Value::Array(items)), Some(n)) => items.len() as u64 == n,
            _ => false,
        },
        "$elemMatch" => match (value, operand) {
            (Some(Value::Array(items)), Value::Object(inner)) => items.iter().any(|item| {
                match is_operator_map(inner) {
                    true => matches_operators(Some(item), inner),
                    false => matches_query(operand, item),
                }
            }),
            _ => false,
        },
        other => panic!("unsupported query operator {other}"),
    }
}

type Vars = HashMap<String, Value>;

/// Evaluates a boolean aggregation expression against `doc`
pub fn evaluate_expr(expr: &Value, doc: &Value) -> bool {
    truthy(&eval(expr, doc, &Vars::new()))
}

fn truthy(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(x)) => x.as_f64() != Some(0.0),
        _ => true,
    }
}

fn or_null(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Null)
}

fn eval(expr: &Value, doc: &Value, vars: &Vars) -> Option<Value> {
    match expr {
        Value::String(s) if s.starts_with("$$") => {
            let mut parts = s[2..].split('.');
            let var = vars.get(parts.next()?)?;
            let rest: Vec<&str> = parts.collect();
            lookup(var, &rest).cloned()
        }
        Value::String(s) if s.starts_with('$') => dotted_lookup(doc, &s[1..]).cloned(),
        Value::Array(items) => Some(Value::Array(
            items.iter().map(|x| or_null(eval(x, doc, vars))).collect(),
        )),
        Value::Object(map) if map.len() == 1 && map.keys().all(|k| k.starts_with('$')) => {
            let (op, operand) = map.iter().next()?;
            eval_operator(op, operand, doc, vars)
        }
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), or_null(eval(v, doc, vars))))
                .collect(),
        )),
        literal => Some(literal.clone()),
    }
}

fn eval_args(operand: &Value, doc: &Value, vars: &Vars) -> Vec<Option<Value>> {
    match operand {
        Value::Array(items) => items.iter().map(|x| eval(x, doc, vars)).collect(),
        single => vec![eval(single, doc, vars)],
    }
}

fn eval_operator(op: &str, operand: &Value, doc: &Value, vars: &Vars) -> Option<Value> {
    if op == "$literal" {
        return Some(operand.clone());
    }
    if op == "$cond" {
        let branches = as_array(operand);
        let condition = eval(&branches[0], doc, vars);
        return match truthy(&condition) {
            true => eval(&branches[1], doc, vars),
            false => eval(&branches[2], doc, vars),
        };
    }
    if op == "$filter" {
        let input = eval(&operand["input"], doc, vars);
        let name = operand["as"].as_str().unwrap();
        let kept = as_array(&or_null(input))
            .iter()
            .filter(|item| {
                let mut scope = vars.clone();
                scope.insert(name.to_string(), (*item).clone());
                truthy(&eval(&operand["cond"], doc, &scope))
            })
            .cloned()
            .collect();
        return Some(Value::Array(kept));
    }

    let args = eval_args(operand, doc, vars);
    let first = args.first().cloned().flatten();
    let ordering = || compare_optional(args[0].as_ref(), args[1].as_ref());
    let result = match op {
        "$ifNull" => present(first.as_ref())
            .cloned()
            .unwrap_or_else(|| or_null(args[1].clone())),
        "$eq" => Value::Bool(ordering() == Ordering::Equal),
        "$ne" => Value::Bool(ordering() != Ordering::Equal),
        "$gt" => Value::Bool(ordering() == Ordering::Greater),
        "$gte" => Value::Bool(ordering() != Ordering::Less),
        "$lt" => Value::Bool(ordering() == Ordering::Less),
        "$lte" => Value::Bool(ordering() != Ordering::Greater),
        "$and" => Value::Bool(args.iter().all(truthy)),
        "$or" => Value::Bool(args.iter().any(truthy)),
        "$not" => Value::Bool(!truthy(&first)),
        "$in" => {
            let needle = or_null(first);
            let haystack = or_null(args[1].clone());
            Value::Bool(as_array(&haystack).iter().any(|x| values_equal(x, &needle)))
        }
        "$isArray" => Value::Bool(matches!(first, Some(Value::Array(_)))),
        "$isNumber" => Value::Bool(matches!(first, Some(Value::Number(_)))),
        "$type" => Value::String(type_name(first.as_ref()).to_string()),
        "$size" => Value::from(first.as_ref().and_then(Value::as_array)?.len()),
        "$strLenBytes" => Value::from(first.as_ref().and_then(Value::as_str)?.len()),
        "$subtract" => {
            let a = args[0].as_ref()?;
            let b = args[1].as_ref()?;
            match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Value::from(x - y),
                _ => Value::from(a.as_f64()? - b.as_f64()?),
            }
        }
        "$substr" => {
            let s = first.as_ref().and_then(Value::as_str).unwrap_or_default();
            let start = args[1].as_ref().and_then(Value::as_i64)?;
            let len = args[2].as_ref().and_then(Value::as_i64)?;
            if start < 0 || start as usize > s.len() {
                Value::String(String::new())
            } else {
                let end = (start + len).min(s.len() as i64) as usize;
                Value::String(String::from_utf8_lossy(&s.as_bytes()[start as usize..end]).into_owned())
            }
        }
        other => panic!("unsupported expression operator {other}"),
    };
    Some(result)
}

fn sum(values: &[Value]) -> Value {
    let numbers: Vec<&Number> = values
        .iter()
        .filter_map(|x| match x {
            Value::Number(n) => Some(n),
            _ => None,
        })
        .collect();
    if numbers.iter().all(|x| x.is_i64()) {
        return Value::from(numbers.iter().filter_map(|x| x.as_i64()).sum::<i64>());
    }
    json!(numbers.iter().filter_map(|x| x.as_f64()).sum::<f64>())
}

/// Evaluates a `$group` stage with `_id: null` over `docs`
pub fn evaluate_group(stage: &JsonMap, docs: &[Value]) -> Vec<JsonMap> {
    if docs.is_empty() {
        return vec![];
    }
    let group = stage["$group"].as_object().unwrap();
    let mut row = JsonMap::new();
    for (alias, accumulator) in group {
        if alias == "_id" {
            row.insert(alias.clone(), Value::Null);
            continue;
        }
        let (op, expr) = accumulator.as_object().unwrap().iter().next().unwrap();
        let values: Vec<Value> = docs
            .iter()
            .filter_map(|doc| eval(expr, doc, &Vars::new()))
            .filter(|x| !x.is_null())
            .collect();
        let result = match op.as_str() {
            "$sum" => sum(&values),
            "$min" => values.iter().min_by(|a, b| compare_values(a, b)).cloned().unwrap_or(Value::Null),
            "$max" => values.iter().max_by(|a, b| compare_values(a, b)).cloned().unwrap_or(Value::Null),
            "$avg" => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                match numbers.len() {
                    0 => Value::Null,
                    n => json!(numbers.iter().sum::<f64>() / n as f64),
                }
            }
            other => panic!("unsupported accumulator {other}"),
        };
        row.insert(alias.clone(), result);
    }
    vec![row]
}

/// One collection of documents, queried with aggregation pipelines
pub struct MemoryStore {
    collection: String,
    rows: Mutex<Vec<Value>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(collection: &str, rows: Vec<Value>) -> Self {
        Self {
            collection: collection.to_string(),
            rows: Mutex::new(rows),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    pub fn truncate(&self, len: usize) {
        self.rows.lock().unwrap().truncate(len);
    }

    fn run(&self, pipeline: &[JsonMap]) -> Result<Vec<JsonMap>, StoreError> {
        let mut rows = self.rows.lock().unwrap().clone();
        for stage in pipeline {
            let (op, arg) = stage
                .iter()
                .next()
                .ok_or_else(|| StoreError::new("empty stage"))?;
            match op.as_str() {
                "$match" => rows.retain(|x| matches_query(arg, x)),
                "$sort" => {
                    let keys = arg.as_object().unwrap();
                    rows.sort_by(|a, b| {
                        for (key, direction) in keys {
                            let ordering = compare_optional(dotted_lookup(a, key), dotted_lookup(b, key));
                            let ordering = match direction.as_i64() {
                                Some(-1) => ordering.reverse(),
                                _ => ordering,
                            };
                            if ordering != Ordering::Equal {
                                return ordering;
                            }
                        }
                        Ordering::Equal
                    });
                }
                "$skip" => {
                    let n = arg.as_u64().unwrap() as usize;
                    rows = rows.into_iter().skip(n).collect();
                }
                "$limit" => rows.truncate(arg.as_u64().unwrap() as usize),
                "$group" => {
                    rows = evaluate_group(stage, &rows)
                        .into_iter()
                        .map(Value::Object)
                        .collect()
                }
                other => return Err(StoreError::new(format!("unsupported stage {other}"))),
            }
        }
        Ok(rows
            .into_iter()
            .filter_map(|x| match x {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<JsonMap>,
    ) -> Result<Vec<JsonMap>, StoreError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if collection != self.collection {
            return Err(StoreError::new(format!("unknown collection {collection}")));
        }
        self.run(&pipeline)
    }
}

/// Drops every row past `keep` right after answering its first query
pub struct ShrinkingStore {
    inner: MemoryStore,
    keep: usize,
    shrunk: AtomicBool,
}

impl ShrinkingStore {
    pub fn new(inner: MemoryStore, keep: usize) -> Self {
        Self {
            inner,
            keep,
            shrunk: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DocumentStore for ShrinkingStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<JsonMap>,
    ) -> Result<Vec<JsonMap>, StoreError> {
        let rows = self.inner.aggregate(collection, pipeline).await;
        if !self.shrunk.swap(true, AtomicOrdering::SeqCst) {
            self.inner.truncate(self.keep);
        }
        rows
    }
}

/// Holds the edge page query and the aggregation query at a barrier until
/// both have been issued. Count queries pass straight through.
pub struct RendezvousStore {
    inner: MemoryStore,
    barrier: Barrier,
}

impl RendezvousStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            barrier: Barrier::new(2),
        }
    }

    fn is_count(pipeline: &[JsonMap]) -> bool {
        pipeline
            .last()
            .and_then(|stage| stage.get("$group"))
            .and_then(Value::as_object)
            .map_or(false, |group| group.contains_key("count"))
    }
}

#[async_trait]
impl DocumentStore for RendezvousStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<JsonMap>,
    ) -> Result<Vec<JsonMap>, StoreError> {
        if !Self::is_count(&pipeline) {
            self.barrier.wait().await;
        }
        self.inner.aggregate(collection, pipeline).await
    }
}

mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::context::CompileContext;
    use crate::filter::FieldPath;
    use crate::filter_aggregate::compile_expr;
    use crate::filter_match::{and_documents, compile_match};
    use crate::filter_predicate::compile_predicate;

    fn dataset() -> Vec<Value> {
        vec![
            json!({}),
            json!({ "id": "1.VXNlcg", "name": "ann", "age": 30, "tags": ["a", "b"], "scores": [2, 9],
                    "address": { "city": "Oslo" }, "posts": [{ "title": "hi", "likes": 3 }] }),
            json!({ "id": "2.VXNlcg", "name": "bob", "age": 17, "tags": [], "scores": [1, 5],
                    "address": null, "posts": [] }),
            json!({ "id": "3.Qm90", "name": null, "age": "old", "tags": null, "scores": [3, "x"],
                    "address": { "city": "Rome" }, "posts": [{ "title": "hi", "likes": 0 }, { "likes": 2 }] }),
            json!({ "id": "4.Qm90", "name": "cid", "age": 20.5, "tags": ["b", null],
                    "scores": [], "address": {}, "posts": [{ "title": "yo", "likes": 5 }] }),
            json!({ "name": "anna", "tags": ["a"], "scores": [3], "posts": null }),
        ]
    }

    fn filters() -> Vec<(&'static str, Value)> {
        vec![
            ("User", json!({ "exists": false })),
            ("User", json!({ "exists": true, "name": { "exists": true } })),
            ("User", json!({ "name": { "eq": "ann" } })),
            ("User", json!({ "name": { "eq": ["ann", "bob"] } })),
            ("User", json!({ "name": { "ne": ["ann", "bob"] } })),
            ("User", json!({ "name": { "exists": true } })),
            ("User", json!({ "name": { "exists": false } })),
            ("User", json!({ "name": { "lt": "b" } })),
            ("User", json!({ "age": { "gt": 18 } })),
            ("User", json!({ "age": { "gte": 17, "lte": 20.5 } })),
            ("User", json!({ "id": { "eq": "1.VXNlcg" } })),
            ("User", json!({ "address": { "exists": true, "city": { "ne": "Oslo" } } })),
            ("User", json!({ "address": { "exists": false } })),
            ("User", json!({ "tags": { "exists": true } })),
            ("User", json!({ "tags": { "exists": false } })),
            ("User", json!({ "tags": { "empty": true } })),
            ("User", json!({ "tags": { "empty": false } })),
            ("User", json!({ "tags": { "length": 2 } })),
            ("User", json!({ "tags": { "some": { "eq": "a" } } })),
            ("User", json!({ "tags": { "every": { "ne": "b" } } })),
            ("User", json!({ "tags": { "none": { "eq": ["a", "b"] } } })),
            ("User", json!({ "scores": { "every": { "gt": 1, "lte": 9 } } })),
            ("User", json!({ "scores": { "some": { "exists": true, "ne": 3 } } })),
            ("User", json!({ "posts": { "some": { "title": { "eq": "hi" }, "likes": { "gt": 1 } } } })),
            ("User", json!({ "posts": { "every": { "likes": { "gte": 1 } } } })),
            ("User", json!({ "posts": { "none": { "title": { "exists": true } } } })),
            ("User", json!({ "posts": { "some": {} } })),
            ("User", json!({ "posts": { "every": {} } })),
            ("User", json!({ "posts": { "none": {} } })),
            ("Actor", json!({ "type": { "eq": ["Bot"] } })),
            ("Actor", json!({ "type": { "ne": ["Bot"] } })),
            ("Actor", json!({ "type": { "eq": [] } })),
        ]
    }

    struct Verdicts {
        matched: bool,
        counted: bool,
        predicate: bool,
    }

    fn verdicts(type_name: &str, filter: &Value) -> Vec<Verdicts> {
        let schema = fixture_schema();
        let config = ConnectionConfig::default();
        let ctx = CompileContext::new(&schema, &config);
        let type_ = schema.require(type_name).unwrap();
        let prefix = FieldPath::from_dotted("node");

        let query = Value::Object(and_documents(compile_match(ctx, filter, type_, &prefix).unwrap()));
        let expr = compile_expr(ctx, filter, type_, &prefix).unwrap();
        let predicate = compile_predicate(ctx, filter, type_).unwrap();

        dataset()
            .into_iter()
            .map(|node| {
                let edge = json!({ "node": node });
                Verdicts {
                    matched: matches_query(&query, &edge),
                    counted: evaluate_expr(&expr, &edge),
                    predicate: predicate(&node),
                }
            })
            .collect()
    }

    #[test]
    fn test_filter_targets_agree() {
        for (type_name, filter) in filters() {
            for (i, v) in verdicts(type_name, &filter).iter().enumerate() {
                assert_eq!(v.matched, v.predicate, "match vs predicate, {filter} on row {i}");
                assert_eq!(v.matched, v.counted, "match vs count, {filter} on row {i}");
            }
        }
    }

    #[test]
    fn test_matches_diverges_only_in_count_form() {
        let filter = json!({ "name": { "matches": "^an" } });
        let results = verdicts("User", &filter);
        for v in &results {
            assert_eq!(v.matched, v.predicate);
        }
        // `ann` and `anna` match the pattern but are not equal to it
        assert_eq!(results.iter().filter(|v| v.matched).count(), 2);
        assert_eq!(results.iter().filter(|v| v.counted).count(), 0);
    }

    #[test]
    fn test_count_form_of_matches_is_pattern_equality() {
        let filter = json!({ "name": { "matches": "^an" } });
        let schema = fixture_schema();
        let config = ConnectionConfig::default();
        let ctx = CompileContext::new(&schema, &config);
        let user = schema.require("User").unwrap();
        let expr = compile_expr(ctx, &filter, user, &FieldPath::from_dotted("node")).unwrap();
        assert!(evaluate_expr(&expr, &json!({ "node": { "name": "^an" } })));
    }

    #[tokio::test]
    async fn test_memory_store_pipeline() {
        let store = MemoryStore::new("c", (0..5).map(|i| json!({ "_id": i, "v": i % 2 })).collect());
        let rows = store
            .aggregate(
                "c",
                vec![
                    json!({ "$match": { "v": { "$eq": 1 } } }).as_object().unwrap().clone(),
                    json!({ "$sort": { "_id": -1 } }).as_object().unwrap().clone(),
                    json!({ "$skip": 1 }).as_object().unwrap().clone(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "_id": 1, "v": 1 }).as_object().unwrap().clone()]);
        assert!(store.aggregate("other", vec![]).await.is_err());
        assert_eq!(store.calls(), 2);
    }
}
