use crate::constants::mongo;
use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult};
use crate::filter::{CompareOp, ElementKind, FieldPath, FilterCompiler, FilterTarget, Quantifier};
use crate::schema::TypeDescriptor;
use crate::value::{single, single_map, to_list, values_equal, JsonMap};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum MatchCondition {
    /// `{ path: { op: value, ... } }`. An empty path addresses a list
    /// element itself and is only valid inside `$elemMatch`/`$pull`.
    Field { path: String, ops: JsonMap },
    /// A complete query document
    Document(JsonMap),
}

impl MatchCondition {
    fn field(path: &FieldPath, op: &str, value: Value) -> Self {
        Self::Field {
            path: path.dotted(),
            ops: single_map(op, value),
        }
    }

    pub fn into_document(self) -> DocGraphResult<JsonMap> {
        match self {
            Self::Field { path, ops } if !path.is_empty() => Ok(single_map(path, Value::Object(ops))),
            Self::Field { .. } => Err(DocGraphError::schema(
                "Element condition used outside of a list quantifier",
            )),
            Self::Document(doc) => Ok(doc),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MatchTarget;

fn non_empty_array(path: &FieldPath) -> MatchCondition {
    let mut ops = JsonMap::new();
    ops.insert(mongo::TYPE.to_string(), json!("array"));
    ops.insert(mongo::NOT.to_string(), single(mongo::SIZE, json!(0)));
    MatchCondition::Field {
        path: path.dotted(),
        ops,
    }
}

fn empty_or_missing(path: &FieldPath) -> DocGraphResult<MatchCondition> {
    let present = non_empty_array(path).into_document()?;
    Ok(MatchCondition::Document(single_map(
        mongo::NOR,
        json!([present]),
    )))
}

/// ANDs complete documents into one
pub fn and_documents(mut docs: Vec<JsonMap>) -> JsonMap {
    match docs.len() {
        0 => JsonMap::new(),
        1 => docs.remove(0),
        _ => single_map(
            mongo::AND,
            Value::Array(docs.into_iter().map(Value::Object).collect()),
        ),
    }
}

/// Values of an `$eq`/`$in` or `$ne`/`$nin` operator as a list
fn operand_set(op: &str, value: &Value) -> Vec<Value> {
    match op {
        mongo::IN | mongo::NIN => to_list(value),
        _ => vec![value.clone()],
    }
}

/// Adds `op: value` to an operator map that describes a single element.
/// Equality operators intersect, inequality operators union.
fn merge_element_op(ops: &mut JsonMap, op: &str, value: Value) -> DocGraphResult<()> {
    let (family, combined_op) = match op {
        mongo::EQ | mongo::IN => ([mongo::EQ, mongo::IN], mongo::IN),
        mongo::NE | mongo::NIN => ([mongo::NE, mongo::NIN], mongo::NIN),
        _ => {
            if ops.contains_key(op) {
                return Err(DocGraphError::schema(format!(
                    "Conflicting element filter operations on {op}"
                )));
            }
            ops.insert(op.to_string(), value);
            return Ok(());
        }
    };

    let existing = family
        .iter()
        .find_map(|x| ops.remove(*x).map(|v| (*x, v)));
    let incoming = operand_set(op, &value);
    let merged = match existing {
        None => {
            ops.insert(op.to_string(), value);
            return Ok(());
        }
        Some((existing_op, existing_value)) => {
            let current = operand_set(existing_op, &existing_value);
            if combined_op == mongo::IN {
                current
                    .into_iter()
                    .filter(|x| incoming.iter().any(|y| values_equal(x, y)))
                    .collect::<Vec<_>>()
            } else {
                let mut union = current;
                for x in incoming {
                    if !union.iter().any(|y| values_equal(&x, y)) {
                        union.push(x);
                    }
                }
                union
            }
        }
    };
    ops.insert(combined_op.to_string(), Value::Array(merged));
    Ok(())
}

/// Negation of a single element operator, in operator form
fn negate_element_op(op: &str, value: Value) -> Value {
    match op {
        mongo::EQ => single(mongo::NE, value),
        mongo::NE => single(mongo::EQ, value),
        mongo::IN => single(mongo::NIN, value),
        mongo::NIN => single(mongo::IN, value),
        mongo::NOT => value,
        _ => single(mongo::NOT, single(op, value)),
    }
}

impl MatchTarget {
    /// Combines conditions over a single list element into the operand of
    /// `$elemMatch` or `$pull`: an operator map for scalar elements, a query
    /// document for object elements.
    pub fn element_condition(
        &self,
        kind: ElementKind,
        element: Vec<MatchCondition>,
    ) -> DocGraphResult<JsonMap> {
        match kind {
            ElementKind::Scalar => {
                let mut merged = JsonMap::new();
                for condition in element {
                    match condition {
                        MatchCondition::Field { path, ops } if path.is_empty() => {
                            for (op, value) in ops {
                                merge_element_op(&mut merged, &op, value)?;
                            }
                        }
                        _ => {
                            return Err(DocGraphError::schema(
                                "Scalar element filter produced a field condition",
                            ))
                        }
                    }
                }
                Ok(merged)
            }
            ElementKind::Object => Ok(and_documents(
                element
                    .into_iter()
                    .map(MatchCondition::into_document)
                    .collect::<DocGraphResult<_>>()?,
            )),
        }
    }
}

impl FilterTarget for MatchTarget {
    type Condition = MatchCondition;

    fn exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<MatchCondition> {
        let op = match exists {
            true => mongo::NE,
            false => mongo::EQ,
        };
        Ok(MatchCondition::field(path, op, Value::Null))
    }

    fn list_exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<MatchCondition> {
        let is_array = json!("array");
        Ok(match exists {
            true => MatchCondition::field(path, mongo::TYPE, is_array),
            false => MatchCondition::field(path, mongo::NOT, single(mongo::TYPE, is_array)),
        })
    }

    fn eq(&self, path: &FieldPath, value: &Value) -> DocGraphResult<MatchCondition> {
        let op = match value.is_array() {
            true => mongo::IN,
            false => mongo::EQ,
        };
        Ok(MatchCondition::field(path, op, value.clone()))
    }

    fn ne(&self, path: &FieldPath, value: &Value) -> DocGraphResult<MatchCondition> {
        let op = match value.is_array() {
            true => mongo::NIN,
            false => mongo::NE,
        };
        Ok(MatchCondition::field(path, op, value.clone()))
    }

    fn compare(
        &self,
        path: &FieldPath,
        op: CompareOp,
        value: &Value,
    ) -> DocGraphResult<MatchCondition> {
        let op = match op {
            CompareOp::Gt => mongo::GT,
            CompareOp::Gte => mongo::GTE,
            CompareOp::Lt => mongo::LT,
            CompareOp::Lte => mongo::LTE,
        };
        Ok(MatchCondition::field(path, op, value.clone()))
    }

    fn matches(&self, path: &FieldPath, pattern: &str) -> DocGraphResult<MatchCondition> {
        Ok(MatchCondition::field(path, mongo::REGEX, json!(pattern)))
    }

    fn type_suffix(
        &self,
        path: &FieldPath,
        suffixes: &[String],
        negated: bool,
    ) -> DocGraphResult<Vec<MatchCondition>> {
        if negated {
            return Ok(suffixes
                .iter()
                .map(|x| {
                    let pattern = format!("{}$", regex::escape(x));
                    MatchCondition::field(path, mongo::NOT, single(mongo::REGEX, json!(pattern)))
                })
                .collect());
        }
        if suffixes.is_empty() {
            return Ok(vec![MatchCondition::field(path, mongo::IN, json!([]))]);
        }
        let alternatives: Vec<String> = suffixes.iter().map(|x| regex::escape(x)).collect();
        let pattern = format!("(?:{})$", alternatives.join("|"));
        Ok(vec![MatchCondition::field(path, mongo::REGEX, json!(pattern))])
    }

    fn length(&self, path: &FieldPath, length: u64) -> DocGraphResult<MatchCondition> {
        Ok(MatchCondition::field(path, mongo::SIZE, json!(length)))
    }

    fn empty(&self, path: &FieldPath, empty: bool) -> DocGraphResult<MatchCondition> {
        // `$not: {$size: 0}` alone also matches a missing field
        Ok(match empty {
            true => MatchCondition::field(path, mongo::SIZE, json!(0)),
            false => non_empty_array(path),
        })
    }

    fn elements(
        &self,
        path: &FieldPath,
        quantifier: Quantifier,
        kind: ElementKind,
        element: Vec<MatchCondition>,
    ) -> DocGraphResult<Vec<MatchCondition>> {
        if element.is_empty() {
            return Ok(match quantifier {
                Quantifier::Any => vec![non_empty_array(path)],
                Quantifier::All => vec![],
                Quantifier::NoneOf => vec![empty_or_missing(path)?],
            });
        }

        match (quantifier, kind) {
            (Quantifier::Any, _) => {
                let inner = self.element_condition(kind, element)?;
                Ok(vec![MatchCondition::field(
                    path,
                    mongo::ELEM_MATCH,
                    Value::Object(inner),
                )])
            }
            (Quantifier::NoneOf, _) => {
                let inner = self.element_condition(kind, element)?;
                Ok(vec![MatchCondition::field(
                    path,
                    mongo::NOT,
                    single(mongo::ELEM_MATCH, Value::Object(inner)),
                )])
            }
            (Quantifier::All, ElementKind::Scalar) => {
                let mut conditions = vec![];
                for condition in element {
                    let ops = match condition {
                        MatchCondition::Field { path, ops } if path.is_empty() => ops,
                        _ => {
                            return Err(DocGraphError::schema(
                                "Scalar element filter produced a field condition",
                            ))
                        }
                    };
                    for (op, value) in ops {
                        conditions.push(MatchCondition::field(
                            path,
                            mongo::NOT,
                            single(mongo::ELEM_MATCH, negate_element_op(&op, value)),
                        ));
                    }
                }
                Ok(conditions)
            }
            (Quantifier::All, ElementKind::Object) => {
                let inner = self.element_condition(kind, element)?;
                let failing = single(mongo::NOR, json!([inner]));
                Ok(vec![MatchCondition::field(
                    path,
                    mongo::NOT,
                    single(mongo::ELEM_MATCH, failing),
                )])
            }
        }
    }
}

/// Compiles `filter` against `type_` into a list of query documents,
/// implicitly ANDed. `prefix` is where the filtered object lives in each
/// document (e.g. `node`).
pub fn compile_match(
    ctx: CompileContext<'_>,
    filter: &Value,
    type_: &TypeDescriptor,
    prefix: &FieldPath,
) -> DocGraphResult<Vec<JsonMap>> {
    let compiler = FilterCompiler::new(ctx, MatchTarget);
    compiler
        .compile_object(filter, type_, prefix)?
        .into_iter()
        .map(MatchCondition::into_document)
        .collect()
}

/// Wraps query documents into a `$match` stage; `None` when there is nothing to match
pub fn match_stage(conditions: Vec<JsonMap>) -> Option<JsonMap> {
    if conditions.is_empty() {
        return None;
    }
    Some(single_map(mongo::MATCH, Value::Object(and_documents(conditions))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::test_support::{fixture_schema, matches_query};
    use serde_json::json;

    fn compile(type_name: &str, filter: Value) -> DocGraphResult<Vec<JsonMap>> {
        let schema = fixture_schema();
        let config = ConnectionConfig::default();
        let ctx = CompileContext::new(&schema, &config);
        let type_ = schema.require(type_name)?.clone();
        compile_match(ctx, &filter, &type_, &FieldPath::from_dotted("node"))
    }

    #[test]
    fn test_scalar_operators() {
        let conds = compile(
            "User",
            json!({ "name": { "eq": "ann", "matches": "^a" }, "age": { "gte": 18 } }),
        )
        .unwrap();
        assert_eq!(
            conds,
            vec![
                single_map("node.name", json!({ "$eq": "ann" })),
                single_map("node.name", json!({ "$regex": "^a" })),
                single_map("node.age", json!({ "$gte": 18 })),
            ]
        );
    }

    #[test]
    fn test_eq_and_ne_sets() {
        let conds = compile("User", json!({ "name": { "eq": ["a", "b"], "ne": ["c"] } })).unwrap();
        assert_eq!(
            conds,
            vec![
                single_map("node.name", json!({ "$in": ["a", "b"] })),
                single_map("node.name", json!({ "$nin": ["c"] })),
            ]
        );
    }

    #[test]
    fn test_nested_object_exists_guard() {
        let conds = compile(
            "User",
            json!({ "address": { "exists": true, "city": { "eq": "Oslo" } } }),
        )
        .unwrap();
        assert_eq!(
            conds,
            vec![
                single_map("node.address", json!({ "$ne": null })),
                single_map("node.address.city", json!({ "$eq": "Oslo" })),
            ]
        );
    }

    #[test]
    fn test_top_level_exists_adds_nothing() {
        assert!(compile("User", json!({ "exists": false })).unwrap().is_empty());
        assert!(compile("User", json!({ "exists": true })).unwrap().is_empty());
        assert!(compile("User", json!({ "exists": 1 })).is_err());
    }

    #[test]
    fn test_empty_false_excludes_missing_field() {
        let conds = compile("User", json!({ "tags": { "empty": false } })).unwrap();
        let doc = Value::Object(and_documents(conds));
        assert!(!matches_query(&doc, &json!({ "node": {} })));
        assert!(!matches_query(&doc, &json!({ "node": { "tags": [] } })));
        assert!(matches_query(&doc, &json!({ "node": { "tags": ["x"] } })));
    }

    #[test]
    fn test_some_merges_scalar_element_operators() {
        let conds = compile(
            "User",
            json!({ "tags": { "some": { "exists": true, "ne": "x" } } }),
        )
        .unwrap();
        assert_eq!(
            conds,
            vec![single_map(
                "node.tags",
                json!({ "$elemMatch": { "$nin": [null, "x"] } })
            )]
        );
    }

    #[test]
    fn test_every_distributes_over_element_conditions() {
        let conds = compile(
            "User",
            json!({ "scores": { "every": { "gt": 1, "lte": 9 } } }),
        )
        .unwrap();
        assert_eq!(
            conds,
            vec![
                single_map(
                    "node.scores",
                    json!({ "$not": { "$elemMatch": { "$not": { "$gt": 1 } } } })
                ),
                single_map(
                    "node.scores",
                    json!({ "$not": { "$elemMatch": { "$not": { "$lte": 9 } } } })
                ),
            ]
        );
    }

    #[test]
    fn test_object_list_every_uses_nor() {
        let conds = compile(
            "User",
            json!({ "posts": { "every": { "title": { "exists": true } } } }),
        )
        .unwrap();
        assert_eq!(
            conds,
            vec![single_map(
                "node.posts",
                json!({ "$not": { "$elemMatch": { "$nor": [{ "title": { "$ne": null } }] } } })
            )]
        );
    }

    #[test]
    fn test_node_union_type_filter_uses_suffix_regex() {
        let conds = compile("Actor", json!({ "type": { "eq": ["User", "Bot"] } })).unwrap();
        let pattern = format!(
            "(?:{}|{})$",
            regex::escape(".VXNlcg"),
            regex::escape(".Qm90")
        );
        assert_eq!(conds, vec![single_map("node.id", json!({ "$regex": pattern }))]);

        let conds = compile("Actor", json!({ "type": { "ne": ["Bot"] } })).unwrap();
        assert_eq!(
            conds,
            vec![single_map(
                "node.id",
                json!({ "$not": { "$regex": format!("{}$", regex::escape(".Qm90")) } })
            )]
        );
    }

    #[test]
    fn test_non_node_interface_uses_discriminator() {
        let conds = compile(
            "Place",
            json!({ "type": { "eq": ["Address"] }, "city": { "eq": "Rome" } }),
        )
        .unwrap();
        assert_eq!(
            conds,
            vec![
                single_map("node._type", json!({ "$in": ["Address"] })),
                single_map("node.city", json!({ "$eq": "Rome" })),
            ]
        );
    }

    #[test]
    fn test_schema_mismatches_are_errors() {
        assert!(matches!(
            compile("User", json!({ "nope": { "eq": 1 } })),
            Err(DocGraphError::FieldNotFound { .. })
        ));
        assert!(matches!(
            compile("User", json!({ "type": { "eq": ["User"] } })),
            Err(DocGraphError::Schema { .. })
        ));
        assert!(matches!(
            compile("Address", json!({ "id": { "eq": "1" } })),
            Err(DocGraphError::Schema { .. })
        ));
        assert!(matches!(
            compile("Actor", json!({ "type": { "eq": ["Address"] } })),
            Err(DocGraphError::Schema { .. })
        ));
    }

    #[test]
    fn test_match_stage_wraps_conditions() {
        assert_eq!(match_stage(vec![]), None);
        let stage = match_stage(vec![single_map("a", json!(1)), single_map("b", json!(2))]);
        assert_eq!(
            stage,
            Some(single_map("$match", json!({ "$and": [{ "a": 1 }, { "b": 2 }] })))
        );
    }
}
