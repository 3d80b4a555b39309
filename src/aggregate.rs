use crate::constants::{aggregate as names, mongo};
use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult};
use crate::filter::{FieldPath, FilterTarget};
use crate::filter_aggregate::{all, compile_expr, field_ref, ExprTarget};
use crate::filter_predicate::compile_predicate;
use crate::schema::TypeDescriptor;
use crate::value::{compare_values, lookup, number_from_f64, present, single, JsonMap};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::str::FromStr;

lazy_static! {
    static ref GRAPHQL_NAME_RE: Regex = Regex::new("^[_A-Za-z][_0-9A-Za-z]*$").unwrap();
}

fn is_valid_graphql_name(name: &str) -> bool {
    GRAPHQL_NAME_RE.is_match(name)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl FromStr for AggregateFunction {
    type Err = DocGraphError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            names::COUNT => Ok(Self::Count),
            names::SUM => Ok(Self::Sum),
            names::MIN => Ok(Self::Min),
            names::MAX => Ok(Self::Max),
            names::AVERAGE => Ok(Self::Average),
            _ => Err(DocGraphError::schema(format!(
                "Unknown aggregate function {input}"
            ))),
        }
    }
}

impl AggregateFunction {
    fn reducer(&self) -> &'static str {
        match self {
            Self::Count | Self::Sum => mongo::SUM,
            Self::Min => mongo::MIN,
            Self::Max => mongo::MAX,
            Self::Average => mongo::AVG,
        }
    }

    /// Result when no edge contributes
    fn empty_value(&self) -> Value {
        match self {
            Self::Count | Self::Sum => json!(0),
            Self::Min | Self::Max | Self::Average => Value::Null,
        }
    }
}

/// Field an aggregate reduces over: a (dotted) path within the node, or
/// within the edge
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AggregateField {
    Node(String),
    Edge(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRequest {
    pub alias: String,
    pub function: AggregateFunction,
    pub field: AggregateField,
    /// Filter over the node, on top of the connection's own filter
    pub filter: Option<Value>,
}

impl AggregateRequest {
    pub fn new(
        alias: impl Into<String>,
        function: AggregateFunction,
        node_field: Option<String>,
        edge_field: Option<String>,
        filter: Option<Value>,
    ) -> DocGraphResult<Self> {
        let alias = alias.into();
        if !is_valid_graphql_name(&alias) {
            return Err(DocGraphError::argument(format!(
                "Invalid aggregate alias {alias}"
            )));
        }
        let field = match (node_field, edge_field) {
            (Some(x), None) => AggregateField::Node(x),
            (None, Some(x)) => AggregateField::Edge(x),
            _ => {
                return Err(DocGraphError::argument(format!(
                    "Aggregate {alias} requires exactly one of a node field or an edge field"
                )))
            }
        };
        Ok(Self {
            alias,
            function,
            field,
            filter: filter.filter(|x| !x.is_null()),
        })
    }

    /// Path of the reduced field within an edge document
    fn path(&self, ctx: CompileContext<'_>) -> FieldPath {
        match &self.field {
            AggregateField::Node(x) => FieldPath::from_dotted(&ctx.config.node_path).child_dotted(x),
            AggregateField::Edge(x) => FieldPath::from_dotted(x),
        }
    }

    fn validate(&self, node_type: &TypeDescriptor) -> DocGraphResult<()> {
        if let AggregateField::Node(field) = &self.field {
            let first = field.split('.').next().unwrap_or_default();
            node_type.require_field(first)?;
        }
        Ok(())
    }
}

/// Builds the `$group` stage computing every requested aggregate in one pass.
///
/// `count` counts edges whose field is present and whose filter holds. The
/// other reducers see `null` for edges failing the filter, which they ignore.
pub fn group_stage(
    ctx: CompileContext<'_>,
    requests: &[AggregateRequest],
    node_type: &TypeDescriptor,
) -> DocGraphResult<JsonMap> {
    let node_prefix = FieldPath::from_dotted(&ctx.config.node_path);
    let mut group = JsonMap::new();
    group.insert("_id".to_string(), Value::Null);

    for request in requests {
        request.validate(node_type)?;
        let path = request.path(ctx);
        let filter = match &request.filter {
            Some(filter) => Some(compile_expr(ctx, filter, node_type, &node_prefix)?),
            None => None,
        };

        let operand = match request.function {
            AggregateFunction::Count => {
                let mut conditions: Vec<Value> = filter.into_iter().collect();
                conditions.push(ExprTarget.exists(&path, true)?);
                single(mongo::COND, json!([all(conditions), 1, 0]))
            }
            _ => match filter {
                Some(condition) => single(mongo::COND, json!([condition, field_ref(&path), null])),
                None => field_ref(&path),
            },
        };
        group.insert(
            request.alias.clone(),
            single(request.function.reducer(), operand),
        );
    }
    Ok(single_group(group))
}

fn single_group(group: JsonMap) -> JsonMap {
    let mut stage = JsonMap::new();
    stage.insert(mongo::GROUP.to_string(), Value::Object(group));
    stage
}

/// Reads the aggregate values out of the `$group` output. An empty input
/// produces no group row at all, so every alias falls back to its default.
pub fn fold_results(requests: &[AggregateRequest], rows: &[JsonMap]) -> JsonMap {
    let row = rows.first();
    requests
        .iter()
        .map(|request| {
            let value = row
                .and_then(|x| x.get(&request.alias))
                .filter(|x| !x.is_null())
                .cloned()
                .unwrap_or_else(|| request.function.empty_value());
            (request.alias.clone(), value)
        })
        .collect()
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    int_sum: Option<i64>,
    float_sum: f64,
    numbers: u64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn push(&mut self, value: &Value) {
        self.count += 1;
        if let Value::Number(number) = value {
            self.numbers += 1;
            self.float_sum += number.as_f64().unwrap_or_default();
            self.int_sum = match (self.numbers, number.as_i64()) {
                (1, Some(x)) => Some(x),
                (_, Some(x)) => self.int_sum.and_then(|sum| sum.checked_add(x)),
                (_, None) => None,
            };
        }
        if self.min.as_ref().map_or(true, |x| compare_values(value, x) == Ordering::Less) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().map_or(true, |x| compare_values(value, x) == Ordering::Greater) {
            self.max = Some(value.clone());
        }
    }

    fn finish(self, function: AggregateFunction) -> Value {
        match function {
            AggregateFunction::Count => json!(self.count),
            AggregateFunction::Sum => match (self.numbers, self.int_sum) {
                (0, _) => json!(0),
                (_, Some(x)) => json!(x),
                (_, None) => number_from_f64(self.float_sum).unwrap_or(Value::Null),
            },
            AggregateFunction::Min => self.min.unwrap_or(Value::Null),
            AggregateFunction::Max => self.max.unwrap_or(Value::Null),
            AggregateFunction::Average => match self.numbers {
                0 => Value::Null,
                n => number_from_f64(self.float_sum / n as f64).unwrap_or(Value::Null),
            },
        }
    }
}

/// Computes aggregates over already materialized edge documents
pub fn aggregate_in_memory(
    ctx: CompileContext<'_>,
    requests: &[AggregateRequest],
    node_type: &TypeDescriptor,
    edges: &[Value],
) -> DocGraphResult<JsonMap> {
    let node_path = FieldPath::from_dotted(&ctx.config.node_path);
    let mut results = JsonMap::new();
    for request in requests {
        request.validate(node_type)?;
        let predicate = match &request.filter {
            Some(filter) => Some(compile_predicate(ctx, filter, node_type)?),
            None => None,
        };
        let path = request.path(ctx);
        let mut acc = Accumulator::default();
        for edge in edges {
            let node = lookup(edge, &node_path.segments).unwrap_or(&Value::Null);
            if predicate.as_ref().map_or(false, |p| !p(node)) {
                continue;
            }
            if let Some(value) = present(lookup(edge, &path.segments)) {
                acc.push(value);
            }
        }
        results.insert(request.alias.clone(), acc.finish(request.function));
    }
    Ok(results)
}
