use crate::constants::filter as ops;
use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult};
use crate::schema::{FieldCategory, FieldDescriptor, TypeDescriptor, TypeKind};
use crate::value::to_list;
use serde_json::Value;
use std::str::FromStr;

/// Where a path starts: the document being filtered, or an element of an
/// enclosing list quantifier (identified by nesting depth).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathRoot {
    Document,
    Element(usize),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldPath {
    pub root: PathRoot,
    pub segments: Vec<String>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self {
            root: PathRoot::Document,
            segments: vec![],
        }
    }

    pub fn element(depth: usize) -> Self {
        Self {
            root: PathRoot::Element(depth),
            segments: vec![],
        }
    }

    /// Parses a dotted prefix such as `node.author`. An empty string is the root.
    pub fn from_dotted(dotted: &str) -> Self {
        Self {
            root: PathRoot::Document,
            segments: dotted
                .split('.')
                .filter(|x| !x.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            root: self.root,
            segments,
        }
    }

    /// Appends every segment of a dotted path
    pub fn child_dotted(&self, dotted: &str) -> Self {
        let mut path = self.clone();
        path.segments
            .extend(dotted.split('.').filter(|x| !x.is_empty()).map(str::to_string));
        path
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Nesting depth for a list quantifier opened at this path
    pub fn next_element_depth(&self) -> usize {
        match self.root {
            PathRoot::Document => 0,
            PathRoot::Element(depth) => depth + 1,
        }
    }

    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Gt => ordering == Greater,
            Self::Gte => ordering != Less,
            Self::Lt => ordering == Less,
            Self::Lte => ordering != Greater,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            ops::GT => Ok(Self::Gt),
            ops::GTE => Ok(Self::Gte),
            ops::LT => Ok(Self::Lt),
            ops::LTE => Ok(Self::Lte),
            _ => Err(format!("Invalid comparison operation {input}")),
        }
    }
}

/// `some` / `every` / `none` over list elements
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quantifier {
    Any,
    All,
    NoneOf,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElementKind {
    Scalar,
    Object,
}

/// One rendering of the filter grammar.
///
/// Conditions returned from a single object or scalar filter are implicitly
/// ANDed by the caller.
pub trait FilterTarget {
    type Condition;

    /// Scalar present and not null; or missing/null when `exists` is false
    fn exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<Self::Condition>;

    /// Field holds an array (possibly empty); or does not
    fn list_exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<Self::Condition>;

    /// Equal to `value`, or to any member when `value` is a list
    fn eq(&self, path: &FieldPath, value: &Value) -> DocGraphResult<Self::Condition>;

    /// Equal to neither `value` nor, when a list, any of its members
    fn ne(&self, path: &FieldPath, value: &Value) -> DocGraphResult<Self::Condition>;

    fn compare(
        &self,
        path: &FieldPath,
        op: CompareOp,
        value: &Value,
    ) -> DocGraphResult<Self::Condition>;

    fn matches(&self, path: &FieldPath, pattern: &str) -> DocGraphResult<Self::Condition>;

    /// Identifier at `path` ends with one of `suffixes` (OR), or with none of
    /// them when `negated` (AND of not-ends-with).
    fn type_suffix(
        &self,
        path: &FieldPath,
        suffixes: &[String],
        negated: bool,
    ) -> DocGraphResult<Vec<Self::Condition>>;

    fn length(&self, path: &FieldPath, length: u64) -> DocGraphResult<Self::Condition>;

    /// Present array with no elements; or present array with at least one
    fn empty(&self, path: &FieldPath, empty: bool) -> DocGraphResult<Self::Condition>;

    /// `element` conditions are relative to `FieldPath::element(depth)` for
    /// `depth == path.next_element_depth()`.
    fn elements(
        &self,
        path: &FieldPath,
        quantifier: Quantifier,
        kind: ElementKind,
        element: Vec<Self::Condition>,
    ) -> DocGraphResult<Vec<Self::Condition>>;
}

pub struct FilterCompiler<'a, T> {
    pub ctx: CompileContext<'a>,
    pub target: T,
}

fn expect_bool(op: &str, value: &Value) -> DocGraphResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| DocGraphError::argument(format!("`{op}` expects a boolean")))
}

fn expect_object<'v>(
    value: &'v Value,
    what: &str,
) -> DocGraphResult<Option<&'v serde_json::Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(DocGraphError::schema(format!("Expected an object for {what}"))),
    }
}

impl<'a, T: FilterTarget> FilterCompiler<'a, T> {
    pub fn new(ctx: CompileContext<'a>, target: T) -> Self {
        Self { ctx, target }
    }

    /// Compiles an object/interface/union filter for the object found at
    /// `path`: a connection node or a list element. Such an object always
    /// exists, so a top-level `exists` adds no condition.
    pub fn compile_object(
        &self,
        filter: &Value,
        type_: &TypeDescriptor,
        path: &FieldPath,
    ) -> DocGraphResult<Vec<T::Condition>> {
        self.compile_object_at(filter, type_, path, false)
    }

    fn compile_object_at(
        &self,
        filter: &Value,
        type_: &TypeDescriptor,
        path: &FieldPath,
        embedded: bool,
    ) -> DocGraphResult<Vec<T::Condition>> {
        let mut conditions = vec![];
        let map = match expect_object(filter, &format!("{} filter", type_.name))? {
            Some(map) => map,
            None => return Ok(conditions),
        };

        for (key, value) in map {
            // Null literals are treated as absent
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                ops::EXISTS => {
                    let exists = expect_bool(key, value)?;
                    if embedded {
                        conditions.push(self.target.exists(path, exists)?);
                    }
                }
                ops::ID => {
                    if !type_.is_node {
                        return Err(DocGraphError::schema(format!(
                            "`id` filter on {} which is not a node type",
                            type_.name
                        )));
                    }
                    let id_path = path.child(&self.ctx.config.id_field);
                    conditions.extend(self.compile_scalar(value, &id_path)?);
                }
                ops::TYPE => {
                    conditions.extend(self.compile_type_filter(value, type_, path)?);
                }
                field_name => {
                    if matches!(type_.kind, TypeKind::Union | TypeKind::Enum) {
                        return Err(DocGraphError::schema(format!(
                            "{} has no filterable fields, found {field_name}",
                            type_.name
                        )));
                    }
                    let field = type_.require_field(field_name)?;
                    conditions.extend(self.compile_field(field, value, &path.child(field_name))?);
                }
            }
        }
        Ok(conditions)
    }

    fn compile_type_filter(
        &self,
        filter: &Value,
        type_: &TypeDescriptor,
        path: &FieldPath,
    ) -> DocGraphResult<Vec<T::Condition>> {
        if !type_.is_abstract() {
            return Err(DocGraphError::schema(format!(
                "`type` filter on {} which is neither a union nor an interface",
                type_.name
            )));
        }
        let mut conditions = vec![];
        let map = match expect_object(filter, "type filter")? {
            Some(map) => map,
            None => return Ok(conditions),
        };

        for (op, names) in map {
            if names.is_null() {
                continue;
            }
            let names: Vec<String> = to_list(names)
                .into_iter()
                .map(|x| match x {
                    Value::String(name) if type_.possible_types.contains(&name) => Ok(name),
                    other => Err(DocGraphError::schema(format!(
                        "{other} is not a possible type of {}",
                        type_.name
                    ))),
                })
                .collect::<DocGraphResult<_>>()?;

            let negated = match op.as_str() {
                ops::EQ => false,
                ops::NE => true,
                _ => {
                    return Err(DocGraphError::schema(format!(
                        "Invalid type filter operation {op}"
                    )))
                }
            };

            if type_.is_node {
                let suffixes: Vec<String> = names
                    .iter()
                    .map(|x| self.ctx.encoder.encode_type_name(x))
                    .collect();
                let id_path = path.child(&self.ctx.config.id_field);
                conditions.extend(self.target.type_suffix(&id_path, &suffixes, negated)?);
            } else {
                let type_path = path.child(&self.ctx.config.type_field);
                let names = Value::Array(names.into_iter().map(Value::String).collect());
                conditions.push(match negated {
                    false => self.target.eq(&type_path, &names)?,
                    true => self.target.ne(&type_path, &names)?,
                });
            }
        }
        Ok(conditions)
    }

    fn compile_field(
        &self,
        field: &FieldDescriptor,
        filter: &Value,
        path: &FieldPath,
    ) -> DocGraphResult<Vec<T::Condition>> {
        match field.category {
            FieldCategory::Scalar | FieldCategory::Numeric | FieldCategory::Node => {
                self.compile_scalar(filter, path)
            }
            FieldCategory::Object => {
                let nested = self.ctx.schema.require(&field.type_name)?;
                self.compile_object_at(filter, nested, path, true)
            }
            FieldCategory::ScalarList | FieldCategory::NodeList | FieldCategory::ObjectList => {
                self.compile_list(field, filter, path)
            }
            FieldCategory::Connection => Err(DocGraphError::schema(format!(
                "Connection field {} is not filterable",
                field.name
            ))),
        }
    }

    /// Compiles a scalar filter for the value at `path`
    pub fn compile_scalar(
        &self,
        filter: &Value,
        path: &FieldPath,
    ) -> DocGraphResult<Vec<T::Condition>> {
        let mut conditions = vec![];
        let map = match expect_object(filter, "scalar filter")? {
            Some(map) => map,
            None => return Ok(conditions),
        };

        for (op, value) in map {
            if value.is_null() {
                continue;
            }
            let condition = match op.as_str() {
                ops::EXISTS => self.target.exists(path, expect_bool(op, value)?)?,
                ops::EQ => self.target.eq(path, value)?,
                ops::NE => self.target.ne(path, value)?,
                ops::GT | ops::GTE | ops::LT | ops::LTE => {
                    if !matches!(value, Value::Number(_) | Value::String(_) | Value::Bool(_)) {
                        return Err(DocGraphError::argument(format!(
                            "`{op}` expects a scalar operand, got {value}"
                        )));
                    }
                    let compare_op = CompareOp::from_str(op).map_err(DocGraphError::schema)?;
                    self.target.compare(path, compare_op, value)?
                }
                ops::MATCHES => match value {
                    Value::String(pattern) => self.target.matches(path, pattern)?,
                    _ => return Err(DocGraphError::argument("`matches` expects a string")),
                },
                _ => {
                    return Err(DocGraphError::schema(format!(
                        "Invalid scalar filter operation {op}"
                    )))
                }
            };
            conditions.push(condition);
        }
        Ok(conditions)
    }

    fn compile_list(
        &self,
        field: &FieldDescriptor,
        filter: &Value,
        path: &FieldPath,
    ) -> DocGraphResult<Vec<T::Condition>> {
        let mut conditions = vec![];
        let map = match expect_object(filter, "list filter")? {
            Some(map) => map,
            None => return Ok(conditions),
        };

        for (op, value) in map {
            if value.is_null() {
                continue;
            }
            match op.as_str() {
                ops::EXISTS => {
                    conditions.push(self.target.list_exists(path, expect_bool(op, value)?)?)
                }
                ops::LENGTH => {
                    let length = value.as_u64().ok_or_else(|| {
                        DocGraphError::argument("`length` expects a non-negative integer")
                    })?;
                    conditions.push(self.target.length(path, length)?);
                }
                ops::EMPTY => conditions.push(self.target.empty(path, expect_bool(op, value)?)?),
                ops::SOME | ops::EVERY | ops::NONE => {
                    let quantifier = match op.as_str() {
                        ops::SOME => Quantifier::Any,
                        ops::EVERY => Quantifier::All,
                        _ => Quantifier::NoneOf,
                    };
                    let element_path = FieldPath::element(path.next_element_depth());
                    let (kind, element) = match field.category {
                        FieldCategory::ObjectList => {
                            let element_type = self.ctx.schema.require(&field.type_name)?;
                            (
                                ElementKind::Object,
                                self.compile_object(value, element_type, &element_path)?,
                            )
                        }
                        _ => (
                            ElementKind::Scalar,
                            self.compile_scalar(value, &element_path)?,
                        ),
                    };
                    conditions.extend(self.target.elements(path, quantifier, kind, element)?);
                }
                _ => {
                    return Err(DocGraphError::schema(format!(
                        "Invalid list filter operation {op}"
                    )))
                }
            }
        }
        Ok(conditions)
    }
}
