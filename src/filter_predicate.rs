use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult};
use crate::filter::{CompareOp, ElementKind, FieldPath, FilterCompiler, FilterTarget, Quantifier};
use crate::schema::TypeDescriptor;
use crate::value::{compare_values, lookup, optional_equals, present, same_type_class};
use cached::proc_macro::cached;
use cached::SizedCache;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[cached(
    type = "SizedCache<String, Result<Regex, String>>",
    create = "{ SizedCache::with_size(250) }",
    convert = r#"{ pattern.to_string() }"#,
    sync_writes = true
)]
fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| e.to_string())
}

fn all(predicates: Vec<Predicate>) -> Predicate {
    Arc::new(move |value| predicates.iter().all(|p| p(value)))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PredicateTarget;

impl FilterTarget for PredicateTarget {
    type Condition = Predicate;

    fn exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<Predicate> {
        let segments = path.segments.clone();
        Ok(Arc::new(move |value| {
            present(lookup(value, &segments)).is_some() == exists
        }))
    }

    fn list_exists(&self, path: &FieldPath, exists: bool) -> DocGraphResult<Predicate> {
        let segments = path.segments.clone();
        Ok(Arc::new(move |value| {
            matches!(lookup(value, &segments), Some(Value::Array(_))) == exists
        }))
    }

    fn eq(&self, path: &FieldPath, literal: &Value) -> DocGraphResult<Predicate> {
        let segments = path.segments.clone();
        let literal = literal.clone();
        Ok(Arc::new(move |value| {
            let found = lookup(value, &segments);
            match &literal {
                Value::Array(options) => options.iter().any(|x| optional_equals(found, x)),
                x => optional_equals(found, x),
            }
        }))
    }

    fn ne(&self, path: &FieldPath, literal: &Value) -> DocGraphResult<Predicate> {
        let eq = self.eq(path, literal)?;
        Ok(Arc::new(move |value| !eq(value)))
    }

    fn compare(&self, path: &FieldPath, op: CompareOp, literal: &Value) -> DocGraphResult<Predicate> {
        let segments = path.segments.clone();
        let literal = literal.clone();
        Ok(Arc::new(move |value| match present(lookup(value, &segments)) {
            Some(found) if same_type_class(found, &literal) => {
                op.holds(compare_values(found, &literal))
            }
            _ => false,
        }))
    }

    fn matches(&self, path: &FieldPath, pattern: &str) -> DocGraphResult<Predicate> {
        let regex = compile_pattern(pattern)
            .map_err(|e| DocGraphError::argument(format!("Invalid `matches` pattern: {e}")))?;
        let segments = path.segments.clone();
        Ok(Arc::new(move |value| match lookup(value, &segments) {
            Some(Value::String(s)) => regex.is_match(s),
            _ => false,
        }))
    }

    fn type_suffix(
        &self,
        path: &FieldPath,
        suffixes: &[String],
        negated: bool,
    ) -> DocGraphResult<Vec<Predicate>> {
        let segments = Arc::new(path.segments.clone());
        let id_of = move |value: &Value| -> String {
            lookup(value, segments.as_slice())
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        if negated {
            return Ok(suffixes
                .iter()
                .cloned()
                .map(|suffix| {
                    let id_of = id_of.clone();
                    Arc::new(move |value: &Value| !id_of(value).ends_with(&suffix)) as Predicate
                })
                .collect());
        }
        let suffixes = suffixes.to_vec();
        Ok(vec![Arc::new(move |value: &Value| {
            let id = id_of(value);
            suffixes.iter().any(|x| id.ends_with(x))
        })])
    }

    fn length(&self, path: &FieldPath, length: u64) -> DocGraphResult<Predicate> {
        let segments = path.segments.clone();
        Ok(Arc::new(move |value| match lookup(value, &segments) {
            Some(Value::Array(items)) => items.len() as u64 == length,
            _ => false,
        }))
    }

    fn empty(&self, path: &FieldPath, empty: bool) -> DocGraphResult<Predicate> {
        let segments = path.segments.clone();
        Ok(Arc::new(move |value| match lookup(value, &segments) {
            Some(Value::Array(items)) => items.is_empty() == empty,
            _ => false,
        }))
    }

    fn elements(
        &self,
        path: &FieldPath,
        quantifier: Quantifier,
        _kind: ElementKind,
        element: Vec<Predicate>,
    ) -> DocGraphResult<Vec<Predicate>> {
        let segments = path.segments.clone();
        let element = all(element);
        Ok(vec![Arc::new(move |value| {
            let items: &[Value] = match lookup(value, &segments) {
                Some(Value::Array(items)) => items,
                _ => &[],
            };
            match quantifier {
                Quantifier::Any => items.iter().any(|x| element(x)),
                Quantifier::All => items.iter().all(|x| element(x)),
                Quantifier::NoneOf => !items.iter().any(|x| element(x)),
            }
        })])
    }
}

/// Compiles an object filter into a predicate over the object itself
pub fn compile_predicate(
    ctx: CompileContext<'_>,
    filter: &Value,
    type_: &TypeDescriptor,
) -> DocGraphResult<Predicate> {
    let compiler = FilterCompiler::new(ctx, PredicateTarget);
    Ok(all(compiler.compile_object(filter, type_, &FieldPath::root())?))
}

/// Compiles a scalar filter into a predicate over a single scalar value
pub fn compile_scalar_predicate(
    ctx: CompileContext<'_>,
    filter: &Value,
) -> DocGraphResult<Predicate> {
    let compiler = FilterCompiler::new(ctx, PredicateTarget);
    Ok(all(compiler.compile_scalar(filter, &FieldPath::element(0))?))
}
