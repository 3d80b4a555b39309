use crate::constants::{filter as filter_keys, mongo};
use crate::context::CompileContext;
use crate::error::DocGraphResult;
use crate::filter::FieldPath;
use crate::filter_match::{and_documents, compile_match};
use crate::filter_predicate::{compile_predicate, Predicate};
use crate::schema::TypeDescriptor;
use crate::value::{single, single_map, JsonMap};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub enum Permission {
    /// The viewer sees no instance of the type
    Denied,
    Unrestricted,
    /// The viewer sees instances matching this filter expression over the type
    Filtered(Value),
}

pub trait PermissionFilter: Send + Sync {
    fn permission(&self, type_name: &str) -> Permission;
}

/// Grants everything
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionFilter for AllowAll {
    fn permission(&self, _type_name: &str) -> Permission {
        Permission::Unrestricted
    }
}

impl<F> PermissionFilter for F
where
    F: Fn(&str) -> Permission + Send + Sync,
{
    fn permission(&self, type_name: &str) -> Permission {
        self(type_name)
    }
}

/// Per-member permissions for the concrete types behind `node_type`
fn member_permissions(
    permissions: &dyn PermissionFilter,
    node_type: &TypeDescriptor,
) -> Vec<(String, Permission)> {
    let members = match node_type.is_abstract() {
        true => node_type.possible_types.clone(),
        false => vec![node_type.name.clone()],
    };
    members
        .into_iter()
        .map(|member| {
            let permission = permissions.permission(&member);
            (member, permission)
        })
        .collect()
}

/// Query document no document satisfies
fn match_nothing() -> JsonMap {
    single_map(mongo::NOR, json!([{}]))
}

fn type_guard_filter(member: &str) -> Value {
    single(filter_keys::TYPE, single(filter_keys::EQ, json!([member])))
}

/// Match conditions restricting a connection over `node_type` (found at
/// `prefix` in each document) to what the viewer may see. `None` when there is
/// no restriction.
pub fn permission_match(
    ctx: CompileContext<'_>,
    permissions: &dyn PermissionFilter,
    node_type: &TypeDescriptor,
    prefix: &FieldPath,
) -> DocGraphResult<Option<JsonMap>> {
    let members = member_permissions(permissions, node_type);
    if members
        .iter()
        .all(|(_, x)| matches!(x, Permission::Unrestricted))
    {
        return Ok(None);
    }

    let mut branches = vec![];
    for (member, permission) in &members {
        let member_filter = match permission {
            Permission::Denied => continue,
            Permission::Unrestricted => vec![],
            Permission::Filtered(filter) => {
                let member_type = ctx.schema.require(member)?;
                compile_match(ctx, filter, member_type, prefix)?
            }
        };
        let mut conditions = match node_type.is_abstract() {
            true => compile_match(ctx, &type_guard_filter(member), node_type, prefix)?,
            false => vec![],
        };
        conditions.extend(member_filter);
        branches.push(and_documents(conditions));
    }

    Ok(Some(match branches.len() {
        0 => {
            warn!(type_name = %node_type.name, "every member type is hidden from the viewer");
            match_nothing()
        }
        1 => branches.remove(0),
        _ => single_map(
            mongo::OR,
            Value::Array(branches.into_iter().map(Value::Object).collect()),
        ),
    }))
}

/// In-memory counterpart of [`permission_match`], over node values
pub fn permission_predicate(
    ctx: CompileContext<'_>,
    permissions: &dyn PermissionFilter,
    node_type: &TypeDescriptor,
) -> DocGraphResult<Option<Predicate>> {
    let members = member_permissions(permissions, node_type);
    if members
        .iter()
        .all(|(_, x)| matches!(x, Permission::Unrestricted))
    {
        return Ok(None);
    }

    let mut branches: Vec<(Option<Predicate>, Option<Predicate>)> = vec![];
    for (member, permission) in &members {
        let member_filter = match permission {
            Permission::Denied => continue,
            Permission::Unrestricted => None,
            Permission::Filtered(filter) => {
                let member_type = ctx.schema.require(member)?;
                Some(compile_predicate(ctx, filter, member_type)?)
            }
        };
        let guard = match node_type.is_abstract() {
            true => Some(compile_predicate(ctx, &type_guard_filter(member), node_type)?),
            false => None,
        };
        branches.push((guard, member_filter));
    }
    if branches.is_empty() {
        warn!(type_name = %node_type.name, "every member type is hidden from the viewer");
    }

    Ok(Some(Arc::new(move |node: &Value| {
        branches.iter().any(|(guard, filter)| {
            guard.as_ref().map_or(true, |p| p(node)) && filter.as_ref().map_or(true, |p| p(node))
        })
    })))
}
