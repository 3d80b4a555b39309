use crate::aggregate::{aggregate_in_memory, fold_results, group_stage, AggregateRequest};
use crate::constants::{args, connection as keys, mongo, pagination as paging};
use crate::context::CompileContext;
use crate::error::{DocGraphError, DocGraphResult, StoreError};
use crate::filter::FieldPath;
use crate::filter_match::{compile_match, match_stage};
use crate::filter_predicate::{compile_predicate, compile_scalar_predicate};
use crate::order::{compile_order, parse_direction, sort_document, sort_objects, sort_scalars};
use crate::pagination::{offset_to_cursor, PageWindow, Pagination};
use crate::permission::{permission_match, permission_predicate, PermissionFilter};
use crate::schema::TypeDescriptor;
use crate::value::{single, single_map, JsonMap};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

/// The document database, as far as connections need it
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<JsonMap>,
    ) -> Result<Vec<JsonMap>, StoreError>;
}

/// Filters and orders selectable by name through `filterBy` / `orderBy`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedExpressions {
    pub filters: HashMap<String, Value>,
    pub orders: HashMap<String, Value>,
}

impl NamedExpressions {
    fn filter(&self, name: &str) -> DocGraphResult<&Value> {
        self.filters
            .get(name)
            .ok_or_else(|| DocGraphError::argument(format!("Unknown {} {name}", args::FILTER_BY)))
    }

    fn order(&self, name: &str) -> DocGraphResult<&Value> {
        self.orders
            .get(name)
            .ok_or_else(|| DocGraphError::argument(format!("Unknown {} {name}", args::ORDER_BY)))
    }
}

/// Where a connection's edges come from
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionSource {
    pub collection: String,
    /// Stages producing one edge document per row, holding the node under
    /// the configured node path next to any edge properties
    pub initial_stages: Vec<JsonMap>,
    pub node_type: String,
    pub named: NamedExpressions,
}

/// Arguments of one connection field
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionRequest {
    pub filter: Option<Value>,
    pub filter_by: Option<String>,
    pub order: Option<Value>,
    pub order_by: Option<String>,
    pub pagination: Pagination,
    pub aggregates: Vec<AggregateRequest>,
}

fn string_arg(arguments: &JsonMap, name: &str) -> DocGraphResult<Option<String>> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(x)) => Ok(Some(x.clone())),
        Some(other) => Err(DocGraphError::argument(format!(
            "`{name}` expects a string, got {other}"
        ))),
    }
}

fn int_arg(arguments: &JsonMap, name: &str) -> DocGraphResult<Option<i64>> {
    match arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => x.as_i64().map(Some).ok_or_else(|| {
            DocGraphError::argument(format!("`{name}` expects an integer, got {x}"))
        }),
    }
}

impl ConnectionRequest {
    /// Reads `filter`, `filterBy`, `order`, `orderBy`, `first`, `last`,
    /// `after` and `before` from field arguments
    pub fn from_arguments(arguments: &JsonMap) -> DocGraphResult<Self> {
        let value_arg = |name: &str| arguments.get(name).filter(|x| !x.is_null()).cloned();
        Ok(Self {
            filter: value_arg(args::FILTER),
            filter_by: string_arg(arguments, args::FILTER_BY)?,
            order: value_arg(args::ORDER),
            order_by: string_arg(arguments, args::ORDER_BY)?,
            pagination: Pagination::new(
                int_arg(arguments, paging::FIRST)?,
                int_arg(arguments, paging::LAST)?,
                string_arg(arguments, paging::AFTER)?,
                string_arg(arguments, paging::BEFORE)?,
            )?,
            aggregates: vec![],
        })
    }

    pub fn with_aggregates(mut self, aggregates: Vec<AggregateRequest>) -> Self {
        self.aggregates = aggregates;
        self
    }

    /// The effective filter; at most one of `filter` and `filterBy`
    fn effective_filter<'a>(&'a self, named: &'a NamedExpressions) -> DocGraphResult<Option<&'a Value>> {
        match (&self.filter, &self.filter_by) {
            (Some(_), Some(_)) => Err(DocGraphError::argument(format!(
                "Only one of `{}` and `{}` may be given",
                args::FILTER,
                args::FILTER_BY
            ))),
            (Some(filter), None) => Ok(Some(filter)),
            (None, Some(name)) => named.filter(name).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// The effective order; at most one of `order` and `orderBy`
    fn effective_order<'a>(&'a self, named: &'a NamedExpressions) -> DocGraphResult<Option<&'a Value>> {
        match (&self.order, &self.order_by) {
            (Some(_), Some(_)) => Err(DocGraphError::argument(format!(
                "Only one of `{}` and `{}` may be given",
                args::ORDER,
                args::ORDER_BY
            ))),
            (Some(order), None) => Ok(Some(order)),
            (None, Some(name)) => named.order(name).map(Some),
            (None, None) => Ok(None),
        }
    }
}

fn connection_value(edges: Vec<Value>, page_info: Value, aggregates: JsonMap) -> Value {
    let mut result = JsonMap::new();
    result.insert(keys::EDGES.to_string(), Value::Array(edges));
    result.insert(keys::PAGE_INFO.to_string(), page_info);
    result.extend(aggregates);
    Value::Object(result)
}

/// Attaches offset cursors to a page of edges starting at `skip`
fn with_cursors(rows: Vec<JsonMap>, skip: u64) -> Vec<Value> {
    rows.into_iter()
        .enumerate()
        .map(|(i, mut row)| {
            row.insert(
                keys::CURSOR.to_string(),
                Value::String(offset_to_cursor(skip + i as u64)),
            );
            Value::Object(row)
        })
        .collect()
}

pub struct ConnectionResolver<'a> {
    pub ctx: CompileContext<'a>,
    pub store: &'a dyn DocumentStore,
    pub permissions: &'a dyn PermissionFilter,
}

impl<'a> ConnectionResolver<'a> {
    pub fn new(
        ctx: CompileContext<'a>,
        store: &'a dyn DocumentStore,
        permissions: &'a dyn PermissionFilter,
    ) -> Self {
        Self {
            ctx,
            store,
            permissions,
        }
    }

    fn node_prefix(&self) -> FieldPath {
        FieldPath::from_dotted(&self.ctx.config.node_path)
    }

    /// Initial stages followed by the permission and request filters
    fn filter_stages(
        &self,
        source: &ConnectionSource,
        node_type: &TypeDescriptor,
        filter: Option<&Value>,
    ) -> DocGraphResult<Vec<JsonMap>> {
        let prefix = self.node_prefix();
        let mut conditions = vec![];
        if let Some(guard) = permission_match(self.ctx, self.permissions, node_type, &prefix)? {
            conditions.push(guard);
        }
        if let Some(filter) = filter {
            conditions.extend(compile_match(self.ctx, filter, node_type, &prefix)?);
        }

        let mut stages = source.initial_stages.clone();
        stages.extend(match_stage(conditions));
        Ok(stages)
    }

    fn sort_stage(&self, node_type: &TypeDescriptor, order: Option<&Value>) -> DocGraphResult<Option<JsonMap>> {
        let clauses = match order {
            Some(order) => compile_order(self.ctx, order, node_type)?,
            None => vec![],
        };
        let doc = sort_document(self.ctx, &clauses, &self.node_prefix().segments);
        Ok(match doc.is_empty() {
            true => None,
            false => Some(single_map(mongo::SORT, Value::Object(doc))),
        })
    }

    async fn count(&self, collection: &str, mut stages: Vec<JsonMap>) -> DocGraphResult<u64> {
        stages.push(single_map(
            mongo::GROUP,
            json!({ "_id": null, "count": single(mongo::SUM, json!(1)) }),
        ));
        debug!(?stages, "count query");
        let rows = self.store.aggregate(collection, stages).await?;
        Ok(rows
            .first()
            .and_then(|x| x.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn page(
        &self,
        collection: &str,
        mut stages: Vec<JsonMap>,
        sort: Option<JsonMap>,
        window: PageWindow,
    ) -> DocGraphResult<Vec<JsonMap>> {
        if window.limit == Some(0) {
            return Ok(vec![]);
        }
        stages.extend(sort);
        if window.skip > 0 {
            stages.push(single_map(mongo::SKIP, Value::from(window.skip)));
        }
        if let Some(limit) = window.limit {
            stages.push(single_map(mongo::LIMIT, Value::from(limit)));
        }
        debug!(?stages, "edge query");
        Ok(self.store.aggregate(collection, stages).await?)
    }

    async fn aggregates(
        &self,
        collection: &str,
        mut stages: Vec<JsonMap>,
        node_type: &TypeDescriptor,
        requests: &[AggregateRequest],
    ) -> DocGraphResult<JsonMap> {
        if requests.is_empty() {
            return Ok(JsonMap::new());
        }
        stages.push(group_stage(self.ctx, requests, node_type)?);
        debug!(?stages, "aggregate query");
        let rows = self.store.aggregate(collection, stages).await?;
        Ok(fold_results(requests, &rows))
    }

    /// Resolves a connection over `source` into
    /// `{ edges, pageInfo, ...aggregates }`.
    ///
    /// The aggregation query runs concurrently with the count and the edge
    /// page, which needs the count to place `last`/`before` windows. Nothing
    /// ties these reads to one snapshot, so `pageInfo` can be off by rows
    /// written between them.
    #[tracing::instrument(skip_all, fields(collection = %source.collection))]
    pub async fn resolve(
        &self,
        source: &ConnectionSource,
        request: &ConnectionRequest,
    ) -> DocGraphResult<Value> {
        let node_type = self.ctx.schema.require(&source.node_type)?;
        let filter = request.effective_filter(&source.named)?;
        let order = request.effective_order(&source.named)?;

        let stages = self.filter_stages(source, node_type, filter)?;
        let sort = self.sort_stage(node_type, order)?;
        let collection = source.collection.as_str();

        let edges = async {
            let length = self.count(collection, stages.clone()).await?;
            let window = request.pagination.window(length, self.ctx.config.max_rows);
            let rows = self.page(collection, stages.clone(), sort, window).await?;
            Ok::<_, DocGraphError>((length, window, rows))
        };
        let aggregates = self.aggregates(collection, stages.clone(), node_type, &request.aggregates);

        let ((length, window, rows), aggregates) = futures::try_join!(edges, aggregates)?;

        let page_info = request.pagination.page_info(&window, rows.len(), length);
        debug!(length, returned = rows.len(), "resolved connection");
        Ok(connection_value(
            with_cursors(rows, window.skip),
            page_info.to_value(),
            aggregates,
        ))
    }
}

/// Element type of a materialized list
#[derive(Clone, Copy)]
pub enum ListElement<'a> {
    Scalar,
    Object(&'a TypeDescriptor),
}

/// Resolves a connection over an already materialized list, with the same
/// cursor and `pageInfo` semantics as [`ConnectionResolver::resolve`].
///
/// Scalar lists take a scalar filter and a bare direction as order.
pub fn resolve_list_connection(
    ctx: CompileContext<'_>,
    permissions: &dyn PermissionFilter,
    element: ListElement<'_>,
    named: &NamedExpressions,
    items: Vec<Value>,
    request: &ConnectionRequest,
) -> DocGraphResult<Value> {
    let filter = request.effective_filter(named)?;
    let order = request.effective_order(named)?;

    let mut items = match element {
        ListElement::Scalar => {
            let mut items = match filter {
                Some(filter) => {
                    let predicate = compile_scalar_predicate(ctx, filter)?;
                    items.into_iter().filter(|x| predicate(x)).collect()
                }
                None => items,
            };
            if let Some(order) = order {
                items = sort_scalars(items, parse_direction(order)?);
            }
            items
        }
        ListElement::Object(node_type) => {
            let mut items: Vec<Value> = match permission_predicate(ctx, permissions, node_type)? {
                Some(visible) => items.into_iter().filter(|x| visible(x)).collect(),
                None => items,
            };
            if let Some(filter) = filter {
                let predicate = compile_predicate(ctx, filter, node_type)?;
                items.retain(|x| predicate(x));
            }
            if let Some(order) = order {
                sort_objects(&mut items, &compile_order(ctx, order, node_type)?);
            }
            items
        }
    };

    let edges: Vec<Value> = items
        .drain(..)
        .map(|node| Value::Object(single_map(ctx.config.node_path.clone(), node)))
        .collect();

    let aggregates = match (element, request.aggregates.is_empty()) {
        (_, true) => JsonMap::new(),
        (ListElement::Object(node_type), false) => {
            aggregate_in_memory(ctx, &request.aggregates, node_type, &edges)?
        }
        (ListElement::Scalar, false) => {
            return Err(DocGraphError::schema("Aggregates over a scalar list"))
        }
    };

    let length = edges.len() as u64;
    let window = request.pagination.window(length, ctx.config.max_rows);
    let page: Vec<JsonMap> = window
        .slice(&edges)
        .iter()
        .filter_map(|x| x.as_object().cloned())
        .collect();
    let page_info = request.pagination.page_info(&window, page.len(), length);

    Ok(connection_value(
        with_cursors(page, window.skip),
        page_info.to_value(),
        aggregates,
    ))
}
