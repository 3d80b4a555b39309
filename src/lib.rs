pub mod aggregate;
pub mod config;
pub mod connection;
pub mod constants;
pub mod context;
pub mod error;
pub mod filter;
pub mod filter_aggregate;
pub mod filter_match;
pub mod filter_predicate;
pub mod merge;
pub mod order;
pub mod pagination;
pub mod permission;
pub mod schema;
pub mod update;
pub mod value;

#[cfg(test)]
mod test_support;

pub use aggregate::{AggregateField, AggregateFunction, AggregateRequest};
pub use config::ConnectionConfig;
pub use connection::{
    resolve_list_connection, ConnectionRequest, ConnectionResolver, ConnectionSource,
    DocumentStore, ListElement, NamedExpressions,
};
pub use context::CompileContext;
pub use error::{DocGraphError, DocGraphResult, StoreError};
pub use filter_aggregate::compile_expr;
pub use filter_match::{compile_match, match_stage};
pub use filter_predicate::{compile_predicate, compile_scalar_predicate, Predicate};
pub use merge::UpdateDocument;
pub use order::{compile_order, Direction, OrderClause};
pub use pagination::{PageInfo, PageWindow, Pagination};
pub use permission::{AllowAll, Permission, PermissionFilter};
pub use schema::{FieldCategory, FieldDescriptor, Schema, TypeDescriptor, TypeKind};
pub use update::{apply_list_update, compile_update};
