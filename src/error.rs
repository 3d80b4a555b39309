use thiserror::Error;

/// Error reported by a [`crate::connection::DocumentStore`] implementation.
///
/// The store is an external collaborator; its failures are carried through
/// unchanged and never retried.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Central error type for all docgraph operations.
#[derive(Debug, Error)]
pub enum DocGraphError {
    /// Invalid user input: conflicting arguments, non-positive page sizes, ...
    #[error("Argument error: {message}")]
    Argument { message: String },

    /// The filter/order/update input does not fit the schema this compiler
    /// was given. Indicates a mismatch between generated input types and the
    /// compiler, not a reachable user input.
    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("Field not found: {field} on type {type_name}")]
    FieldNotFound { field: String, type_name: String },

    #[error("Type not found: {0}")]
    TypeNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocGraphError {
    /// Creates an argument error
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    /// Creates a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a field not found error
    pub fn field_not_found(field: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::FieldNotFound {
            field: field.into(),
            type_name: type_name.into(),
        }
    }

    pub fn is_argument_error(&self) -> bool {
        matches!(self, Self::Argument { .. })
    }
}

/// Type alias for Results that use DocGraphError
pub type DocGraphResult<T> = Result<T, DocGraphError>;
