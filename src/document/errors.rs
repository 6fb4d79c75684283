//! Document (de)serialization errors

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for document handling
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised while reading or writing resource documents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// Body `type` does not name the endpoint's collection
    #[error("Type '{found}' does not match endpoint type '{expected}'")]
    TypeMismatch {
        expected: String,
        found: String,
        pointer: String,
    },

    #[error("'{collection}' has no attribute '{name}'")]
    UnknownAttribute {
        collection: String,
        name: String,
        pointer: String,
    },

    #[error("'{collection}' has no relationship '{name}'")]
    UnknownRelationship {
        collection: String,
        name: String,
        pointer: String,
    },

    /// Primary-key or computed field in a write
    #[error("Field '{name}' is read-only")]
    ReadOnlyField { name: String, pointer: String },

    #[error("Client-generated ids are not allowed for '{collection}'")]
    ClientGeneratedIdForbidden { collection: String },

    /// Client-generated id already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Body `id` differs from the URL id
    #[error("Body id '{found}' does not match URL id '{expected}'")]
    IdMismatch { expected: String, found: String },

    #[error("Invalid value for '{name}': {detail}")]
    InvalidAttributeValue {
        name: String,
        detail: String,
        pointer: String,
    },

    /// Body is not a well-formed resource document
    #[error("Invalid document: {detail}")]
    InvalidDocument { detail: String, pointer: String },

    /// Storage failed while serializing
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DocumentError {
    pub fn invalid(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidDocument {
            detail: detail.into(),
            pointer: pointer.into(),
        }
    }

    /// JSON pointer into the request body, when one applies
    pub fn pointer(&self) -> Option<&str> {
        match self {
            DocumentError::TypeMismatch { pointer, .. }
            | DocumentError::UnknownAttribute { pointer, .. }
            | DocumentError::UnknownRelationship { pointer, .. }
            | DocumentError::ReadOnlyField { pointer, .. }
            | DocumentError::InvalidAttributeValue { pointer, .. }
            | DocumentError::InvalidDocument { pointer, .. } => Some(pointer),
            DocumentError::IdMismatch { .. } => Some("/data/id"),
            DocumentError::ClientGeneratedIdForbidden { .. } => Some("/data/id"),
            DocumentError::Conflict(_) | DocumentError::Storage(_) => None,
        }
    }
}
