//! Storage collaborator errors

use thiserror::Error;

/// Result type for storage calls
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors a storage collaborator reports
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Entity addressed by id does not exist
    #[error("No resource of type '{collection}' with id '{id}'")]
    NotFound { collection: String, id: String },

    /// Write conflicts with existing state (duplicate id, concurrent change)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A linkage names an entity that does not exist
    #[error("Related resource of type '{collection}' with id '{id}' does not exist")]
    RelatedResourceNotFound { collection: String, id: String },

    /// Anything else the backend fails at
    #[error("Storage failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn related_not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RelatedResourceNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
