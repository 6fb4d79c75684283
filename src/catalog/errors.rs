//! Catalog error types

use thiserror::Error;

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Catalog errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// A collection with this name is already registered
    #[error("Collection '{0}' is already registered")]
    DuplicateCollection(String),

    /// No collection with this name
    #[error("Unknown collection '{0}'")]
    UnknownCollection(String),

    /// A dotted path does not resolve through the entity graph
    #[error("Invalid field path '{path}': {reason}")]
    InvalidFieldPath { path: String, reason: String },

    /// A relationship points at a collection that was never registered
    #[error("Relationship '{collection}.{relation}' targets unknown collection '{target}'")]
    UnknownRelationTarget {
        collection: String,
        relation: String,
        target: String,
    },

    /// The entity type is malformed
    #[error("Invalid entity type '{collection}': {reason}")]
    InvalidEntityType { collection: String, reason: String },

    /// A schema file could not be read or parsed
    #[error("Failed to load schema file {path}: {reason}")]
    Load { path: String, reason: String },
}

impl CatalogError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
