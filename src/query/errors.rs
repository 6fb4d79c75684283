//! Query compilation errors
//!
//! Every variant knows which query parameter it came from, so the wire
//! error can carry `source.parameter`.

use thiserror::Error;

use crate::pagination::PageError;

/// Result type for query compilation
pub type QueryResult<T> = Result<T, QueryError>;

/// Query parameter errors (always client errors)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Filter descriptor is malformed or references unknown fields/operators
    #[error("Invalid filter at '{pointer}': {detail}")]
    InvalidFilter { pointer: String, detail: String },

    /// Sort descriptor is malformed, duplicated, or references unknown fields
    #[error("Invalid sort: {0}")]
    InvalidSort(String),

    /// Include path does not resolve to relationships
    #[error("Invalid include path '{path}': {detail}")]
    InvalidInclude { path: String, detail: String },

    /// Sparse fieldset names an unknown type or field
    #[error("Invalid sparse fieldset {parameter}: {detail}")]
    InvalidFieldset { parameter: String, detail: String },

    /// Pagination parameters rejected
    #[error(transparent)]
    Page(#[from] PageError),
}

impl QueryError {
    pub fn filter(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidFilter {
            pointer: pointer.into(),
            detail: detail.into(),
        }
    }

    /// Query parameter that caused the error
    pub fn parameter(&self) -> String {
        match self {
            QueryError::InvalidFilter { .. } => super::FILTER_PARAM.to_string(),
            QueryError::InvalidSort(_) => super::SORT_PARAM.to_string(),
            QueryError::InvalidInclude { .. } => super::INCLUDE_PARAM.to_string(),
            QueryError::InvalidFieldset { parameter, .. } => parameter.clone(),
            QueryError::Page(page) => page.parameter().to_string(),
        }
    }

    /// JSON pointer into the filter descriptor, for filter errors
    pub fn pointer(&self) -> Option<&str> {
        match self {
            QueryError::InvalidFilter { pointer, .. } => Some(pointer),
            _ => None,
        }
    }
}
