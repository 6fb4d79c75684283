//! # Engine Errors
//!
//! Aggregates the per-module errors and maps each one to an HTTP status and
//! a JSON:API error object.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::document::{Document, DocumentError, ErrorObject, MEDIA_TYPE};
use crate::query::QueryError;
use crate::storage::StorageError;

use super::hooks::HookAbort;

/// Result type for engine operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Non-standard status for requests the client gave up on
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Detail sent for every 5xx response
const GENERIC_DETAIL: &str = "The server failed to handle the request";

/// Everything a request can fail with
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    // ==================
    // Client Errors (4xx)
    // ==================
    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Query(#[from] QueryError),

    #[error("{0}")]
    Document(#[from] DocumentError),

    /// Relationship named in the URL does not exist
    #[error("'{collection}' has no relationship '{relation}'")]
    UnknownRelationship { collection: String, relation: String },

    /// Operation disabled for this collection or relationship
    #[error("{0}")]
    Forbidden(String),

    #[error("Method {method} is not allowed on this endpoint")]
    MethodNotAllowed { method: String },

    #[error("Media type parameters are not allowed in Content-Type")]
    UnsupportedMediaType,

    #[error("Accept header allows no JSON:API media type without parameters")]
    NotAcceptable,

    /// Query string could not be decoded
    #[error("Malformed query string: {0}")]
    MalformedQuery(String),

    /// Raised by a preprocessor or postprocessor
    #[error("{}", .0.detail)]
    Hook(HookAbort),

    /// Request cancelled before a write was issued
    #[error("Request cancelled")]
    Cancelled,

    // ==================
    // Server Errors (5xx)
    // ==================
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Engine invariant broken, e.g. an illegal state transition
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Catalog(err) => match err {
                CatalogError::UnknownCollection(_) => StatusCode::NOT_FOUND,
                CatalogError::InvalidFieldPath { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },

            // 400 Bad Request
            ApiError::Query(_) => StatusCode::BAD_REQUEST,

            ApiError::Document(err) => match err {
                DocumentError::TypeMismatch { .. }
                | DocumentError::Conflict(_)
                | DocumentError::IdMismatch { .. } => StatusCode::CONFLICT,
                DocumentError::ClientGeneratedIdForbidden { .. } => StatusCode::FORBIDDEN,
                DocumentError::Storage(storage) => storage_status(storage),
                _ => StatusCode::BAD_REQUEST,
            },

            ApiError::UnknownRelationship { .. } => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            ApiError::MalformedQuery(_) => StatusCode::BAD_REQUEST,

            ApiError::Hook(abort) => {
                StatusCode::from_u16(abort.status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ApiError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),

            ApiError::Storage(err) => storage_status(err),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Wire form of this error
    pub fn to_error_object(&self) -> ErrorObject {
        let status = self.status_code();
        if status.is_server_error() {
            return ErrorObject::new(status.as_u16(), GENERIC_DETAIL)
                .with_title("Internal Server Error");
        }

        let mut object = ErrorObject::new(status.as_u16(), self.to_string());
        if let Some(title) = status.canonical_reason() {
            object = object.with_title(title);
        }
        match self {
            ApiError::Query(err) => {
                object = object.with_parameter(err.parameter());
                if let Some(pointer) = err.pointer() {
                    object = object.with_pointer(pointer);
                }
            }
            ApiError::Document(err) => {
                if let Some(pointer) = err.pointer() {
                    object = object.with_pointer(pointer);
                }
            }
            ApiError::Hook(abort) => {
                if let Some(title) = &abort.title {
                    object = object.with_title(title.clone());
                }
            }
            _ => {}
        }
        object
    }

    /// Error document carrying this error only
    pub fn to_document(&self) -> Document {
        Document::errors(vec![self.to_error_object()])
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound { .. } | StorageError::RelatedResourceNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        StorageError::Conflict(_) => StatusCode::CONFLICT,
        StorageError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_document().to_value().to_string();
        (status, [(header::CONTENT_TYPE, MEDIA_TYPE)], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::PageError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::from(CatalogError::UnknownCollection("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StorageError::Conflict("dup".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(DocumentError::ClientGeneratedIdForbidden {
                collection: "people".into()
            })
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(DocumentError::Storage(StorageError::related_not_found("people", "9")))
                .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Cancelled.status_code().as_u16(), 499);
        assert_eq!(
            ApiError::Hook(HookAbort::new("nope").with_status(401)).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_filter_error_carries_parameter_and_pointer() {
        let err = ApiError::from(QueryError::filter("/0/name", "unknown field"));
        let object = err.to_error_object();

        assert_eq!(object.status, "400");
        let source = object.source.unwrap();
        assert_eq!(source.parameter.as_deref(), Some("filter"));
        assert_eq!(source.pointer.as_deref(), Some("/0/name"));
    }

    #[test]
    fn test_page_error_names_parameter() {
        let err = ApiError::from(QueryError::from(PageError::invalid("page[size]", "must be positive")));
        let source = err.to_error_object().source.unwrap();
        assert_eq!(source.parameter.as_deref(), Some("page[size]"));
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = ApiError::from(StorageError::backend("connection refused to 10.0.0.3"));
        let object = err.to_error_object();
        assert_eq!(object.status, "500");
        assert!(!object.detail.contains("10.0.0.3"));
    }
}
