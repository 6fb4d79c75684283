//! Operation model
//!
//! Every request is an `(method, route)` pair that resolves to exactly one
//! [`OperationKind`]. Hooks are keyed by the kind.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::document::Document;
use crate::query::RawQuery;

use super::context::CancellationFlag;
use super::errors::ApiError;

/// HTTP verbs the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/{collection}`
    Collection { collection: String },
    /// `/{collection}/{id}`
    Resource { collection: String, id: String },
    /// `/{collection}/{id}/relationships/{relation}`
    Relationship {
        collection: String,
        id: String,
        relation: String,
    },
    /// `/{collection}/{id}/{relation}`
    Related {
        collection: String,
        id: String,
        relation: String,
    },
}

impl Route {
    pub fn collection(collection: impl Into<String>) -> Self {
        Route::Collection {
            collection: collection.into(),
        }
    }

    pub fn resource(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Route::Resource {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn relationship(
        collection: impl Into<String>,
        id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Route::Relationship {
            collection: collection.into(),
            id: id.into(),
            relation: relation.into(),
        }
    }

    pub fn related(
        collection: impl Into<String>,
        id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Route::Related {
            collection: collection.into(),
            id: id.into(),
            relation: relation.into(),
        }
    }

    pub fn collection_name(&self) -> &str {
        match self {
            Route::Collection { collection }
            | Route::Resource { collection, .. }
            | Route::Relationship { collection, .. }
            | Route::Related { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Route::Collection { .. } => None,
            Route::Resource { id, .. }
            | Route::Relationship { id, .. }
            | Route::Related { id, .. } => Some(id),
        }
    }

    pub fn relation(&self) -> Option<&str> {
        match self {
            Route::Relationship { relation, .. } | Route::Related { relation, .. } => {
                Some(relation)
            }
            _ => None,
        }
    }
}

/// What a request does; hooks are registered per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CollectionFetch,
    ResourceFetch,
    Create,
    Update,
    Delete,
    RelationshipFetch,
    RelationshipAdd,
    RelationshipReplace,
    RelationshipRemove,
    RelatedFetch,
}

impl OperationKind {
    /// Kind served by `method` on `route`
    pub fn resolve(method: Method, route: &Route) -> Result<Self, ApiError> {
        let kind = match (route, method) {
            (Route::Collection { .. }, Method::Get) => OperationKind::CollectionFetch,
            (Route::Collection { .. }, Method::Post) => OperationKind::Create,
            (Route::Resource { .. }, Method::Get) => OperationKind::ResourceFetch,
            (Route::Resource { .. }, Method::Patch) => OperationKind::Update,
            (Route::Resource { .. }, Method::Delete) => OperationKind::Delete,
            (Route::Relationship { .. }, Method::Get) => OperationKind::RelationshipFetch,
            (Route::Relationship { .. }, Method::Post) => OperationKind::RelationshipAdd,
            (Route::Relationship { .. }, Method::Patch) => OperationKind::RelationshipReplace,
            (Route::Relationship { .. }, Method::Delete) => OperationKind::RelationshipRemove,
            (Route::Related { .. }, Method::Get) => OperationKind::RelatedFetch,
            _ => {
                return Err(ApiError::MethodNotAllowed {
                    method: method.to_string(),
                })
            }
        };
        Ok(kind)
    }

    /// Name for logging
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::CollectionFetch => "collection_fetch",
            OperationKind::ResourceFetch => "resource_fetch",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::RelationshipFetch => "relationship_fetch",
            OperationKind::RelationshipAdd => "relationship_add",
            OperationKind::RelationshipReplace => "relationship_replace",
            OperationKind::RelationshipRemove => "relationship_remove",
            OperationKind::RelatedFetch => "related_fetch",
        }
    }
}

/// Inbound operation, transport independent
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub route: Route,
    pub query: RawQuery,
    pub body: Option<Value>,
    pub cancel: CancellationFlag,
}

impl ApiRequest {
    pub fn new(method: Method, route: Route) -> Self {
        Self {
            method,
            route,
            query: RawQuery::new(),
            body: None,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn get(route: Route) -> Self {
        Self::new(Method::Get, route)
    }

    pub fn post(route: Route, body: Value) -> Self {
        Self::new(Method::Post, route).with_body(body)
    }

    pub fn patch(route: Route, body: Value) -> Self {
        Self::new(Method::Patch, route).with_body(body)
    }

    pub fn delete(route: Route) -> Self {
        Self::new(Method::Delete, route)
    }

    pub fn with_query(mut self, query: RawQuery) -> Self {
        self.query = query;
        self
    }

    /// Add one query parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outbound result, transport independent
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// `None` for 204 responses
    pub document: Option<Document>,
    pub headers: BTreeMap<String, String>,
}

impl ApiResponse {
    pub fn ok(document: Document) -> Self {
        Self::with_status(200, document)
    }

    pub fn with_status(status: u16, document: Document) -> Self {
        Self {
            status,
            document: Some(document),
            headers: BTreeMap::new(),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            document: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn error(err: &ApiError) -> Self {
        Self::with_status(err.status_code().as_u16(), err.to_document())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// JSON body, `Value::Null` when there is none
    pub fn body(&self) -> Value {
        self.document
            .as_ref()
            .map(Document::to_value)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_resolution() {
        let rel = Route::relationship("people", "1", "articles");
        assert_eq!(
            OperationKind::resolve(Method::Post, &rel).unwrap(),
            OperationKind::RelationshipAdd
        );
        assert_eq!(
            OperationKind::resolve(Method::Patch, &rel).unwrap(),
            OperationKind::RelationshipReplace
        );
        assert_eq!(
            OperationKind::resolve(Method::Get, &Route::related("people", "1", "articles")).unwrap(),
            OperationKind::RelatedFetch
        );
    }

    #[test]
    fn test_unsupported_method() {
        let err = OperationKind::resolve(Method::Delete, &Route::collection("people")).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 405);
        assert!(OperationKind::resolve(Method::Post, &Route::related("people", "1", "articles")).is_err());
    }

    #[test]
    fn test_kind_names_are_snake_case() {
        assert_eq!(OperationKind::RelationshipReplace.name(), "relationship_replace");
        assert_eq!(OperationKind::CollectionFetch.name(), "collection_fetch");
    }
}
