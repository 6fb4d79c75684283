//! JSON:API wire types
//!
//! Only the outbound shapes are typed; inbound documents are validated
//! field by field from `serde_json::Value` so every error can carry a
//! JSON pointer.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Version advertised in every top-level `jsonapi` object
pub const JSONAPI_VERSION: &str = "1.0";

/// The JSON:API media type
pub const MEDIA_TYPE: &str = "application/vnd.api+json";

/// `{type, id}` pair naming one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Relationship data: one identifier, `null`, or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Linkage {
    ToOne(Option<ResourceIdentifier>),
    ToMany(Vec<ResourceIdentifier>),
}

impl Linkage {
    /// Identifiers in linkage order
    pub fn identifiers(&self) -> Vec<&ResourceIdentifier> {
        match self {
            Linkage::ToOne(id) => id.iter().collect(),
            Linkage::ToMany(ids) => ids.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub related: String,
}

/// One entry of a resource's `relationships`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<RelationshipLinks>,
    pub data: Linkage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceLinks {
    #[serde(rename = "self")]
    pub self_link: String,
}

/// A serialized resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<ResourceLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl ResourceObject {
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(&self.kind, &self.id)
    }
}

/// Top-level `data`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Resource(Option<Box<ResourceObject>>),
    Resources(Vec<ResourceObject>),
    Linkage(Linkage),
}

/// `source` of an error object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// Entry of a top-level `errors` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorObject {
    /// HTTP status as a string
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

impl ErrorObject {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            title: None,
            detail: detail.into(),
            source: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.source.get_or_insert_with(ErrorSource::default).pointer = Some(pointer.into());
        self
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.source.get_or_insert_with(ErrorSource::default).parameter = Some(parameter.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonApiObject {
    pub version: String,
}

impl Default for JsonApiObject {
    fn default() -> Self {
        Self {
            version: JSONAPI_VERSION.to_string(),
        }
    }
}

/// A complete top-level document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<ResourceObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorObject>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    pub jsonapi: JsonApiObject,
}

impl Document {
    fn with_data(data: PrimaryData) -> Self {
        Self {
            data: Some(data),
            included: None,
            errors: None,
            meta: Map::new(),
            links: None,
            jsonapi: JsonApiObject::default(),
        }
    }

    /// Single resource (or `null`) as primary data
    pub fn resource(resource: Option<ResourceObject>) -> Self {
        Self::with_data(PrimaryData::Resource(resource.map(Box::new)))
    }

    pub fn collection(resources: Vec<ResourceObject>) -> Self {
        Self::with_data(PrimaryData::Resources(resources))
    }

    /// Relationship linkage as primary data
    pub fn linkage(linkage: Linkage) -> Self {
        Self::with_data(PrimaryData::Linkage(linkage))
    }

    /// Error document; carries no `data`
    pub fn errors(errors: Vec<ErrorObject>) -> Self {
        Self {
            data: None,
            included: None,
            errors: Some(errors),
            meta: Map::new(),
            links: None,
            jsonapi: JsonApiObject::default(),
        }
    }

    /// Attach compound-document resources; an empty list is omitted
    pub fn with_included(mut self, included: Vec<ResourceObject>) -> Self {
        self.included = (!included.is_empty()).then_some(included);
        self
    }

    pub fn with_links(mut self, links: Value) -> Self {
        self.links = Some(links);
        self
    }

    pub fn is_error(&self) -> bool {
        self.errors.is_some()
    }

    /// JSON form of the document
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_linkage_shapes() {
        let one = Linkage::ToOne(Some(ResourceIdentifier::new("people", "1")));
        assert_eq!(serde_json::to_value(&one).unwrap(), json!({"type": "people", "id": "1"}));
        assert_eq!(serde_json::to_value(Linkage::ToOne(None)).unwrap(), Value::Null);
        assert_eq!(serde_json::to_value(Linkage::ToMany(vec![])).unwrap(), json!([]));
    }

    #[test]
    fn test_null_primary_data_is_kept() {
        let doc = Document::resource(None).to_value();
        assert_eq!(doc["data"], Value::Null);
        assert!(doc.as_object().unwrap().contains_key("data"));
        assert_eq!(doc["jsonapi"]["version"], "1.0");
    }

    #[test]
    fn test_error_document() {
        let doc = Document::errors(vec![ErrorObject::new(400, "bad")
            .with_title("Bad Request")
            .with_parameter("filter")
            .with_pointer("/0/name")])
        .to_value();

        assert!(doc.get("data").is_none());
        assert_eq!(doc["errors"][0]["status"], "400");
        assert_eq!(doc["errors"][0]["source"]["parameter"], "filter");
        assert_eq!(doc["errors"][0]["source"]["pointer"], "/0/name");
    }

    #[test]
    fn test_empty_included_omitted() {
        let doc = Document::collection(vec![]).with_included(vec![]).to_value();
        assert!(doc.get("included").is_none());
        assert_eq!(doc["data"], json!([]));
    }
}
