//! Entity type definitions
//!
//! Entity types are plain data: a collection name, primary key, attribute
//! fields and relationship fields. They are (de)serializable so they can be
//! declared in JSON schema files.
//!
//! Supported attribute types:
//! - string: UTF-8 string
//! - number: integer or floating point
//! - boolean
//! - date: `YYYY-MM-DD`
//! - datetime: RFC 3339, or naive `YYYY-MM-DDTHH:MM:SS[.f]`
//! - binary: base64 encoded bytes
//! - opaque: any JSON value, compared only for equality

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names JSON:API reserves inside `attributes`/`relationships`
pub const RESERVED_FIELD_NAMES: [&str; 2] = ["id", "type"];

/// Semantic type of an attribute field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Date,
    Datetime,
    Binary,
    Opaque,
}

impl AttributeType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Number => "number",
            AttributeType::Boolean => "boolean",
            AttributeType::Date => "date",
            AttributeType::Datetime => "datetime",
            AttributeType::Binary => "binary",
            AttributeType::Opaque => "opaque",
        }
    }

    /// Whether values of this type have a total order
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            AttributeType::String
                | AttributeType::Number
                | AttributeType::Date
                | AttributeType::Datetime
        )
    }

    /// Whether pattern operators (like, contains, ...) apply
    pub fn is_textual(&self) -> bool {
        matches!(self, AttributeType::String)
    }

    /// Whether a non-null JSON value is a valid representation of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (AttributeType::Opaque, _) => true,
            (AttributeType::String, Value::String(_)) => true,
            (AttributeType::Number, Value::Number(_)) => true,
            (AttributeType::Boolean, Value::Bool(_)) => true,
            (AttributeType::Date, Value::String(s)) => parse_date(s).is_some(),
            (AttributeType::Datetime, Value::String(s)) => parse_datetime(s).is_some(),
            (AttributeType::Binary, Value::String(s)) => {
                base64::engine::general_purpose::STANDARD.decode(s).is_ok()
            }
            _ => false,
        }
    }

    /// Converts the string form of a value (as found in URLs) to this type.
    ///
    /// Returns `None` when the text cannot represent a value of this type.
    pub fn coerce_str(&self, text: &str) -> Option<Value> {
        match self {
            AttributeType::Number => {
                if let Ok(n) = text.parse::<i64>() {
                    return Some(Value::Number(n.into()));
                }
                text.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            }
            AttributeType::Boolean => text.parse::<bool>().ok().map(Value::Bool),
            _ => {
                let value = Value::String(text.to_string());
                self.accepts(&value).then_some(value)
            }
        }
    }
}

/// Parses a `date` attribute value
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parses a `datetime` attribute value, normalized to naive UTC
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn default_true() -> bool {
    true
}

/// Attribute field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Whether `null` is an acceptable value
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Computed fields are serialized but never written by clients
    #[serde(default)]
    pub read_only: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            nullable: true,
            read_only: false,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, AttributeType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, AttributeType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, AttributeType::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, AttributeType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, AttributeType::Datetime)
    }

    /// Mark the attribute as computed (read-only)
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Disallow `null`
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Relationship cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// How the storage collaborator records a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum Join {
    /// This entity stores the related id in `column` (owning side)
    ForeignKey(String),
    /// The related entity stores this entity's id in `column`
    RemoteKey(String),
    /// Storage keeps a separate link table
    Association,
}

/// Relationship field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String,
    pub cardinality: Cardinality,
    /// Collection name of the related entity type
    pub target: String,
    pub join: Join,
}

impl RelationshipDef {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>, join: Join) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::ToOne,
            target: target.into(),
            join,
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>, join: Join) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::ToMany,
            target: target.into(),
            join,
        }
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }

    /// Whether this side holds the foreign key
    pub fn is_owning(&self) -> bool {
        matches!(self.join, Join::ForeignKey(_))
    }

    /// Local foreign-key column, if this is the owning side
    pub fn foreign_key(&self) -> Option<&str> {
        match &self.join {
            Join::ForeignKey(column) => Some(column),
            _ => None,
        }
    }
}

/// Per-collection behavior switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    #[serde(default)]
    pub allow_client_generated_ids: bool,
    #[serde(default = "default_true")]
    pub allow_to_many_replacement: bool,
    #[serde(default = "default_true")]
    pub allow_delete_from_to_many: bool,
    /// Relationship paths included when a request has no `include` parameter
    #[serde(default)]
    pub default_includes: Vec<String>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            allow_client_generated_ids: false,
            allow_to_many_replacement: true,
            allow_delete_from_to_many: true,
            default_includes: Vec::new(),
        }
    }
}

/// A registered schema unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    /// Wire-level collection name
    pub collection: String,
    pub primary_key: Vec<String>,
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    #[serde(default)]
    pub options: CollectionOptions,
}

impl EntityType {
    /// New entity type with a single primary-key field
    pub fn new(collection: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            primary_key: vec![primary_key.into()],
            attributes: Vec::new(),
            relationships: Vec::new(),
            options: CollectionOptions::default(),
        }
    }

    /// New entity type with a composite primary key
    pub fn with_composite_key(collection: impl Into<String>, primary_key: Vec<String>) -> Self {
        Self {
            primary_key,
            ..Self::new(collection, String::new())
        }
    }

    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn options(mut self, options: CollectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the entity type on its own (not against other types)
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.collection.is_empty() {
            return Err("collection name must not be empty".into());
        }
        if self.primary_key.is_empty() || self.primary_key.iter().any(|k| k.is_empty()) {
            return Err("primary key must name at least one field".into());
        }

        let mut seen = std::collections::HashSet::new();
        for name in self
            .attributes
            .iter()
            .map(|a| &a.name)
            .chain(self.relationships.iter().map(|r| &r.name))
        {
            if !seen.insert(name.as_str()) {
                return Err(format!("field '{}' is declared twice", name));
            }
        }

        for key in &self.primary_key {
            if !self.attributes.iter().any(|a| &a.name == key) {
                return Err(format!("primary key field '{}' is not a declared attribute", key));
            }
        }

        for attribute in &self.attributes {
            if self.primary_key.contains(&attribute.name) {
                continue;
            }
            if RESERVED_FIELD_NAMES.contains(&attribute.name.as_str()) {
                return Err(format!("attribute name '{}' is reserved", attribute.name));
            }
        }
        for relationship in &self.relationships {
            if RESERVED_FIELD_NAMES.contains(&relationship.name.as_str()) {
                return Err(format!("relationship name '{}' is reserved", relationship.name));
            }
        }

        Ok(())
    }
}
