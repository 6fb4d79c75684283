//! Inbound document validation
//!
//! Converts a request body into a [`MutationPlan`] for one collection.
//! Nothing here touches storage: existence of linked resources and of a
//! client-chosen id is checked by the caller.

use serde_json::{Map, Value};

use crate::catalog::{EntityMeta, FieldRef, RelationshipDef};
use crate::storage::{Changes, RelationChange};

use super::codec::CodecRegistry;
use super::errors::{DocumentError, DocumentResult};

/// Validated write request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationPlan {
    /// Client-chosen id on create; the URL id on update
    pub id: Option<String>,
    pub changes: Changes,
}

/// Which operation a body is read for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode<'a> {
    Create,
    /// Update of the resource with this URL id
    Update(&'a str),
}

/// Reads resource documents for one collection
pub struct Deserializer<'a> {
    meta: &'a EntityMeta,
    codecs: &'a CodecRegistry,
}

impl<'a> Deserializer<'a> {
    pub fn new(meta: &'a EntityMeta, codecs: &'a CodecRegistry) -> Self {
        Self { meta, codecs }
    }

    /// Validate `body` and build the mutation plan
    pub fn deserialize(&self, body: &Value, mode: WriteMode<'_>) -> DocumentResult<MutationPlan> {
        let data = primary_data(body)?;
        let Value::Object(object) = data else {
            return Err(DocumentError::invalid("/data", "primary data must be a resource object"));
        };

        self.check_type(object)?;
        let id = self.read_id(object, mode)?;

        let mut plan = MutationPlan {
            id,
            changes: Changes::new(),
        };
        if let Some(attributes) = object.get("attributes") {
            plan.changes.attributes = self.read_attributes(attributes)?;
        }
        if let Some(relationships) = object.get("relationships") {
            self.read_relationships(relationships, &mut plan.changes)?;
        }

        if let Some(custom) = self.codecs.deserializer(self.meta.collection()) {
            custom.adjust(data, &mut plan)?;
        }
        Ok(plan)
    }

    fn check_type(&self, object: &Map<String, Value>) -> DocumentResult<()> {
        match object.get("type") {
            Some(Value::String(kind)) if kind == self.meta.collection() => Ok(()),
            Some(Value::String(kind)) => Err(DocumentError::TypeMismatch {
                expected: self.meta.collection().to_string(),
                found: kind.clone(),
                pointer: "/data/type".into(),
            }),
            Some(_) => Err(DocumentError::invalid("/data/type", "type must be a string")),
            None => Err(DocumentError::invalid("/data/type", "resource type is required")),
        }
    }

    fn read_id(&self, object: &Map<String, Value>, mode: WriteMode<'_>) -> DocumentResult<Option<String>> {
        let id = match object.get("id") {
            None => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => return Err(DocumentError::invalid("/data/id", "id must be a string")),
        };

        match mode {
            WriteMode::Create => {
                let Some(id) = id else {
                    return Ok(None);
                };
                if !self.meta.options().allow_client_generated_ids {
                    return Err(DocumentError::ClientGeneratedIdForbidden {
                        collection: self.meta.collection().to_string(),
                    });
                }
                if self.meta.parse_id(&id).is_none() {
                    return Err(DocumentError::invalid(
                        "/data/id",
                        format!("'{}' is not a valid id for '{}'", id, self.meta.collection()),
                    ));
                }
                Ok(Some(id))
            }
            WriteMode::Update(url_id) => match id {
                None => Err(DocumentError::invalid("/data/id", "resource id is required")),
                Some(id) if id != url_id => Err(DocumentError::IdMismatch {
                    expected: url_id.to_string(),
                    found: id,
                }),
                Some(id) => Ok(Some(id)),
            },
        }
    }

    fn read_attributes(&self, attributes: &Value) -> DocumentResult<Map<String, Value>> {
        let Value::Object(attributes) = attributes else {
            return Err(DocumentError::invalid("/data/attributes", "attributes must be an object"));
        };

        let mut values = Map::new();
        for (name, value) in attributes {
            let pointer = format!("/data/attributes/{}", name);
            let attribute = match self.meta.field(name) {
                Some(FieldRef::Attribute(attribute)) => attribute,
                _ => {
                    return Err(DocumentError::UnknownAttribute {
                        collection: self.meta.collection().to_string(),
                        name: name.clone(),
                        pointer,
                    })
                }
            };
            if attribute.read_only || self.meta.is_primary_key(name) {
                return Err(DocumentError::ReadOnlyField {
                    name: name.clone(),
                    pointer,
                });
            }

            if value.is_null() {
                if !attribute.nullable {
                    return Err(DocumentError::InvalidAttributeValue {
                        name: name.clone(),
                        detail: "must not be null".into(),
                        pointer,
                    });
                }
            } else if !attribute.attr_type.accepts(value) {
                return Err(DocumentError::InvalidAttributeValue {
                    name: name.clone(),
                    detail: format!("expected a {} value", attribute.attr_type.type_name()),
                    pointer,
                });
            }
            values.insert(name.clone(), value.clone());
        }
        Ok(values)
    }

    fn read_relationships(&self, relationships: &Value, changes: &mut Changes) -> DocumentResult<()> {
        let Value::Object(relationships) = relationships else {
            return Err(DocumentError::invalid(
                "/data/relationships",
                "relationships must be an object",
            ));
        };

        for (name, object) in relationships {
            let pointer = format!("/data/relationships/{}", name);
            let relationship = self.meta.relationship(name).ok_or_else(|| {
                DocumentError::UnknownRelationship {
                    collection: self.meta.collection().to_string(),
                    name: name.clone(),
                    pointer: pointer.clone(),
                }
            })?;
            let data = match object {
                Value::Object(object) => object.get("data").ok_or_else(|| {
                    DocumentError::invalid(&pointer, "relationship object must contain data")
                })?,
                _ => return Err(DocumentError::invalid(&pointer, "relationship must be an object")),
            };
            let change = parse_linkage(relationship, data, &format!("{}/data", pointer))?;
            changes.relationships.insert(name.clone(), change);
        }
        Ok(())
    }
}

/// `data` member of a request body
pub fn primary_data(body: &Value) -> DocumentResult<&Value> {
    match body {
        Value::Object(object) => object
            .get("data")
            .ok_or_else(|| DocumentError::invalid("", "document must contain data")),
        _ => Err(DocumentError::invalid("", "document must be a JSON object")),
    }
}

/// Parse relationship data for `relationship`; `pointer` locates `data`
pub fn parse_linkage(
    relationship: &RelationshipDef,
    data: &Value,
    pointer: &str,
) -> DocumentResult<RelationChange> {
    if relationship.is_to_many() {
        let Value::Array(items) = data else {
            return Err(DocumentError::invalid(
                pointer,
                format!("'{}' is to-many; data must be a list", relationship.name),
            ));
        };
        let ids = items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_identifier(relationship, item, &format!("{}/{}", pointer, i)))
            .collect::<DocumentResult<Vec<_>>>()?;
        return Ok(RelationChange::ToMany(ids));
    }

    match data {
        Value::Null => Ok(RelationChange::ToOne(None)),
        Value::Object(_) => Ok(RelationChange::ToOne(Some(parse_identifier(
            relationship,
            data,
            pointer,
        )?))),
        _ => Err(DocumentError::invalid(
            pointer,
            format!("'{}' is to-one; data must be an object or null", relationship.name),
        )),
    }
}

fn parse_identifier(relationship: &RelationshipDef, item: &Value, pointer: &str) -> DocumentResult<String> {
    let Value::Object(object) = item else {
        return Err(DocumentError::invalid(pointer, "linkage must be a resource identifier"));
    };
    match object.get("type") {
        Some(Value::String(kind)) if *kind == relationship.target => {}
        Some(Value::String(kind)) => {
            return Err(DocumentError::TypeMismatch {
                expected: relationship.target.clone(),
                found: kind.clone(),
                pointer: format!("{}/type", pointer),
            })
        }
        _ => {
            return Err(DocumentError::invalid(
                format!("{}/type", pointer),
                "linkage type must be a string",
            ))
        }
    }
    match object.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        _ => Err(DocumentError::invalid(
            format!("{}/id", pointer),
            "linkage id must be a string",
        )),
    }
}
