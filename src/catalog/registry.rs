//! The schema catalog
//!
//! Entity types are registered on a [`CatalogBuilder`] and frozen into a
//! [`Catalog`]. Building computes every lookup table once; the catalog is
//! immutable afterwards and shared by reference across requests.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};

use super::errors::{CatalogError, CatalogResult};
use super::types::{AttributeDef, AttributeType, Cardinality, EntityType, RelationshipDef};

/// Separator between composite primary-key values in a wire id
pub const ID_SEPARATOR: char = ',';

/// A field of an entity type
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    Attribute(&'a AttributeDef),
    Relationship(&'a RelationshipDef),
}

/// What a resolved path segment refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepKind {
    Attribute(AttributeType),
    Relationship {
        cardinality: Cardinality,
        target: String,
    },
}

/// One resolved segment of a dotted field path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathStep {
    /// Collection that owns the field
    pub collection: String,
    pub field: String,
    pub kind: StepKind,
}

impl PathStep {
    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, StepKind::Relationship { .. })
    }

    pub fn is_to_many(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Relationship {
                cardinality: Cardinality::ToMany,
                ..
            }
        )
    }

    /// Attribute type, when this step is terminal
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self.kind {
            StepKind::Attribute(t) => Some(t),
            StepKind::Relationship { .. } => None,
        }
    }

    /// Target collection, when this step is a relationship
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Relationship { target, .. } => Some(target),
            StepKind::Attribute(_) => None,
        }
    }
}

/// Cached introspection of one entity type
#[derive(Debug)]
pub struct EntityMeta {
    entity_type: EntityType,
    attribute_index: HashMap<String, usize>,
    relationship_index: HashMap<String, usize>,
    /// Non-key attributes in declaration order
    exposed_attributes: Vec<String>,
    default_fieldset: BTreeSet<String>,
}

impl EntityMeta {
    fn new(entity_type: EntityType) -> Self {
        let attribute_index = entity_type
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        let relationship_index = entity_type
            .relationships
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        let exposed_attributes: Vec<String> = entity_type
            .attributes
            .iter()
            .filter(|a| !entity_type.primary_key.contains(&a.name))
            .map(|a| a.name.clone())
            .collect();
        let default_fieldset = exposed_attributes
            .iter()
            .cloned()
            .chain(entity_type.relationships.iter().map(|r| r.name.clone()))
            .collect();

        Self {
            entity_type,
            attribute_index,
            relationship_index,
            exposed_attributes,
            default_fieldset,
        }
    }

    pub fn collection(&self) -> &str {
        &self.entity_type.collection
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn primary_key(&self) -> &[String] {
        &self.entity_type.primary_key
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.entity_type.primary_key.iter().any(|k| k == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attribute_index
            .get(name)
            .map(|&i| &self.entity_type.attributes[i])
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationship_index
            .get(name)
            .map(|&i| &self.entity_type.relationships[i])
    }

    pub fn field(&self, name: &str) -> Option<FieldRef<'_>> {
        if let Some(attribute) = self.attribute(name) {
            return Some(FieldRef::Attribute(attribute));
        }
        self.relationship(name).map(FieldRef::Relationship)
    }

    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.entity_type.relationships
    }

    /// Attribute names serialized under `attributes` (primary key excluded)
    pub fn exposed_attributes(&self) -> &[String] {
        &self.exposed_attributes
    }

    /// Every serializable field: exposed attributes and relationships
    pub fn default_fieldset(&self) -> &BTreeSet<String> {
        &self.default_fieldset
    }

    pub fn options(&self) -> &super::types::CollectionOptions {
        &self.entity_type.options
    }

    /// Wire id for a stored row, or `None` when a key value is missing
    pub fn id_from_values(&self, values: &Map<String, Value>) -> Option<String> {
        let mut parts = Vec::with_capacity(self.entity_type.primary_key.len());
        for key in &self.entity_type.primary_key {
            match values.get(key) {
                None | Some(Value::Null) => return None,
                Some(value) => parts.push(value_to_id(value)),
            }
        }
        Some(parts.join(&ID_SEPARATOR.to_string()))
    }

    /// Splits a wire id into typed primary-key values.
    ///
    /// Returns `None` when the id cannot identify any entity of this type.
    pub fn parse_id(&self, id: &str) -> Option<Vec<(String, Value)>> {
        let keys = &self.entity_type.primary_key;
        let parts: Vec<&str> = if keys.len() == 1 {
            vec![id]
        } else {
            id.split(ID_SEPARATOR).collect()
        };
        if parts.len() != keys.len() {
            return None;
        }

        keys.iter()
            .zip(parts)
            .map(|(key, part)| {
                let attr_type = self.attribute(key)?.attr_type;
                attr_type.coerce_str(part).map(|v| (key.clone(), v))
            })
            .collect()
    }
}

/// String form of a key value as used in wire ids
pub fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collects entity types before the catalog is frozen
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityType>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Collection names must be unique.
    pub fn register(&mut self, entity_type: EntityType) -> CatalogResult<()> {
        if self
            .entities
            .iter()
            .any(|e| e.collection == entity_type.collection)
        {
            return Err(CatalogError::DuplicateCollection(entity_type.collection));
        }
        entity_type
            .validate_structure()
            .map_err(|reason| CatalogError::InvalidEntityType {
                collection: entity_type.collection.clone(),
                reason,
            })?;
        self.entities.push(entity_type);
        Ok(())
    }

    /// Chainable form of [`register`](Self::register)
    pub fn with(mut self, entity_type: EntityType) -> CatalogResult<Self> {
        self.register(entity_type)?;
        Ok(self)
    }

    /// Freeze the catalog, checking every relationship target is registered
    pub fn build(self) -> CatalogResult<Catalog> {
        for entity in &self.entities {
            for relationship in &entity.relationships {
                if !self.entities.iter().any(|e| e.collection == relationship.target) {
                    return Err(CatalogError::UnknownRelationTarget {
                        collection: entity.collection.clone(),
                        relation: relationship.name.clone(),
                        target: relationship.target.clone(),
                    });
                }
            }
        }

        let order = self.entities.iter().map(|e| e.collection.clone()).collect();
        let entries = self
            .entities
            .into_iter()
            .map(|e| (e.collection.clone(), EntityMeta::new(e)))
            .collect();

        Ok(Catalog { entries, order })
    }
}

/// Immutable registry of entity types
#[derive(Debug)]
pub struct Catalog {
    entries: HashMap<String, EntityMeta>,
    order: Vec<String>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Look up a collection by its wire name
    pub fn resolve(&self, collection: &str) -> CatalogResult<&EntityMeta> {
        self.entries
            .get(collection)
            .ok_or_else(|| CatalogError::UnknownCollection(collection.to_string()))
    }

    /// Collection names in registration order
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Resolve a dotted path starting at `collection`.
    ///
    /// Every non-terminal segment must be a relationship; the terminal
    /// segment may be an attribute or a relationship.
    pub fn resolve_field_path(&self, collection: &str, path: &str) -> CatalogResult<Vec<PathStep>> {
        if path.is_empty() {
            return Err(CatalogError::invalid_path(path, "path is empty"));
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut steps = Vec::with_capacity(segments.len());
        let mut current = self.resolve(collection)?;

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            if segment.is_empty() {
                return Err(CatalogError::invalid_path(path, "empty path segment"));
            }

            match current.field(segment) {
                None => {
                    return Err(CatalogError::invalid_path(
                        path,
                        format!("no field '{}' on '{}'", segment, current.collection()),
                    ));
                }
                Some(FieldRef::Attribute(attribute)) => {
                    if !is_last {
                        return Err(CatalogError::invalid_path(
                            path,
                            format!("'{}' is not a relationship", segment),
                        ));
                    }
                    steps.push(PathStep {
                        collection: current.collection().to_string(),
                        field: attribute.name.clone(),
                        kind: StepKind::Attribute(attribute.attr_type),
                    });
                }
                Some(FieldRef::Relationship(relationship)) => {
                    steps.push(PathStep {
                        collection: current.collection().to_string(),
                        field: relationship.name.clone(),
                        kind: StepKind::Relationship {
                            cardinality: relationship.cardinality,
                            target: relationship.target.clone(),
                        },
                    });
                    if !is_last {
                        current = self.resolve(&relationship.target)?;
                    }
                }
            }
        }

        Ok(steps)
    }

    /// Resolve a path made only of relationships (as used by `include`)
    pub fn resolve_relationship_path(
        &self,
        collection: &str,
        path: &str,
    ) -> CatalogResult<Vec<PathStep>> {
        let steps = self.resolve_field_path(collection, path)?;
        if let Some(step) = steps.iter().find(|s| !s.is_relationship()) {
            return Err(CatalogError::invalid_path(
                path,
                format!("'{}' is not a relationship", step.field),
            ));
        }
        Ok(steps)
    }
}
