//! Entity to resource-object serialization
//!
//! Relationship linkage is resolved in batches: serializing N entities
//! costs at most one `fetch_related` call per distinct relationship, keyed
//! by the N parent ids. To-one relationships held in a local foreign key
//! need no fetch at all.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{Map, Value};

use crate::catalog::{value_to_id, Catalog, EntityMeta, RelationshipDef};
use crate::observability::Logger;
use crate::query::Fieldsets;
use crate::storage::{Entity, RelatedMap, Storage, StorageError};

use super::codec::CodecRegistry;
use super::errors::DocumentResult;
use super::types::{
    Linkage, RelationshipLinks, RelationshipObject, ResourceIdentifier, ResourceLinks,
    ResourceObject,
};

/// Request-scoped cache of relationship fetches
///
/// Keyed by `(collection, relationship)`; each entry maps parent id to the
/// related entities. Only parents not fetched yet go to storage.
pub struct RelationLoader<'a> {
    storage: &'a dyn Storage,
    cache: HashMap<(String, String), RelatedMap>,
}

impl<'a> RelationLoader<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            cache: HashMap::new(),
        }
    }

    /// Make sure related entities of every parent in `parent_ids` are cached
    pub async fn load(
        &mut self,
        meta: &EntityMeta,
        relationship: &RelationshipDef,
        parent_ids: &BTreeSet<String>,
    ) -> DocumentResult<()> {
        let key = (meta.collection().to_string(), relationship.name.clone());
        let missing: BTreeSet<String> = match self.cache.get(&key) {
            Some(cached) => parent_ids
                .iter()
                .filter(|id| !cached.contains_key(*id))
                .cloned()
                .collect(),
            None => parent_ids.clone(),
        };
        if missing.is_empty() {
            return Ok(());
        }

        let parents = missing.len().to_string();
        Logger::trace(
            "RELATION_FETCH",
            &[
                ("collection", meta.collection()),
                ("parents", parents.as_str()),
                ("relationship", relationship.name.as_str()),
            ],
        );
        let mut fetched = self
            .storage
            .fetch_related(meta, relationship, &missing)
            .await?;
        // Parents the backend left out have no related entities
        for id in &missing {
            fetched.entry(id.clone()).or_default();
        }
        self.cache.entry(key).or_default().extend(fetched);
        Ok(())
    }

    /// Cached related entities of one parent
    pub fn related(&self, collection: &str, relationship: &str, parent_id: &str) -> &[Entity] {
        self.cache
            .get(&(collection.to_string(), relationship.to_string()))
            .and_then(|m| m.get(parent_id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Builds resource objects for one request
pub struct Serializer<'a> {
    catalog: &'a Catalog,
    codecs: &'a CodecRegistry,
    base_url: &'a str,
}

impl<'a> Serializer<'a> {
    pub fn new(catalog: &'a Catalog, codecs: &'a CodecRegistry, base_url: &'a str) -> Self {
        Self {
            catalog,
            codecs,
            base_url: base_url.trim_end_matches('/'),
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    /// `{base}/{collection}/{id}`
    pub fn resource_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }

    pub fn relationship_links(&self, collection: &str, id: &str, relation: &str) -> RelationshipLinks {
        let resource = self.resource_url(collection, id);
        RelationshipLinks {
            self_link: format!("{}/relationships/{}", resource, relation),
            related: format!("{}/{}", resource, relation),
        }
    }

    /// Serialize `entities` of `meta`'s type, restricted by `fieldsets`
    pub async fn serialize_many(
        &self,
        loader: &mut RelationLoader<'_>,
        meta: &EntityMeta,
        entities: &[Entity],
        fieldsets: &Fieldsets,
    ) -> DocumentResult<Vec<ResourceObject>> {
        let fields = fieldsets.fields_for(meta);

        let ids: BTreeSet<String> = entities.iter().filter_map(|e| e.id(meta)).collect();
        for relationship in meta.relationships() {
            if fields.contains(&relationship.name) && needs_fetch(relationship) {
                loader.load(meta, relationship, &ids).await?;
            }
        }

        let mut resources = Vec::with_capacity(entities.len());
        for entity in entities {
            let Some(id) = entity.id(meta) else {
                continue;
            };
            let mut resource = self.build(loader, meta, entity, id, &fields)?;
            if let Some(custom) = self.codecs.serializer(meta.collection()) {
                custom.adjust(entity, &mut resource);
            }
            resources.push(resource);
        }
        Ok(resources)
    }

    /// Serialize a single entity
    pub async fn serialize_one(
        &self,
        loader: &mut RelationLoader<'_>,
        meta: &EntityMeta,
        entity: &Entity,
        fieldsets: &Fieldsets,
    ) -> DocumentResult<Option<ResourceObject>> {
        let mut resources = self
            .serialize_many(loader, meta, std::slice::from_ref(entity), fieldsets)
            .await?;
        Ok(resources.pop())
    }

    fn build(
        &self,
        loader: &RelationLoader<'_>,
        meta: &EntityMeta,
        entity: &Entity,
        id: String,
        fields: &BTreeSet<String>,
    ) -> DocumentResult<ResourceObject> {
        let mut attributes = Map::new();
        for name in meta.exposed_attributes() {
            if fields.contains(name) {
                let value = entity.get(name).cloned().unwrap_or(Value::Null);
                attributes.insert(name.clone(), value);
            }
        }

        let mut relationships = BTreeMap::new();
        for relationship in meta.relationships() {
            if !fields.contains(&relationship.name) {
                continue;
            }
            let data = self.linkage(loader, meta, entity, &id, relationship)?;
            relationships.insert(
                relationship.name.clone(),
                RelationshipObject {
                    links: Some(self.relationship_links(meta.collection(), &id, &relationship.name)),
                    data,
                    meta: None,
                },
            );
        }

        Ok(ResourceObject {
            kind: meta.collection().to_string(),
            links: Some(ResourceLinks {
                self_link: self.resource_url(meta.collection(), &id),
            }),
            id,
            attributes,
            relationships,
            meta: None,
        })
    }

    /// Linkage of one relationship of `entity`
    pub fn linkage(
        &self,
        loader: &RelationLoader<'_>,
        meta: &EntityMeta,
        entity: &Entity,
        id: &str,
        relationship: &RelationshipDef,
    ) -> DocumentResult<Linkage> {
        let target = &relationship.target;

        if let (Some(column), false) = (relationship.foreign_key(), relationship.is_to_many()) {
            let linked = match entity.get(column) {
                None | Some(Value::Null) => None,
                Some(key) => Some(ResourceIdentifier::new(target, value_to_id(key))),
            };
            return Ok(Linkage::ToOne(linked));
        }

        let target_meta = self
            .catalog
            .resolve(target)
            .map_err(|e| StorageError::backend(e.to_string()))?;
        let mut identifiers: Vec<ResourceIdentifier> = loader
            .related(meta.collection(), &relationship.name, id)
            .iter()
            .filter_map(|e| e.id(target_meta))
            .map(|related_id| ResourceIdentifier::new(target, related_id))
            .collect();

        Ok(if relationship.is_to_many() {
            Linkage::ToMany(identifiers)
        } else {
            Linkage::ToOne(if identifiers.is_empty() {
                None
            } else {
                Some(identifiers.swap_remove(0))
            })
        })
    }
}

/// Whether linkage needs a storage round trip
pub(crate) fn needs_fetch(relationship: &RelationshipDef) -> bool {
    relationship.is_to_many() || !relationship.is_owning()
}
