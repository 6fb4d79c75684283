//! Per-collection serializer/deserializer overrides
//!
//! Custom codecs run after the default conversion and adjust its result.
//! They are registered once, before the engine starts serving.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::storage::Entity;

use super::deserializer::MutationPlan;
use super::errors::DocumentResult;
use super::types::ResourceObject;

/// Adjusts resource objects after default serialization
pub trait ResourceSerializer: Send + Sync {
    fn adjust(&self, entity: &Entity, resource: &mut ResourceObject);
}

/// Adjusts mutation plans after default deserialization
pub trait ResourceDeserializer: Send + Sync {
    /// `data` is the inbound primary data object
    fn adjust(&self, data: &Value, plan: &mut MutationPlan) -> DocumentResult<()>;
}

impl<F> ResourceSerializer for F
where
    F: Fn(&Entity, &mut ResourceObject) + Send + Sync,
{
    fn adjust(&self, entity: &Entity, resource: &mut ResourceObject) {
        self(entity, resource)
    }
}

impl<F> ResourceDeserializer for F
where
    F: Fn(&Value, &mut MutationPlan) -> DocumentResult<()> + Send + Sync,
{
    fn adjust(&self, data: &Value, plan: &mut MutationPlan) -> DocumentResult<()> {
        self(data, plan)
    }
}

/// Custom codecs keyed by collection
#[derive(Default, Clone)]
pub struct CodecRegistry {
    serializers: HashMap<String, Arc<dyn ResourceSerializer>>,
    deserializers: HashMap<String, Arc<dyn ResourceDeserializer>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serializer(
        mut self,
        collection: impl Into<String>,
        serializer: impl ResourceSerializer + 'static,
    ) -> Self {
        self.serializers.insert(collection.into(), Arc::new(serializer));
        self
    }

    pub fn with_deserializer(
        mut self,
        collection: impl Into<String>,
        deserializer: impl ResourceDeserializer + 'static,
    ) -> Self {
        self.deserializers
            .insert(collection.into(), Arc::new(deserializer));
        self
    }

    pub fn serializer(&self, collection: &str) -> Option<&Arc<dyn ResourceSerializer>> {
        self.serializers.get(collection)
    }

    pub fn deserializer(&self, collection: &str) -> Option<&Arc<dyn ResourceDeserializer>> {
        self.deserializers.get(collection)
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("serializers", &self.serializers.keys().collect::<Vec<_>>())
            .field("deserializers", &self.deserializers.keys().collect::<Vec<_>>())
            .finish()
    }
}
