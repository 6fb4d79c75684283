//! Storage collaborator contract
//!
//! The engine never stores anything itself. Every read and write goes
//! through [`Storage`], which a concrete backend implements. All methods
//! are async and may be suspended; locking and transactions belong to the
//! backend.
//!
//! [`memory::InMemoryStorage`] is the reference backend used by the CLI
//! and the tests.

mod errors;
mod eval;
pub mod memory;
mod recording;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{EntityMeta, RelationshipDef};
use crate::query::{FilterNode, SortKey};

pub use errors::{StorageError, StorageResult};
pub use eval::{compare_values, like_to_regex};
pub use memory::InMemoryStorage;
pub use recording::RecordingStorage;

/// A stored row: attribute values plus any foreign-key columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    pub values: Map<String, Value>,
}

impl Entity {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Wire id according to `meta`'s primary key
    pub fn id(&self, meta: &EntityMeta) -> Option<String> {
        meta.id_from_values(&self.values)
    }
}

impl From<Value> for Entity {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }
}

/// New state of one relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationChange {
    ToOne(Option<String>),
    ToMany(Vec<String>),
}

impl RelationChange {
    /// Every id the change links to
    pub fn ids(&self) -> Vec<&str> {
        match self {
            RelationChange::ToOne(id) => id.iter().map(String::as_str).collect(),
            RelationChange::ToMany(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// Attribute values and relationship states to write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, RelationChange>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relationships.is_empty()
    }

    /// Single relationship change, as used by relationship endpoints
    pub fn relation(name: impl Into<String>, change: RelationChange) -> Self {
        let mut changes = Self::new();
        changes.relationships.insert(name.into(), change);
        changes
    }
}

/// A page of matching entities and the total match count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub entities: Vec<Entity>,
    pub total: usize,
}

/// Related entities per parent id
pub type RelatedMap = HashMap<String, Vec<Entity>>;

/// Storage collaborator
pub trait Storage: Send + Sync {
    /// Matching entities in sort order, windowed by `limit`/`offset`
    fn query<'a>(
        &'a self,
        meta: &'a EntityMeta,
        filter: &'a FilterNode,
        sort: &'a [SortKey],
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'a, StorageResult<QueryOutput>>;

    fn fetch_by_id<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Entity>>>;

    /// Related entities of every parent in one call
    fn fetch_related<'a>(
        &'a self,
        meta: &'a EntityMeta,
        relationship: &'a RelationshipDef,
        parent_ids: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, StorageResult<RelatedMap>>;

    /// Persist a new entity; `id` is set when the client chose it
    fn create<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: Option<&'a str>,
        changes: &'a Changes,
    ) -> BoxFuture<'a, StorageResult<Entity>>;

    fn update<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        changes: &'a Changes,
    ) -> BoxFuture<'a, StorageResult<Entity>>;

    /// Returns whether an entity was removed
    fn delete<'a>(&'a self, meta: &'a EntityMeta, id: &'a str) -> BoxFuture<'a, StorageResult<bool>>;

    /// Link `ids` through a to-many relationship, keeping current members.
    /// Must be atomic with respect to other member edits.
    fn add_members<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        relationship: &'a RelationshipDef,
        ids: &'a [String],
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Unlink `ids` from a to-many relationship; ids not linked are ignored
    fn remove_members<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        relationship: &'a RelationshipDef,
        ids: &'a [String],
    ) -> BoxFuture<'a, StorageResult<()>>;
}
