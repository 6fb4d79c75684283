//! Storage wrapper that records every call
//!
//! Lets callers check how many round trips a request made, e.g. that
//! relationship lookups are batched.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::catalog::{EntityMeta, RelationshipDef};
use crate::query::{FilterNode, SortKey};

use super::{Changes, Entity, QueryOutput, RelatedMap, Storage, StorageResult};

/// Delegates to an inner backend and logs a line per call
pub struct RecordingStorage {
    inner: Arc<dyn Storage>,
    calls: Mutex<Vec<String>>,
}

impl RecordingStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Calls made so far, e.g. `fetch_related articles.author`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Number of write calls
    pub fn writes(&self) -> usize {
        ["create", "update", "delete", "add_members", "remove_members"]
            .iter()
            .map(|prefix| self.count(prefix))
            .sum()
    }

    pub fn reset(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl Storage for RecordingStorage {
    fn query<'a>(
        &'a self,
        meta: &'a EntityMeta,
        filter: &'a FilterNode,
        sort: &'a [SortKey],
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'a, StorageResult<QueryOutput>> {
        self.record(format!("query {}", meta.collection()));
        self.inner.query(meta, filter, sort, limit, offset)
    }

    fn fetch_by_id<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Entity>>> {
        self.record(format!("fetch_by_id {}/{}", meta.collection(), id));
        self.inner.fetch_by_id(meta, id)
    }

    fn fetch_related<'a>(
        &'a self,
        meta: &'a EntityMeta,
        relationship: &'a RelationshipDef,
        parent_ids: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, StorageResult<RelatedMap>> {
        self.record(format!("fetch_related {}.{}", meta.collection(), relationship.name));
        self.inner.fetch_related(meta, relationship, parent_ids)
    }

    fn create<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: Option<&'a str>,
        changes: &'a Changes,
    ) -> BoxFuture<'a, StorageResult<Entity>> {
        self.record(format!("create {}", meta.collection()));
        self.inner.create(meta, id, changes)
    }

    fn update<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        changes: &'a Changes,
    ) -> BoxFuture<'a, StorageResult<Entity>> {
        self.record(format!("update {}/{}", meta.collection(), id));
        self.inner.update(meta, id, changes)
    }

    fn delete<'a>(&'a self, meta: &'a EntityMeta, id: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        self.record(format!("delete {}/{}", meta.collection(), id));
        self.inner.delete(meta, id)
    }

    fn add_members<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        relationship: &'a RelationshipDef,
        ids: &'a [String],
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.record(format!("add_members {}/{}.{}", meta.collection(), id, relationship.name));
        self.inner.add_members(meta, id, relationship, ids)
    }

    fn remove_members<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        relationship: &'a RelationshipDef,
        ids: &'a [String],
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.record(format!("remove_members {}/{}.{}", meta.collection(), id, relationship.name));
        self.inner.remove_members(meta, id, relationship, ids)
    }
}
