//! In-memory storage backend
//!
//! Rows are JSON objects kept per collection behind a single `RwLock`.
//! Relationships are resolved through the catalog's join descriptions:
//!
//! - `foreign_key(col)`: the row stores the related id in `col`
//! - `remote_key(col)`: related rows store this row's id in `col`
//! - `association`: pairs kept in a link table per relationship

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::{value_to_id, AttributeType, Catalog, EntityMeta, Join, RelationshipDef};
use crate::query::{FilterNode, SortKey};

use super::eval::{self, Patterns, Row, RowSource};
use super::{Changes, Entity, QueryOutput, RelatedMap, RelationChange, Storage, StorageError, StorageResult};

type LinkKey = (String, String);

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    /// (collection, relation) -> (parent id, child id)
    links: HashMap<LinkKey, BTreeSet<(String, String)>>,
    /// Last generated numeric id per collection
    sequences: HashMap<String, i64>,
}

/// Read view over the state with the catalog at hand
struct View<'a> {
    catalog: &'a Catalog,
    state: &'a State,
}

impl View<'_> {
    fn find_row(&self, meta: &EntityMeta, id: &str) -> Option<&Row> {
        self.state
            .tables
            .get(meta.collection())?
            .iter()
            .find(|row| meta.id_from_values(row).as_deref() == Some(id))
    }
}

impl RowSource for View<'_> {
    fn related_rows(&self, collection: &str, row: &Row, relation: &str) -> Vec<Row> {
        let Ok(meta) = self.catalog.resolve(collection) else {
            return Vec::new();
        };
        let Some(relationship) = meta.relationship(relation) else {
            return Vec::new();
        };
        let Ok(target) = self.catalog.resolve(&relationship.target) else {
            return Vec::new();
        };
        let rows = self
            .state
            .tables
            .get(target.collection())
            .map(Vec::as_slice)
            .unwrap_or_default();

        match &relationship.join {
            Join::ForeignKey(column) => match row.get(column) {
                None | Some(Value::Null) => Vec::new(),
                Some(key) => {
                    let id = value_to_id(key);
                    self.find_row(target, &id).cloned().into_iter().collect()
                }
            },
            Join::RemoteKey(column) => {
                let Some(parent_id) = meta.id_from_values(row) else {
                    return Vec::new();
                };
                rows.iter()
                    .filter(|r| match r.get(column) {
                        None | Some(Value::Null) => false,
                        Some(v) => value_to_id(v) == parent_id,
                    })
                    .cloned()
                    .collect()
            }
            Join::Association => {
                let Some(parent_id) = meta.id_from_values(row) else {
                    return Vec::new();
                };
                let key = (collection.to_string(), relation.to_string());
                let Some(pairs) = self.state.links.get(&key) else {
                    return Vec::new();
                };
                pairs
                    .iter()
                    .filter(|(parent, _)| *parent == parent_id)
                    .filter_map(|(_, child)| self.find_row(target, child).cloned())
                    .collect()
            }
        }
    }
}

/// Reference storage backend holding everything in memory
pub struct InMemoryStorage {
    catalog: Arc<Catalog>,
    state: RwLock<State>,
}

impl InMemoryStorage {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            state: RwLock::new(State::default()),
        }
    }

    fn read_state(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StorageError::backend("Lock poisoned"))
    }

    fn write_state(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StorageError::backend("Lock poisoned"))
    }

    /// Insert a raw row, bypassing relationship handling (seeding)
    pub fn insert(&self, collection: &str, row: Value) -> StorageResult<()> {
        let meta = self
            .catalog
            .resolve(collection)
            .map_err(|e| StorageError::backend(e.to_string()))?;
        let Value::Object(row) = row else {
            return Err(StorageError::backend(format!(
                "row for '{}' must be an object",
                collection
            )));
        };
        let id = meta.id_from_values(&row).ok_or_else(|| {
            StorageError::backend(format!("row for '{}' is missing its primary key", collection))
        })?;

        let mut state = self.write_state()?;
        if (View { catalog: &self.catalog, state: &state }).find_row(meta, &id).is_some() {
            return Err(StorageError::Conflict(format!(
                "'{}' already has a resource with id '{}'",
                collection, id
            )));
        }
        state
            .tables
            .entry(collection.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    /// Record an association link (seeding)
    pub fn link(&self, collection: &str, relation: &str, parent: &str, child: &str) -> StorageResult<()> {
        let mut state = self.write_state()?;
        state
            .links
            .entry((collection.to_string(), relation.to_string()))
            .or_default()
            .insert((parent.to_string(), child.to_string()));
        Ok(())
    }

    /// Load `{"collection": [row, ...], ...}`; returns the number of rows
    pub fn load_seed(&self, seed: &Value) -> StorageResult<usize> {
        let Value::Object(collections) = seed else {
            return Err(StorageError::backend("seed must be an object of collections"));
        };
        let mut count = 0;
        for (collection, rows) in collections {
            let Value::Array(rows) = rows else {
                return Err(StorageError::backend(format!(
                    "seed for '{}' must be a list of rows",
                    collection
                )));
            };
            for row in rows {
                self.insert(collection, row.clone())?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Number of rows stored for `collection`
    pub fn len(&self, collection: &str) -> usize {
        self.state
            .read()
            .map(|state| state.tables.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn query_rows(
        &self,
        meta: &EntityMeta,
        filter: &FilterNode,
        sort: &[SortKey],
        limit: usize,
        offset: usize,
    ) -> StorageResult<QueryOutput> {
        let state = self.read_state()?;
        let view = View {
            catalog: &self.catalog,
            state: &state,
        };

        let patterns = Patterns::compile(filter)?;
        let mut matching: Vec<Row> = Vec::new();
        for row in state
            .tables
            .get(meta.collection())
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            if eval::matches(&view, &patterns, meta.collection(), row, filter)? {
                matching.push(row.clone());
            }
        }

        let total = matching.len();
        let entities = eval::sort_rows(&view, matching, sort)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(Entity::new)
            .collect();

        Ok(QueryOutput { entities, total })
    }

    fn fetch_one(&self, meta: &EntityMeta, id: &str) -> StorageResult<Option<Entity>> {
        let state = self.read_state()?;
        let view = View {
            catalog: &self.catalog,
            state: &state,
        };
        Ok(view.find_row(meta, id).cloned().map(Entity::new))
    }

    fn related(
        &self,
        meta: &EntityMeta,
        relationship: &RelationshipDef,
        parent_ids: &BTreeSet<String>,
    ) -> StorageResult<RelatedMap> {
        let state = self.read_state()?;
        let view = View {
            catalog: &self.catalog,
            state: &state,
        };
        let target = self
            .catalog
            .resolve(&relationship.target)
            .map_err(|e| StorageError::backend(e.to_string()))?;

        let mut related = RelatedMap::new();
        for parent_id in parent_ids {
            let entities = match view.find_row(meta, parent_id) {
                Some(row) => view
                    .related_rows(meta.collection(), row, &relationship.name)
                    .into_iter()
                    .map(Entity::new)
                    .collect(),
                None => Vec::new(),
            };
            related.insert(parent_id.clone(), dedup_by_id(target, entities));
        }
        Ok(related)
    }

    fn create_row(&self, meta: &EntityMeta, id: Option<&str>, changes: &Changes) -> StorageResult<Entity> {
        let mut state = self.write_state()?;
        let collection = meta.collection().to_string();

        let mut row = changes.attributes.clone();
        let id = match id {
            Some(id) => {
                let keys = meta.parse_id(id).ok_or_else(|| {
                    StorageError::Conflict(format!("'{}' is not a valid id for '{}'", id, collection))
                })?;
                let view = View {
                    catalog: &self.catalog,
                    state: &state,
                };
                if view.find_row(meta, id).is_some() {
                    return Err(StorageError::Conflict(format!(
                        "'{}' already has a resource with id '{}'",
                        collection, id
                    )));
                }
                row.extend(keys);
                id.to_string()
            }
            None => {
                let (key, value) = generate_key(&mut state, meta)?;
                let id = value_to_id(&value);
                row.insert(key, value);
                id
            }
        };

        self.check_targets(&state, meta, changes)?;
        state.tables.entry(collection).or_default().push(row);
        self.apply_relationships(&mut state, meta, &id, changes)?;

        let view = View {
            catalog: &self.catalog,
            state: &state,
        };
        view.find_row(meta, &id)
            .cloned()
            .map(Entity::new)
            .ok_or_else(|| StorageError::backend("created row vanished"))
    }

    fn update_row(&self, meta: &EntityMeta, id: &str, changes: &Changes) -> StorageResult<Entity> {
        let mut state = self.write_state()?;
        let index = row_index(&state, meta, id)
            .ok_or_else(|| StorageError::not_found(meta.collection(), id))?;

        self.check_targets(&state, meta, changes)?;
        if let Some(row) = state
            .tables
            .get_mut(meta.collection())
            .and_then(|rows| rows.get_mut(index))
        {
            for (key, value) in &changes.attributes {
                row.insert(key.clone(), value.clone());
            }
        }
        self.apply_relationships(&mut state, meta, id, changes)?;

        state
            .tables
            .get(meta.collection())
            .and_then(|rows| rows.get(index))
            .cloned()
            .map(Entity::new)
            .ok_or_else(|| StorageError::not_found(meta.collection(), id))
    }

    fn delete_row(&self, meta: &EntityMeta, id: &str) -> StorageResult<bool> {
        let mut state = self.write_state()?;
        let Some(index) = row_index(&state, meta, id) else {
            return Ok(false);
        };
        if let Some(rows) = state.tables.get_mut(meta.collection()) {
            rows.remove(index);
        }
        for relationship in meta.relationships() {
            let key = (meta.collection().to_string(), relationship.name.clone());
            if let Some(pairs) = state.links.get_mut(&key) {
                pairs.retain(|(parent, _)| parent != id);
            }
        }
        Ok(true)
    }

    /// Add or remove to-many members under a single write lock
    fn edit_members(
        &self,
        meta: &EntityMeta,
        id: &str,
        relationship: &RelationshipDef,
        ids: &[String],
        add: bool,
    ) -> StorageResult<()> {
        let mut state = self.write_state()?;
        if row_index(&state, meta, id).is_none() {
            return Err(StorageError::not_found(meta.collection(), id));
        }
        let target = self
            .catalog
            .resolve(&relationship.target)
            .map_err(|e| StorageError::backend(e.to_string()))?;
        if add {
            let view = View {
                catalog: &self.catalog,
                state: &state,
            };
            if let Some(missing) = ids.iter().find(|i| view.find_row(target, i).is_none()) {
                return Err(StorageError::related_not_found(target.collection(), missing));
            }
        }
        let named: BTreeSet<&str> = ids.iter().map(String::as_str).collect();

        match &relationship.join {
            Join::ForeignKey(_) => Err(StorageError::backend(format!(
                "'{}' is not a to-many relationship",
                relationship.name
            ))),
            Join::RemoteKey(column) => {
                let parent_value = key_value(meta, id);
                if let Some(rows) = state.tables.get_mut(target.collection()) {
                    for row in rows.iter_mut() {
                        let Some(row_id) = target.id_from_values(row) else {
                            continue;
                        };
                        if !named.contains(row_id.as_str()) {
                            continue;
                        }
                        let points_here = row
                            .get(column)
                            .map_or(false, |v| !v.is_null() && value_to_id(v) == id);
                        if add {
                            row.insert(column.clone(), parent_value.clone());
                        } else if points_here {
                            row.insert(column.clone(), Value::Null);
                        }
                    }
                }
                Ok(())
            }
            Join::Association => {
                let pairs = state
                    .links
                    .entry((meta.collection().to_string(), relationship.name.clone()))
                    .or_default();
                for child in named {
                    let pair = (id.to_string(), child.to_string());
                    if add {
                        pairs.insert(pair);
                    } else {
                        pairs.remove(&pair);
                    }
                }
                Ok(())
            }
        }
    }

    /// Every linked id must exist before anything is written
    fn check_targets(&self, state: &State, meta: &EntityMeta, changes: &Changes) -> StorageResult<()> {
        let view = View {
            catalog: &self.catalog,
            state,
        };
        for (name, change) in &changes.relationships {
            let relationship = meta.relationship(name).ok_or_else(|| {
                StorageError::backend(format!("'{}' has no relationship '{}'", meta.collection(), name))
            })?;
            let target = self
                .catalog
                .resolve(&relationship.target)
                .map_err(|e| StorageError::backend(e.to_string()))?;
            for id in change.ids() {
                if view.find_row(target, id).is_none() {
                    return Err(StorageError::related_not_found(target.collection(), id));
                }
            }
        }
        Ok(())
    }

    fn apply_relationships(
        &self,
        state: &mut State,
        meta: &EntityMeta,
        id: &str,
        changes: &Changes,
    ) -> StorageResult<()> {
        for (name, change) in &changes.relationships {
            let Some(relationship) = meta.relationship(name) else {
                continue;
            };
            let target = self
                .catalog
                .resolve(&relationship.target)
                .map_err(|e| StorageError::backend(e.to_string()))?;

            match (&relationship.join, change) {
                (Join::ForeignKey(column), RelationChange::ToOne(related)) => {
                    let value = related
                        .as_deref()
                        .map(|related| key_value(target, related))
                        .unwrap_or(Value::Null);
                    let index = row_index(state, meta, id)
                        .ok_or_else(|| StorageError::not_found(meta.collection(), id))?;
                    if let Some(row) = state
                        .tables
                        .get_mut(meta.collection())
                        .and_then(|rows| rows.get_mut(index))
                    {
                        row.insert(column.clone(), value);
                    }
                }
                (Join::ForeignKey(_), RelationChange::ToMany(_)) => {
                    return Err(StorageError::backend(format!(
                        "to-many relationship '{}' cannot use a local foreign key",
                        name
                    )));
                }
                (Join::RemoteKey(column), change) => {
                    let parent_value = key_value(meta, id);
                    let wanted: BTreeSet<&str> = change.ids().into_iter().collect();
                    if let Some(rows) = state.tables.get_mut(target.collection()) {
                        for row in rows.iter_mut() {
                            let Some(row_id) = target.id_from_values(row) else {
                                continue;
                            };
                            let points_here = row
                                .get(column)
                                .map_or(false, |v| !v.is_null() && value_to_id(v) == id);
                            if wanted.contains(row_id.as_str()) {
                                row.insert(column.clone(), parent_value.clone());
                            } else if points_here {
                                row.insert(column.clone(), Value::Null);
                            }
                        }
                    }
                }
                (Join::Association, change) => {
                    let pairs = state
                        .links
                        .entry((meta.collection().to_string(), name.clone()))
                        .or_default();
                    pairs.retain(|(parent, _)| parent != id);
                    for child in change.ids() {
                        pairs.insert((id.to_string(), child.to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

fn row_index(state: &State, meta: &EntityMeta, id: &str) -> Option<usize> {
    state
        .tables
        .get(meta.collection())?
        .iter()
        .position(|row| meta.id_from_values(row).as_deref() == Some(id))
}

/// Stored form of an id: the typed key value for single keys
fn key_value(meta: &EntityMeta, id: &str) -> Value {
    match meta.parse_id(id) {
        Some(mut keys) if keys.len() == 1 => keys.remove(0).1,
        _ => Value::String(id.to_string()),
    }
}

fn generate_key(state: &mut State, meta: &EntityMeta) -> StorageResult<(String, Value)> {
    let [key] = meta.primary_key() else {
        return Err(StorageError::backend(format!(
            "'{}' has a composite key; the client must supply an id",
            meta.collection()
        )));
    };
    let attr_type = meta.attribute(key).map(|a| a.attr_type);

    match attr_type {
        Some(AttributeType::Number) => {
            let highest = state
                .tables
                .get(meta.collection())
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| row.get(key).and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            let sequence = state.sequences.entry(meta.collection().to_string()).or_insert(0);
            *sequence = (*sequence).max(highest) + 1;
            Ok((key.clone(), Value::from(*sequence)))
        }
        Some(AttributeType::String) => Ok((key.clone(), Value::String(Uuid::new_v4().to_string()))),
        _ => Err(StorageError::backend(format!(
            "cannot generate a key of this type for '{}'",
            meta.collection()
        ))),
    }
}

fn dedup_by_id(meta: &EntityMeta, entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = BTreeSet::new();
    entities
        .into_iter()
        .filter(|e| e.id(meta).map_or(true, |id| seen.insert(id)))
        .collect()
}

impl Storage for InMemoryStorage {
    fn query<'a>(
        &'a self,
        meta: &'a EntityMeta,
        filter: &'a FilterNode,
        sort: &'a [SortKey],
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'a, StorageResult<QueryOutput>> {
        Box::pin(async move { self.query_rows(meta, filter, sort, limit, offset) })
    }

    fn fetch_by_id<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Entity>>> {
        Box::pin(async move { self.fetch_one(meta, id) })
    }

    fn fetch_related<'a>(
        &'a self,
        meta: &'a EntityMeta,
        relationship: &'a RelationshipDef,
        parent_ids: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, StorageResult<RelatedMap>> {
        Box::pin(async move { self.related(meta, relationship, parent_ids) })
    }

    fn create<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: Option<&'a str>,
        changes: &'a Changes,
    ) -> BoxFuture<'a, StorageResult<Entity>> {
        Box::pin(async move { self.create_row(meta, id, changes) })
    }

    fn update<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        changes: &'a Changes,
    ) -> BoxFuture<'a, StorageResult<Entity>> {
        Box::pin(async move { self.update_row(meta, id, changes) })
    }

    fn delete<'a>(&'a self, meta: &'a EntityMeta, id: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(async move { self.delete_row(meta, id) })
    }

    fn add_members<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        relationship: &'a RelationshipDef,
        ids: &'a [String],
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move { self.edit_members(meta, id, relationship, ids, true) })
    }

    fn remove_members<'a>(
        &'a self,
        meta: &'a EntityMeta,
        id: &'a str,
        relationship: &'a RelationshipDef,
        ids: &'a [String],
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move { self.edit_members(meta, id, relationship, ids, false) })
    }
}
