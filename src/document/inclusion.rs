//! Compound documents
//!
//! Include paths are merged into a tree and walked breadth first. Each
//! node of the tree costs one batched relationship fetch for all parents
//! reached at that depth. Included resources are unique by `(type, id)`
//! and never repeat primary data.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::catalog::{Catalog, EntityMeta};
use crate::query::{FieldPath, Fieldsets};
use crate::storage::{Entity, StorageError};

use super::errors::DocumentResult;
use super::serializer::{RelationLoader, Serializer};
use super::types::{ResourceIdentifier, ResourceObject};

/// Include paths merged by common prefix
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IncludeTree {
    children: BTreeMap<String, IncludeTree>,
}

impl IncludeTree {
    pub fn from_paths(paths: &[FieldPath]) -> Self {
        let mut root = IncludeTree::default();
        for path in paths {
            let mut node = &mut root;
            for step in &path.steps {
                node = node.children.entry(step.field.clone()).or_default();
            }
        }
        root
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Resolve `paths` starting from `primary` entities of `meta`'s type
pub async fn collect_included(
    serializer: &Serializer<'_>,
    loader: &mut RelationLoader<'_>,
    meta: &EntityMeta,
    primary: &[Entity],
    paths: &[FieldPath],
    fieldsets: &Fieldsets,
) -> DocumentResult<Vec<ResourceObject>> {
    let tree = IncludeTree::from_paths(paths);
    if tree.is_empty() || primary.is_empty() {
        return Ok(Vec::new());
    }
    let catalog = serializer.catalog();

    let mut seen: HashSet<ResourceIdentifier> = primary
        .iter()
        .filter_map(|e| e.id(meta))
        .map(|id| ResourceIdentifier::new(meta.collection(), id))
        .collect();
    let mut included = Vec::new();

    let mut queue: VecDeque<(&IncludeTree, &EntityMeta, Vec<Entity>)> = VecDeque::new();
    queue.push_back((&tree, meta, primary.to_vec()));

    while let Some((node, parent_meta, parents)) = queue.pop_front() {
        let parent_ids: BTreeSet<String> = parents.iter().filter_map(|e| e.id(parent_meta)).collect();

        for (name, child) in &node.children {
            let Some(relationship) = parent_meta.relationship(name) else {
                continue;
            };
            let target = resolve(catalog, &relationship.target)?;
            loader.load(parent_meta, relationship, &parent_ids).await?;

            // Every related entity reached at this node, once each
            let mut reached = Vec::new();
            let mut reached_ids = BTreeSet::new();
            for parent_id in &parent_ids {
                for entity in loader.related(parent_meta.collection(), name, parent_id) {
                    if let Some(id) = entity.id(target) {
                        if reached_ids.insert(id) {
                            reached.push(entity.clone());
                        }
                    }
                }
            }

            let fresh: Vec<Entity> = reached
                .iter()
                .filter(|e| {
                    e.id(target)
                        .map(|id| seen.insert(ResourceIdentifier::new(target.collection(), id)))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            included.extend(
                serializer
                    .serialize_many(loader, target, &fresh, fieldsets)
                    .await?,
            );

            if !child.is_empty() && !reached.is_empty() {
                queue.push_back((child, target, reached));
            }
        }
    }

    Ok(included)
}

fn resolve<'c>(catalog: &'c Catalog, collection: &str) -> DocumentResult<&'c EntityMeta> {
    catalog
        .resolve(collection)
        .map_err(|e| StorageError::backend(e.to_string()).into())
}
