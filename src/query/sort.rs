//! Sort descriptor compiler
//!
//! `sort=-published_on,author.name` orders by `published_on` descending,
//! then by the author's name ascending. A leading `+` is accepted and means
//! ascending.

use std::collections::HashSet;

use crate::catalog::{Catalog, EntityMeta, PathStep, StepKind};

use super::errors::{QueryError, QueryResult};
use super::filter::FieldPath;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A single ordering key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub path: FieldPath,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn is_descending(&self) -> bool {
        self.direction == SortDirection::Descending
    }
}

/// Compile a raw `sort` parameter for `collection`
pub fn compile_sort(catalog: &Catalog, collection: &str, raw: &str) -> QueryResult<Vec<SortKey>> {
    let mut keys = Vec::new();
    let mut seen = HashSet::new();

    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(QueryError::InvalidSort("empty sort field".to_string()));
        }

        let (direction, path) = if let Some(rest) = part.strip_prefix('-') {
            (SortDirection::Descending, rest)
        } else if let Some(rest) = part.strip_prefix('+') {
            (SortDirection::Ascending, rest)
        } else {
            (SortDirection::Ascending, part)
        };

        if !seen.insert(path) {
            return Err(QueryError::InvalidSort(format!(
                "field '{}' appears more than once",
                path
            )));
        }

        let steps = catalog
            .resolve_field_path(collection, path)
            .map_err(|e| QueryError::InvalidSort(e.to_string()))?;
        check_sortable(path, &steps)?;

        keys.push(SortKey {
            path: FieldPath {
                raw: path.to_string(),
                steps,
            },
            direction,
        });
    }

    Ok(keys)
}

fn check_sortable(path: &str, steps: &[PathStep]) -> QueryResult<()> {
    if let Some(step) = steps.iter().find(|s| s.is_to_many()) {
        return Err(QueryError::InvalidSort(format!(
            "cannot sort by '{}': '{}' is a to-many relationship",
            path, step.field
        )));
    }
    match steps.last().map(|s| &s.kind) {
        Some(StepKind::Attribute(_)) => Ok(()),
        _ => Err(QueryError::InvalidSort(format!(
            "cannot sort by relationship '{}'",
            path
        ))),
    }
}

/// Primary key ascending, used when a request names no sort
pub fn default_sort(meta: &EntityMeta) -> Vec<SortKey> {
    meta.primary_key()
        .iter()
        .filter_map(|key| {
            let attribute = meta.attribute(key)?;
            Some(SortKey {
                path: FieldPath {
                    raw: key.clone(),
                    steps: vec![PathStep {
                        collection: meta.collection().to_string(),
                        field: key.clone(),
                        kind: StepKind::Attribute(attribute.attr_type),
                    }],
                },
                direction: SortDirection::Ascending,
            })
        })
        .collect()
}
