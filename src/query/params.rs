//! Query specification
//!
//! A [`QuerySpec`] is everything a request asks about its result set: which
//! rows (filter), in what order (sort), which window (page), which fields
//! (sparse fieldsets), and which related resources to include.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::catalog::{Catalog, EntityMeta};
use crate::pagination::{PageDefaults, PageRequest};

use super::errors::{QueryError, QueryResult};
use super::filter::{compile_filter, FieldPath, FilterNode};
use super::sort::{compile_sort, default_sort, SortKey};
use super::{RawQuery, FIELDS_PREFIX, FILTER_ALIAS, FILTER_PARAM, INCLUDE_PARAM, SORT_PARAM};

/// Requested fields per collection. Collections without an entry get
/// their default fieldset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fieldsets {
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl Fieldsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `collection` to `fields`
    pub fn insert(&mut self, collection: impl Into<String>, fields: BTreeSet<String>) {
        self.sets.insert(collection.into(), fields);
    }

    pub fn get(&self, collection: &str) -> Option<&BTreeSet<String>> {
        self.sets.get(collection)
    }

    /// Fields serialized for resources of `meta`'s type
    pub fn fields_for(&self, meta: &EntityMeta) -> BTreeSet<String> {
        match self.sets.get(meta.collection()) {
            Some(requested) => meta
                .default_fieldset()
                .intersection(requested)
                .cloned()
                .collect(),
            None => meta.default_fieldset().clone(),
        }
    }
}

/// Parsed per-request query
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub filter: FilterNode,
    /// Never empty once parsed: falls back to the primary key
    pub sort: Vec<SortKey>,
    pub page: PageRequest,
    pub fieldsets: Fieldsets,
    /// Relationship paths to include, each resolved through the catalog
    pub include: Vec<FieldPath>,
    /// Raw parameters, kept for pagination links
    pub raw: RawQuery,
}

impl QuerySpec {
    /// Parse raw query parameters for a request on `meta`'s collection
    pub fn parse(
        catalog: &Catalog,
        meta: &EntityMeta,
        raw: &RawQuery,
        defaults: &PageDefaults,
    ) -> QueryResult<Self> {
        let collection = meta.collection();

        let filter = match raw.get(FILTER_PARAM).or_else(|| raw.get(FILTER_ALIAS)) {
            None => FilterNode::always(),
            Some(text) if text.trim().is_empty() => FilterNode::always(),
            Some(text) => {
                let descriptor: Value = serde_json::from_str(text)
                    .map_err(|e| QueryError::filter("", format!("filter is not valid JSON: {}", e)))?;
                compile_filter(catalog, collection, &descriptor)?
            }
        };

        let sort = match raw.get(SORT_PARAM) {
            Some(text) if !text.trim().is_empty() => compile_sort(catalog, collection, text)?,
            _ => default_sort(meta),
        };

        let page = PageRequest::parse(raw, defaults)?;
        let fieldsets = parse_fieldsets(catalog, raw)?;

        let include = match raw.get(INCLUDE_PARAM) {
            Some(text) => {
                let paths: Vec<&str> = text
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect();
                compile_include(catalog, collection, &paths)?
            }
            None => {
                let paths: Vec<&str> = meta
                    .options()
                    .default_includes
                    .iter()
                    .map(String::as_str)
                    .collect();
                compile_include(catalog, collection, &paths)?
            }
        };

        Ok(Self {
            filter,
            sort,
            page,
            fieldsets,
            include,
            raw: raw.clone(),
        })
    }
}

fn parse_fieldsets(catalog: &Catalog, raw: &RawQuery) -> QueryResult<Fieldsets> {
    let mut fieldsets = Fieldsets::new();

    for (key, value) in raw {
        let Some(collection) = key
            .strip_prefix(FIELDS_PREFIX)
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            continue;
        };

        let meta = catalog.resolve(collection).map_err(|_| QueryError::InvalidFieldset {
            parameter: key.clone(),
            detail: format!("unknown type '{}'", collection),
        })?;

        let mut fields = BTreeSet::new();
        for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if !meta.default_fieldset().contains(field) {
                return Err(QueryError::InvalidFieldset {
                    parameter: key.clone(),
                    detail: format!("'{}' has no field '{}'", collection, field),
                });
            }
            fields.insert(field.to_string());
        }
        fieldsets.insert(collection, fields);
    }

    Ok(fieldsets)
}

fn compile_include(catalog: &Catalog, collection: &str, paths: &[&str]) -> QueryResult<Vec<FieldPath>> {
    let mut seen = BTreeSet::new();
    let mut include = Vec::new();

    for path in paths {
        if !seen.insert(*path) {
            continue;
        }
        let steps = catalog
            .resolve_relationship_path(collection, path)
            .map_err(|e| QueryError::InvalidInclude {
                path: path.to_string(),
                detail: e.to_string(),
            })?;
        include.push(FieldPath {
            raw: path.to_string(),
            steps,
        });
    }

    Ok(include)
}
