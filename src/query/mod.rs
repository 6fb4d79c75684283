//! Filter/sort compiler and query specification
//!
//! Turns raw query parameters into storage-agnostic predicates, ordering
//! keys, page windows, sparse fieldsets and inclusion paths. Nothing here
//! touches storage.

mod errors;
mod filter;
mod params;
mod sort;

use std::collections::BTreeMap;

pub use errors::{QueryError, QueryResult};
pub use filter::{
    compile_filter, Comparison, FieldPath, FilterCompiler, FilterNode, Operand, Operator,
    Quantified, Quantifier,
};
pub use params::{Fieldsets, QuerySpec};
pub use sort::{compile_sort, default_sort, SortDirection, SortKey};

/// Raw query parameters, keyed by name
pub type RawQuery = BTreeMap<String, String>;

pub const FILTER_PARAM: &str = "filter";
/// Accepted spelling of [`FILTER_PARAM`]
pub const FILTER_ALIAS: &str = "filter[objects]";
pub const SORT_PARAM: &str = "sort";
pub const INCLUDE_PARAM: &str = "include";
pub const FIELDS_PREFIX: &str = "fields[";

#[cfg(test)]
pub(crate) fn test_catalog() -> crate::catalog::Catalog {
    use crate::catalog::{AttributeDef, AttributeType, Catalog, EntityType, Join, RelationshipDef};

    Catalog::builder()
        .with(
            EntityType::new("people", "id")
                .attribute(AttributeDef::number("id"))
                .attribute(AttributeDef::string("name"))
                .relationship(RelationshipDef::to_many(
                    "articles",
                    "articles",
                    Join::RemoteKey("author_id".into()),
                )),
        )
        .unwrap()
        .with(
            EntityType::new("articles", "id")
                .attribute(AttributeDef::number("id"))
                .attribute(AttributeDef::string("title"))
                .attribute(AttributeDef::number("views"))
                .attribute(AttributeDef::number("likes"))
                .attribute(AttributeDef::boolean("published"))
                .attribute(AttributeDef::date("published_on"))
                .attribute(AttributeDef::new("extra", AttributeType::Opaque))
                .relationship(RelationshipDef::to_one(
                    "author",
                    "people",
                    Join::ForeignKey("author_id".into()),
                ))
                .relationship(RelationshipDef::to_many(
                    "comments",
                    "comments",
                    Join::RemoteKey("article_id".into()),
                )),
        )
        .unwrap()
        .with(
            EntityType::new("comments", "id")
                .attribute(AttributeDef::number("id"))
                .attribute(AttributeDef::string("body"))
                .relationship(RelationshipDef::to_one(
                    "article",
                    "articles",
                    Join::ForeignKey("article_id".into()),
                ))
                .relationship(RelationshipDef::to_one(
                    "author",
                    "people",
                    Join::ForeignKey("author_id".into()),
                )),
        )
        .unwrap()
        .build()
        .unwrap()
}
