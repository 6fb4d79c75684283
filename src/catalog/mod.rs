//! Schema catalog
//!
//! Entity types are data: field lists and relationship descriptors. The
//! catalog is built once, validated as a whole, and read without locking
//! by every request.
//!
//! # Invariants
//!
//! - Collection names are unique
//! - Every relationship target is registered
//! - Introspection tables are computed at build time, never per request

mod errors;
mod loader;
mod registry;
mod types;

pub use errors::{CatalogError, CatalogResult};
pub use loader::SchemaLoader;
pub use registry::{
    value_to_id, Catalog, CatalogBuilder, EntityMeta, FieldRef, PathStep, StepKind, ID_SEPARATOR,
};
pub use types::{
    parse_date, parse_datetime, AttributeDef, AttributeType, Cardinality, CollectionOptions,
    EntityType, Join, RelationshipDef, RESERVED_FIELD_NAMES,
};
