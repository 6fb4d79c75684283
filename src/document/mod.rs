//! JSON:API documents
//!
//! Wire types, the entity serializer with batched linkage, compound
//! document assembly and inbound document validation.

mod codec;
mod deserializer;
mod errors;
mod inclusion;
mod serializer;
mod types;

pub use codec::{CodecRegistry, ResourceDeserializer, ResourceSerializer};
pub use deserializer::{parse_linkage, primary_data, Deserializer, MutationPlan, WriteMode};
pub use errors::{DocumentError, DocumentResult};
pub use inclusion::{collect_included, IncludeTree};
pub use serializer::{RelationLoader, Serializer};
pub(crate) use serializer::needs_fetch;
pub use types::{
    Document, ErrorObject, ErrorSource, JsonApiObject, Linkage, PrimaryData, RelationshipLinks,
    RelationshipObject, ResourceIdentifier, ResourceLinks, ResourceObject, JSONAPI_VERSION,
    MEDIA_TYPE,
};
