//! apiary - a generic JSON:API engine over typed entity collections
//!
//! - `catalog`: entity types and the frozen schema catalog
//! - `query`: filter/sort compiler and per-request query specs
//! - `pagination`: page windows and navigation links
//! - `document`: JSON:API documents, serializer and deserializer
//! - `storage`: the storage collaborator contract and an in-memory backend
//! - `engine`: request state machine and hook pipeline
//! - `http`: axum adapter
//! - `cli`: configuration and command line

pub mod catalog;
pub mod cli;
pub mod document;
pub mod engine;
pub mod http;
pub mod observability;
pub mod pagination;
pub mod query;
pub mod storage;
