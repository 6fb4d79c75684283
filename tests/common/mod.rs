//! Shared fixtures for the integration suites
//!
//! Three collections: people, articles (author to-one via foreign key,
//! comments to-many) and comments. Every suite wraps the in-memory backend
//! in a `RecordingStorage` so it can count storage round trips.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use apiary::catalog::{
    AttributeDef, Catalog, CollectionOptions, EntityType, Join, RelationshipDef,
};
use apiary::document::CodecRegistry;
use apiary::engine::{Api, ApiRequest, ApiResponse, HookRegistry};
use apiary::storage::{InMemoryStorage, RecordingStorage};

pub const BASE_URL: &str = "http://api.test";

pub struct Fixture {
    pub api: Api,
    pub storage: Arc<RecordingStorage>,
}

impl Fixture {
    pub async fn send(&self, request: ApiRequest) -> ApiResponse {
        self.api.handle(request).await
    }

    /// Send, then forget the storage calls it made
    pub async fn send_unrecorded(&self, request: ApiRequest) -> ApiResponse {
        let response = self.api.handle(request).await;
        self.storage.reset();
        response
    }
}

pub fn catalog_with(people: CollectionOptions) -> Arc<Catalog> {
    Arc::new(
        Catalog::builder()
            .with(
                EntityType::new("people", "id")
                    .attribute(AttributeDef::number("id"))
                    .attribute(AttributeDef::string("name"))
                    .relationship(RelationshipDef::to_many(
                        "articles",
                        "articles",
                        Join::RemoteKey("author_id".into()),
                    ))
                    .options(people),
            )
            .unwrap()
            .with(
                EntityType::new("articles", "id")
                    .attribute(AttributeDef::number("id"))
                    .attribute(AttributeDef::string("title"))
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
            .unwrap(),
    )
}

pub fn seed() -> Value {
    json!({
        "people": [
            {"id": 1, "name": "Ann"},
            {"id": 2, "name": "Bo"}
        ],
        "articles": [
            {"id": 1, "title": "Rust", "author_id": 1},
            {"id": 2, "title": "Go", "author_id": 1}
        ],
        "comments": [
            {"id": 1, "body": "nice", "article_id": 1, "author_id": 2},
            {"id": 2, "body": "meh", "article_id": 2, "author_id": 1}
        ]
    })
}

pub fn setup_api_with(people: CollectionOptions, hooks: HookRegistry) -> Fixture {
    let catalog = catalog_with(people);
    let memory = InMemoryStorage::new(catalog.clone());
    memory.load_seed(&seed()).unwrap();

    let storage = Arc::new(RecordingStorage::new(Arc::new(memory)));
    let api = Api::new(catalog, storage.clone())
        .with_hooks(hooks)
        .with_base_url(BASE_URL);
    Fixture { api, storage }
}

pub fn setup_api() -> Fixture {
    setup_api_with(CollectionOptions::default(), HookRegistry::new())
}

pub fn setup_api_with_hooks(hooks: HookRegistry) -> Fixture {
    setup_api_with(CollectionOptions::default(), hooks)
}

pub fn setup_api_with_codecs(codecs: CodecRegistry) -> Fixture {
    let Fixture { api, storage } = setup_api();
    Fixture {
        api: api.with_codecs(codecs),
        storage,
    }
}

/// `type`/`id` pairs of a collection response's primary data
pub fn identifiers(body: &Value) -> Vec<(String, String)> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| {
            (
                r["type"].as_str().unwrap().to_string(),
                r["id"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

/// Attribute `field` of every resource in a collection response
pub fn column(body: &Value, field: &str) -> Vec<Value> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["attributes"][field].clone())
        .collect()
}
